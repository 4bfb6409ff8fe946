use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Injectable randomness — the Poisson feeler schedule and the AddrMan
/// rejection sampling both need a random source that tests can seed for
/// determinism.
pub trait RandomSource: Send + Sync {
    /// Uniform real in `[0, 1)`.
    fn uniform(&self) -> f64;

    /// Uniform integer in `[low, high)`.
    fn range(&self, low: usize, high: usize) -> usize;
}

/// Thread-local `rand::thread_rng()`-backed source, used in production.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadRandom;

impl RandomSource for ThreadRandom {
    fn uniform(&self) -> f64 {
        rand::thread_rng().gen::<f64>()
    }

    fn range(&self, low: usize, high: usize) -> usize {
        rand::thread_rng().gen_range(low..high)
    }
}

/// Seeded, reproducible source for tests.
pub struct SeededRandom {
    rng: parking_lot::Mutex<StdRng>,
}

impl SeededRandom {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: parking_lot::Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }
}

impl RandomSource for SeededRandom {
    fn uniform(&self) -> f64 {
        self.rng.lock().gen::<f64>()
    }

    fn range(&self, low: usize, high: usize) -> usize {
        self.rng.lock().gen_range(low..high)
    }
}
