use crate::model::PeerEndpoint;
use serde::{Deserialize, Serialize};

pub const NEW_BUCKET_COUNT: usize = 1024;
pub const TRIED_BUCKET_COUNT: usize = 256;
pub const BUCKET_SIZE: usize = 64;

/// A bucketed table: `num_buckets` buckets of `BUCKET_SIZE` slots each. Used
/// for both the new table (1024 buckets) and the tried table (256 buckets).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BucketTable {
    buckets: Vec<Vec<Option<PeerEndpoint>>>,
}

impl BucketTable {
    pub fn new(num_buckets: usize) -> Self {
        Self {
            buckets: vec![vec![None; BUCKET_SIZE]; num_buckets],
        }
    }

    pub fn get(&self, bucket: usize, slot: usize) -> Option<&PeerEndpoint> {
        self.buckets[bucket][slot].as_ref()
    }

    pub fn set(&mut self, bucket: usize, slot: usize, endpoint: Option<PeerEndpoint>) {
        self.buckets[bucket][slot] = endpoint;
    }

    pub fn is_empty_slot(&self, bucket: usize, slot: usize) -> bool {
        self.buckets[bucket][slot].is_none()
    }

    pub fn occupancy(&self, bucket: usize) -> usize {
        self.buckets[bucket].iter().filter(|s| s.is_some()).count()
    }

    pub fn num_buckets(&self) -> usize {
        self.buckets.len()
    }

    pub fn remove_endpoint(&mut self, bucket: usize, endpoint: &PeerEndpoint) {
        for slot in self.buckets[bucket].iter_mut() {
            if slot.as_ref() == Some(endpoint) {
                *slot = None;
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.iter().all(|b| b.iter().all(|s| s.is_none()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bucket_never_exceeds_slot_count() {
        let mut t = BucketTable::new(4);
        for slot in 0..BUCKET_SIZE {
            t.set(0, slot, Some(PeerEndpoint::new(format!("1.2.3.{slot}"), 1)));
        }
        assert_eq!(t.occupancy(0), BUCKET_SIZE);
    }
}
