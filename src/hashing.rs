//! The single keyed-hash primitive behind bucket placement and relay
//! ordering. Every bucket/slot index and every relay ordering hash is
//! `SHA-256(key || tag || parts...)`, truncated to the width the caller
//! needs. Keying by a 256-bit secret fixed at AddrMan creation is what
//! makes bucket placement unpredictable to an attacker flooding the table
//! with chosen endpoints.

use sha2::{Digest, Sha256};

/// 256-bit secret that parameterizes every hash in this module. Persisted
/// alongside the AddrMan snapshot; never logged.
pub type SecretKey = [u8; 32];

pub fn random_secret_key(rand: &impl crate::randsource::RandomSource) -> SecretKey {
    let mut key = [0u8; 32];
    for byte in key.iter_mut() {
        *byte = rand.range(0, 256) as u8;
    }
    key
}

fn digest(key: &SecretKey, parts: &[&[u8]]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(key);
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize().into()
}

/// Truncate a SHA-256 digest to a `u64`, used for bucket/slot indices.
fn truncate64(digest: [u8; 32]) -> u64 {
    u64::from_be_bytes(digest[0..8].try_into().expect("8 bytes"))
}

/// `H(key || parts...) mod modulus`, truncated to 64 bits before reducing.
pub fn keyed_hash(key: &SecretKey, parts: &[&[u8]], modulus: u64) -> u64 {
    truncate64(digest(key, parts)) % modulus
}

/// Full 256-bit keyed hash, used for relay-neighbor ordering where we need
/// a total order over many neighbors without truncation bias.
pub fn keyed_hash256(key: &SecretKey, parts: &[&[u8]]) -> [u8; 32] {
    digest(key, parts)
}
