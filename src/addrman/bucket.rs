//! Deterministic, attack-resistant bucket placement. All indices are a pure
//! function of the secret key and the inputs — identical inputs always
//! produce identical placements, and an attacker who doesn't know the key
//! cannot predict or target a bucket.

use super::table::{BUCKET_SIZE, NEW_BUCKET_COUNT, TRIED_BUCKET_COUNT};
use crate::hashing::{keyed_hash, SecretKey};
use crate::model::{NetworkGroup, PeerEndpoint};

/// One source group is confined to a band of this many contiguous new
/// buckets (1024 / 64), which is how "an AddrInfo may live in up to 8
/// new-buckets" combines with "one source can populate at most 64 buckets"
/// into a single deterministic formula: the source picks the band, the
/// endpoint and position pick a slot within it.
const NEW_BUCKETS_PER_SOURCE: u64 = 64;
const NEW_BANDS: u64 = (NEW_BUCKET_COUNT as u64) / NEW_BUCKETS_PER_SOURCE;
pub const MAX_NEW_BUCKETS_PER_ENDPOINT: usize = 8;

/// Up to [`MAX_NEW_BUCKETS_PER_ENDPOINT`] distinct new-table bucket indices
/// for `endpoint` as advertised by `source`, deduplicated.
pub fn new_buckets(key: &SecretKey, source_group: &NetworkGroup, endpoint_group: &NetworkGroup) -> Vec<usize> {
    let band = keyed_hash(key, &[b"B", &source_group.hash_key()], NEW_BANDS);
    let mut buckets = Vec::with_capacity(MAX_NEW_BUCKETS_PER_ENDPOINT);
    for position in 0..MAX_NEW_BUCKETS_PER_ENDPOINT as u32 {
        let within_band = keyed_hash(
            key,
            &[b"N", &position.to_be_bytes(), &endpoint_group.hash_key()],
            NEW_BUCKETS_PER_SOURCE,
        );
        let bucket = (band * NEW_BUCKETS_PER_SOURCE + within_band) as usize;
        if !buckets.contains(&bucket) {
            buckets.push(bucket);
        }
    }
    buckets
}

pub fn new_slot(key: &SecretKey, bucket: usize, endpoint: &PeerEndpoint) -> usize {
    keyed_hash(key, &[b"N", &(bucket as u64).to_be_bytes(), &endpoint.hash_key()], BUCKET_SIZE as u64) as usize
}

pub fn tried_bucket(key: &SecretKey, endpoint_group: &NetworkGroup) -> usize {
    keyed_hash(key, &[b"T", &endpoint_group.hash_key()], TRIED_BUCKET_COUNT as u64) as usize
}

pub fn tried_slot(key: &SecretKey, bucket: usize, endpoint: &PeerEndpoint) -> usize {
    keyed_hash(key, &[b"T", &(bucket as u64).to_be_bytes(), &endpoint.hash_key()], BUCKET_SIZE as u64) as usize
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::PeerEndpoint;

    #[test]
    fn placement_is_pure() {
        let key = [3u8; 32];
        let src = NetworkGroup::of(&PeerEndpoint::new("9.9.9.9", 1));
        let ep_group = NetworkGroup::of(&PeerEndpoint::new("1.2.3.4", 8333));
        let a = new_buckets(&key, &src, &ep_group);
        let b = new_buckets(&key, &src, &ep_group);
        assert_eq!(a, b);
        assert!(a.len() <= MAX_NEW_BUCKETS_PER_ENDPOINT);
    }

    #[test]
    fn one_source_confined_to_64_bucket_band() {
        let key = [11u8; 32];
        let src = NetworkGroup::of(&PeerEndpoint::new("5.5.5.5", 1));
        let band = keyed_hash(&key, &[b"B", &src.hash_key()], NEW_BANDS);
        let band_lo = band * NEW_BUCKETS_PER_SOURCE;
        let band_hi = band_lo + NEW_BUCKETS_PER_SOURCE;
        for i in 0..5000u32 {
            let ep_group = NetworkGroup::of(&PeerEndpoint::new(format!("{}.{}.{}.{}", i % 256, (i / 256) % 256, 7, 7), 1));
            for bucket in new_buckets(&key, &src, &ep_group) {
                assert!((bucket as u64) >= band_lo && (bucket as u64) < band_hi);
            }
        }
    }

    proptest::proptest! {
        #[test]
        fn bucket_and_slot_indices_always_in_range(
            key: [u8; 32],
            src_octets: [u8; 4],
            ep_octets: [u8; 4],
            port: u16,
        ) {
            let src = NetworkGroup::of(&PeerEndpoint::new(
                format!("{}.{}.{}.{}", src_octets[0], src_octets[1], src_octets[2], src_octets[3]),
                1,
            ));
            let endpoint = PeerEndpoint::new(
                format!("{}.{}.{}.{}", ep_octets[0], ep_octets[1], ep_octets[2], ep_octets[3]),
                port,
            );
            let ep_group = NetworkGroup::of(&endpoint);

            let buckets = new_buckets(&key, &src, &ep_group);
            prop_assert!(buckets.len() <= MAX_NEW_BUCKETS_PER_ENDPOINT);
            for &b in &buckets {
                prop_assert!(b < NEW_BUCKET_COUNT);
                let slot = new_slot(&key, b, &endpoint);
                prop_assert!(slot < BUCKET_SIZE);
            }

            let tb = tried_bucket(&key, &ep_group);
            prop_assert!(tb < TRIED_BUCKET_COUNT);
            let ts = tried_slot(&key, tb, &endpoint);
            prop_assert!(ts < BUCKET_SIZE);
        }
    }
}
