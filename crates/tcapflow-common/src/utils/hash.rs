//! Deterministic hashing for keys and partition routing.
//!
//! Build and probe sides of a join run on different threads, so they must
//! agree on every hash. The hasher is seeded with fixed constants instead of
//! per-process randomness. Hashes are stable within one build only: the
//! `ahash` algorithm may differ across crate versions, platforms, and target
//! features, so hash values must not be persisted or exchanged between
//! binaries.

use std::hash::{BuildHasher, Hash};

use ahash::RandomState;

use crate::types::Value;

const SEEDS: [u64; 4] = [
    0x243f_6a88_85a3_08d3,
    0x1319_8a2e_0370_7344,
    0xa409_3822_299f_31d0,
    0x082e_fa98_ec4e_6c89,
];

/// Returns the shared fixed-seed hasher factory.
#[must_use]
pub fn stable_state() -> RandomState {
    RandomState::with_seeds(SEEDS[0], SEEDS[1], SEEDS[2], SEEDS[3])
}

/// Hashes any hashable value with the stable hasher.
#[must_use]
pub fn hash_one<T: Hash + ?Sized>(value: &T) -> u64 {
    stable_state().hash_one(value)
}

/// Hashes a [`Value`] the way join and aggregation keys are hashed.
#[must_use]
pub fn hash_value(value: &Value) -> u64 {
    hash_one(value)
}

/// Routes a hash to one of `num_partitions` partitions.
#[must_use]
pub fn partition_of(hash: u64, num_partitions: usize) -> usize {
    debug_assert!(num_partitions > 0);
    (hash % num_partitions.max(1) as u64) as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_is_stable_within_build() {
        let a = hash_value(&Value::from("alice"));
        let b = hash_value(&Value::from("alice"));
        assert_eq!(a, b);
        assert_eq!(stable_state().hash_one(42_u64), hash_one(&42_u64));
        assert_ne!(a, hash_value(&Value::from("bob")));
    }

    #[test]
    fn test_partition_in_range() {
        for i in 0..1000_i64 {
            let p = partition_of(hash_value(&Value::Int64(i)), 7);
            assert!(p < 7);
        }
    }
}
