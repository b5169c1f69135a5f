//! Property-Based Tests for the Erasure Coder
//!
//! # Test Properties
//!
//! 1. **Roundtrip Correctness**: join(decode(encode(data))) = data
//! 2. **Bounded Failure Tolerance**: any erasure set of size <= m is recovered
//! 3. **Above-Threshold Failure**: more than m erasures is unrecoverable
//! 4. **Idempotent Verify**: verify never mutates and always agrees with itself

#![cfg(test)]

use std::io::Read;

use proptest::prelude::*;

use super::encoder::ErasureCoder;
use crate::error::Error;

// =============================================================================
// Property Strategies
// =============================================================================

/// Strategy for generating small k+m configurations for faster tests.
fn small_ec_config_strategy() -> impl Strategy<Value = (usize, usize)> {
    (2usize..=6, 1usize..=3)
}

/// Strategy for generating test data of various sizes.
fn data_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 1..4000)
}

/// Strategy for a config plus a deduplicated erasure set of at most m indices.
fn bounded_erasures() -> impl Strategy<Value = ((usize, usize), Vec<usize>)> {
    small_ec_config_strategy().prop_flat_map(|(k, m)| {
        let erasures = prop::collection::btree_set(0..k + m, 0..=m)
            .prop_map(|set| set.into_iter().collect::<Vec<_>>());
        (Just((k, m)), erasures)
    })
}

/// Strategy for a config plus an erasure set strictly larger than m.
fn excessive_erasures() -> impl Strategy<Value = ((usize, usize), Vec<usize>)> {
    small_ec_config_strategy().prop_flat_map(|(k, m)| {
        let erasures = prop::collection::btree_set(0..k + m, (m + 1)..=(k + m))
            .prop_map(|set| set.into_iter().collect::<Vec<_>>());
        (Just((k, m)), erasures)
    })
}

fn join_all(coder: &ErasureCoder, shards: Vec<Option<Vec<u8>>>, size: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(size);
    coder
        .join(shards, size)
        .expect("join")
        .read_to_end(&mut out)
        .expect("read");
    out
}

// =============================================================================
// Roundtrip Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// Property: with no losses, verify passes first time and the object round-trips.
    #[test]
    fn prop_roundtrip_no_loss(
        (k, m) in small_ec_config_strategy(),
        data in data_strategy(),
    ) {
        let coder = ErasureCoder::new(k, m)?;
        let shards = coder.encode_object(&data)?;
        prop_assert_eq!(shards.len(), k + m);

        let mut optional: Vec<Option<Vec<u8>>> = shards.into_iter().map(Some).collect();
        let status = coder.decode(&mut optional)?;
        prop_assert!(status.all_good);

        let recovered = join_all(&coder, optional, data.len());
        prop_assert_eq!(recovered, data);
    }

    /// Property: any erasure pattern of at most m shards is recovered.
    #[test]
    fn prop_bounded_failure_tolerance(
        ((k, m), erasures) in bounded_erasures(),
        data in data_strategy(),
    ) {
        let coder = ErasureCoder::new(k, m)?;
        let shards = coder.encode_object(&data)?;
        let mut optional: Vec<Option<Vec<u8>>> = shards.iter().cloned().map(Some).collect();

        for &i in &erasures {
            optional[i] = None;
        }

        let status = coder.decode(&mut optional)?;
        prop_assert_eq!(status.reconstructed, !erasures.is_empty());

        // Reconstructed shards match the originals byte for byte
        for &i in &erasures {
            prop_assert_eq!(optional[i].as_ref(), Some(&shards[i]));
        }

        let recovered = join_all(&coder, optional, data.len());
        prop_assert_eq!(recovered, data, "k={}, m={}, erasures={:?}", k, m, erasures);
    }
}

// =============================================================================
// Failure Mode Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(50))]

    /// Property: more than m erasures is reported as unrecoverable.
    #[test]
    fn prop_above_threshold_fails(
        ((k, m), erasures) in excessive_erasures(),
        data in data_strategy(),
    ) {
        let coder = ErasureCoder::new(k, m)?;
        let mut optional: Vec<Option<Vec<u8>>> =
            coder.encode_object(&data)?.into_iter().map(Some).collect();

        for &i in &erasures {
            optional[i] = None;
        }

        let result = coder.decode(&mut optional);
        prop_assert!(
            matches!(result, Err(Error::InsufficientShards { .. })),
            "k={}, m={}, erasures={:?}", k, m, erasures
        );
    }

    /// Property: verify is side-effect free and stable across repeated calls.
    #[test]
    fn prop_verify_idempotent(
        (k, m) in small_ec_config_strategy(),
        data in data_strategy(),
        drop_one in any::<bool>(),
    ) {
        let coder = ErasureCoder::new(k, m)?;
        let mut optional: Vec<Option<Vec<u8>>> =
            coder.encode_object(&data)?.into_iter().map(Some).collect();
        if drop_one {
            optional[0] = None;
        }
        let snapshot = optional.clone();

        let first = coder.verify_present(&optional);
        let second = coder.verify_present(&optional);

        prop_assert_eq!(first, second);
        prop_assert_eq!(first, !drop_one);
        prop_assert_eq!(optional, snapshot);
    }
}

// =============================================================================
// Determinism Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(20))]

    /// Property: Encoding is deterministic across coder instances.
    #[test]
    fn prop_encoding_deterministic(
        (k, m) in small_ec_config_strategy(),
        data in data_strategy(),
    ) {
        let coder1 = ErasureCoder::new(k, m)?;
        let coder2 = ErasureCoder::new(k, m)?;

        let shards1 = coder1.encode_object(&data)?;
        let shards2 = coder2.encode_object(&data)?;

        prop_assert_eq!(shards1, shards2);
    }

    /// Property: data shards carry the original bytes as a prefix.
    #[test]
    fn prop_data_shards_contain_all_data(
        (k, m) in small_ec_config_strategy(),
        data in data_strategy(),
    ) {
        let coder = ErasureCoder::new(k, m)?;
        let shards = coder.split(&data)?;

        let concatenated: Vec<u8> = shards.iter().take(k).flatten().copied().collect();
        prop_assert!(concatenated.len() >= data.len());
        prop_assert_eq!(&concatenated[..data.len()], data.as_slice());
    }
}
