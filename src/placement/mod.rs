//! Placement Resolver
//!
//! Two decisions are made per object:
//!
//! 1. **Endpoint**: which endpoint address serves the key. This is a
//!    consistent-hash lookup over externally supplied membership
//!    ([`ConsistentHashRing`], or any [`Locator`](crate::domain::ports::Locator)).
//! 2. **Shard targets**: which endpoint identity behind that address holds
//!    each shard. Identities are drawn as a random permutation of the cluster
//!    without repetition, or taken from a caller-supplied override.

pub mod ring;

use rand::seq::index;

use crate::error::{Error, Result};

pub use ring::{ConsistentHashRing, DEFAULT_VIRTUAL_NODES};

/// Pick `shards` distinct endpoint identities out of `0..cluster_size`.
pub fn random_placement(cluster_size: usize, shards: usize) -> Result<Vec<usize>> {
    if shards > cluster_size {
        return Err(Error::Config(format!(
            "cannot place {} shards on a cluster of {}",
            shards, cluster_size
        )));
    }

    let mut rng = rand::thread_rng();
    Ok(index::sample(&mut rng, cluster_size, shards).into_vec())
}

/// Check a caller-supplied shard placement.
pub fn check_placement(placement: &[usize], cluster_size: usize, shards: usize) -> Result<()> {
    if placement.len() != shards {
        return Err(Error::Config(format!(
            "placement lists {} targets for {} shards",
            placement.len(),
            shards
        )));
    }

    if let Some(bad) = placement.iter().find(|&&id| id >= cluster_size) {
        return Err(Error::Config(format!(
            "placement target {} outside cluster of {}",
            bad, cluster_size
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_random_placement_is_a_permutation_slice() {
        for _ in 0..50 {
            let placement = random_placement(14, 6).unwrap();
            assert_eq!(placement.len(), 6);

            let unique: HashSet<_> = placement.iter().collect();
            assert_eq!(unique.len(), 6);
            assert!(placement.iter().all(|&id| id < 14));
        }
    }

    #[test]
    fn test_random_placement_full_cluster() {
        let mut placement = random_placement(6, 6).unwrap();
        placement.sort_unstable();
        assert_eq!(placement, vec![0, 1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_random_placement_too_many_shards() {
        assert!(matches!(random_placement(4, 6), Err(Error::Config(_))));
    }

    #[test]
    fn test_check_placement() {
        assert!(check_placement(&[0, 1, 2, 3, 4, 5], 14, 6).is_ok());
        // Repeated targets are allowed; the caller is explicit
        assert!(check_placement(&[0, 0, 0, 0, 0, 0], 14, 6).is_ok());
        assert!(check_placement(&[0, 1, 2], 14, 6).is_err());
        assert!(check_placement(&[0, 1, 2, 3, 4, 14], 14, 6).is_err());
    }
}
