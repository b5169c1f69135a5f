//! Consistent Hash Ring
//!
//! Maps a key to one endpoint address. Each member is projected onto the
//! ring at `virtual_nodes` points; a key belongs to the first point at or
//! after its hash, wrapping around.
//!
//! # Design
//!
//! - Points live in a `BTreeMap<u64, usize>` so lookup is a range query
//! - Members are kept in insertion order; points store the member index
//! - Adding or removing a member only moves the key ranges adjacent to its
//!   own points

use std::collections::BTreeMap;

use parking_lot::RwLock;
use tracing::debug;

use crate::domain::ports::Locator;
use crate::error::{Error, Result};

/// Default number of points per member
pub const DEFAULT_VIRTUAL_NODES: usize = 160;

/// Consistent hash ring over endpoint addresses
#[derive(Debug, Clone)]
pub struct ConsistentHashRing {
    members: Vec<String>,
    points: BTreeMap<u64, usize>,
    virtual_nodes: usize,
}

impl Default for ConsistentHashRing {
    fn default() -> Self {
        Self::new(DEFAULT_VIRTUAL_NODES)
    }
}

impl ConsistentHashRing {
    /// Create an empty ring
    pub fn new(virtual_nodes: usize) -> Self {
        Self {
            members: Vec::new(),
            points: BTreeMap::new(),
            virtual_nodes: virtual_nodes.max(1),
        }
    }

    /// Create a ring populated with `members`
    pub fn with_members<I, S>(virtual_nodes: usize, members: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut ring = Self::new(virtual_nodes);
        for member in members {
            ring.add(member);
        }
        ring
    }

    /// Number of members
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Check if the ring has no members
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Current members in insertion order
    pub fn members(&self) -> &[String] {
        &self.members
    }

    /// Add a member. Returns false if it was already present.
    pub fn add(&mut self, member: impl Into<String>) -> bool {
        let member = member.into();
        if self.members.contains(&member) {
            return false;
        }

        self.members.push(member);
        self.rebuild();
        debug!(members = self.members.len(), "ring member added");
        true
    }

    /// Remove a member. Returns false if it was not present.
    pub fn remove(&mut self, member: &str) -> bool {
        let Some(pos) = self.members.iter().position(|m| m == member) else {
            return false;
        };

        self.members.remove(pos);
        self.rebuild();
        debug!(members = self.members.len(), "ring member removed");
        true
    }

    /// Locate the member owning `key`
    pub fn locate(&self, key: &str) -> Option<&str> {
        if self.points.is_empty() {
            return None;
        }

        let hash = ring_hash(key.as_bytes());
        let (_, &idx) = self
            .points
            .range(hash..)
            .next()
            .or_else(|| self.points.iter().next())?;

        Some(self.members[idx].as_str())
    }

    fn rebuild(&mut self) {
        self.points.clear();
        for (idx, member) in self.members.iter().enumerate() {
            for replica in 0..self.virtual_nodes {
                let point = ring_hash(format!("{}#{}", member, replica).as_bytes());
                // First writer keeps a colliding point
                self.points.entry(point).or_insert(idx);
            }
        }
    }
}

impl Locator for ConsistentHashRing {
    fn locate(&self, key: &str) -> Result<String> {
        ConsistentHashRing::locate(self, key)
            .map(str::to_string)
            .ok_or_else(|| Error::PlacementUnavailable {
                key: key.to_string(),
            })
    }
}

/// Ring shared with an external membership manager.
///
/// Membership may change between operations; each lookup takes a read lock.
impl Locator for RwLock<ConsistentHashRing> {
    fn locate(&self, key: &str) -> Result<String> {
        Locator::locate(&*self.read(), key)
    }
}

/// Fast non-cryptographic hash (FxHash mixing) with a 64-bit finalizer so
/// that short, similar inputs spread across the ring.
#[inline]
fn ring_hash(bytes: &[u8]) -> u64 {
    const SEED: u64 = 0x517cc1b727220a95;
    let mut hash = SEED;
    for &byte in bytes {
        hash = hash.rotate_left(5) ^ (byte as u64);
        hash = hash.wrapping_mul(SEED);
    }

    // fmix64
    hash ^= hash >> 33;
    hash = hash.wrapping_mul(0xff51afd7ed558ccd);
    hash ^= hash >> 33;
    hash = hash.wrapping_mul(0xc4ceb9fe1a85ec53);
    hash ^= hash >> 33;
    hash
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn keys(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("obj-{}", i)).collect()
    }

    #[test]
    fn test_empty_ring_has_no_placement() {
        let ring = ConsistentHashRing::default();
        assert!(ring.is_empty());
        assert!(ring.locate("obj1").is_none());

        let result = Locator::locate(&ring, "obj1");
        assert!(matches!(result, Err(Error::PlacementUnavailable { .. })));
    }

    #[test]
    fn test_locate_is_deterministic() {
        let ring = ConsistentHashRing::with_members(64, ["10.0.0.1:6378", "10.0.0.2:6378"]);
        let again = ConsistentHashRing::with_members(64, ["10.0.0.1:6378", "10.0.0.2:6378"]);

        for key in keys(200) {
            assert_eq!(ring.locate(&key), ring.locate(&key));
            assert_eq!(ring.locate(&key), again.locate(&key));
        }
    }

    #[test]
    fn test_single_member_owns_everything() {
        let ring = ConsistentHashRing::with_members(16, ["proxy-a"]);
        for key in keys(50) {
            assert_eq!(ring.locate(&key), Some("proxy-a"));
        }
    }

    #[test]
    fn test_duplicate_member_ignored() {
        let mut ring = ConsistentHashRing::default();
        assert!(ring.add("a"));
        assert!(!ring.add("a"));
        assert_eq!(ring.len(), 1);
        assert!(!ring.remove("b"));
    }

    #[test]
    fn test_adding_member_moves_only_to_new_member() {
        let mut ring = ConsistentHashRing::with_members(128, ["a", "b", "c"]);
        let before: HashMap<String, String> = keys(2000)
            .into_iter()
            .map(|k| {
                let owner = ring.locate(&k).unwrap().to_string();
                (k, owner)
            })
            .collect();

        ring.add("d");

        let mut moved = 0;
        for (key, old_owner) in &before {
            let new_owner = ring.locate(key).unwrap();
            if new_owner != old_owner {
                assert_eq!(new_owner, "d", "key {} moved between old members", key);
                moved += 1;
            }
        }

        // Roughly a quarter of the keys should move to the new member
        assert!(moved > 200 && moved < 900, "moved {}", moved);
    }

    #[test]
    fn test_removing_member_moves_only_its_keys() {
        let mut ring = ConsistentHashRing::with_members(128, ["a", "b", "c", "d"]);
        let before: HashMap<String, String> = keys(2000)
            .into_iter()
            .map(|k| {
                let owner = ring.locate(&k).unwrap().to_string();
                (k, owner)
            })
            .collect();

        ring.remove("b");

        for (key, old_owner) in &before {
            let new_owner = ring.locate(key).unwrap();
            if old_owner != "b" {
                assert_eq!(new_owner, old_owner);
            } else {
                assert_ne!(new_owner, "b");
            }
        }
    }

    #[test]
    fn test_keys_spread_across_members() {
        let ring = ConsistentHashRing::with_members(160, ["a", "b", "c", "d"]);
        let mut counts: HashMap<&str, usize> = HashMap::new();
        for key in keys(4000) {
            *counts.entry(ring.locate(&key).unwrap()).or_default() += 1;
        }

        assert_eq!(counts.len(), 4);
        for (member, count) in counts {
            assert!(count > 500, "member {} only got {} keys", member, count);
        }
    }

    #[test]
    fn test_shared_ring_locator() {
        let shared = RwLock::new(ConsistentHashRing::default());
        assert!(Locator::locate(&shared, "k").is_err());

        shared.write().add("10.0.0.9:6378");
        assert_eq!(Locator::locate(&shared, "k").unwrap(), "10.0.0.9:6378");
    }
}
