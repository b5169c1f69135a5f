//! Client configuration
//!
//! Loaded from YAML or built in code. Missing fields take their defaults.
//!
//! ```yaml
//! data_shards: 4
//! parity_shards: 2
//! cluster_size: 14
//! shard_timeout_ms: 2000
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::ec::encoder::MAX_TOTAL_SHARDS;
use crate::error::{Error, Result};
use crate::placement::DEFAULT_VIRTUAL_NODES;
use crate::protocol::{DEFAULT_MAX_BULK_LEN, MAX_BULK_LEN};

/// Default data shards
pub const DEFAULT_DATA_SHARDS: usize = 4;

/// Default parity shards
pub const DEFAULT_PARITY_SHARDS: usize = 2;

/// Default number of endpoint identities behind one address
pub const DEFAULT_CLUSTER_SIZE: usize = 14;

/// Default per-exchange write/read deadline
pub const DEFAULT_SHARD_TIMEOUT_MS: u64 = 2000;

/// Default connect deadline
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 3000;

/// Shard client configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Shards carrying object bytes
    pub data_shards: usize,
    /// Redundancy shards
    pub parity_shards: usize,
    /// Endpoint identities available for shard placement
    pub cluster_size: usize,
    /// Deadline for each write phase and each read phase of a shard exchange
    pub shard_timeout_ms: u64,
    /// Deadline for establishing a slot connection
    pub connect_timeout_ms: u64,
    /// Points per member on the placement ring
    pub virtual_nodes: usize,
    /// Largest bulk payload accepted from an endpoint
    pub max_bulk_len: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            data_shards: DEFAULT_DATA_SHARDS,
            parity_shards: DEFAULT_PARITY_SHARDS,
            cluster_size: DEFAULT_CLUSTER_SIZE,
            shard_timeout_ms: DEFAULT_SHARD_TIMEOUT_MS,
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            virtual_nodes: DEFAULT_VIRTUAL_NODES,
            max_bulk_len: DEFAULT_MAX_BULK_LEN,
        }
    }
}

impl ClientConfig {
    /// Config with the given shard counts and defaults elsewhere
    pub fn new(data_shards: usize, parity_shards: usize) -> Self {
        Self {
            data_shards,
            parity_shards,
            ..Self::default()
        }
    }

    /// Parse and validate a YAML document
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a YAML file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let yaml = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&yaml)
    }

    /// Total number of shards.
    pub fn total_shards(&self) -> usize {
        self.data_shards + self.parity_shards
    }

    pub fn shard_timeout(&self) -> Duration {
        Duration::from_millis(self.shard_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<()> {
        if self.data_shards == 0 {
            return Err(Error::InvalidEcConfig("data_shards must be >= 1".into()));
        }
        if self.parity_shards == 0 {
            return Err(Error::InvalidEcConfig("parity_shards must be >= 1".into()));
        }
        if self.total_shards() > MAX_TOTAL_SHARDS {
            return Err(Error::InvalidEcConfig(format!(
                "total shards must be <= {}",
                MAX_TOTAL_SHARDS
            )));
        }
        if self.cluster_size < self.total_shards() {
            return Err(Error::Config(format!(
                "cluster_size {} cannot hold {} shards",
                self.cluster_size,
                self.total_shards()
            )));
        }
        if self.shard_timeout_ms == 0 || self.connect_timeout_ms == 0 {
            return Err(Error::Config("timeouts must be > 0".into()));
        }
        if self.virtual_nodes == 0 {
            return Err(Error::Config("virtual_nodes must be > 0".into()));
        }
        if self.max_bulk_len == 0 || self.max_bulk_len > MAX_BULK_LEN {
            return Err(Error::Config(format!(
                "max_bulk_len must be in 1..={}",
                MAX_BULK_LEN
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_defaults_are_valid() {
        let config = ClientConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.total_shards(), 6);
        assert_eq!(config.shard_timeout(), Duration::from_secs(2));
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let config = ClientConfig::from_yaml_str("data_shards: 10\nparity_shards: 2\n").unwrap();
        assert_eq!(config.data_shards, 10);
        assert_eq!(config.parity_shards, 2);
        assert_eq!(config.cluster_size, DEFAULT_CLUSTER_SIZE);
        assert_eq!(config.virtual_nodes, DEFAULT_VIRTUAL_NODES);
    }

    #[test]
    fn test_invalid_shard_counts() {
        assert_matches!(ClientConfig::new(0, 2).validate(), Err(Error::InvalidEcConfig(_)));
        assert_matches!(ClientConfig::new(4, 0).validate(), Err(Error::InvalidEcConfig(_)));

        let mut wide = ClientConfig::new(200, 100);
        wide.cluster_size = 400;
        assert_matches!(wide.validate(), Err(Error::InvalidEcConfig(_)));
    }

    #[test]
    fn test_cluster_must_hold_all_shards() {
        let mut config = ClientConfig::new(10, 4);
        assert_matches!(config.validate(), Err(Error::Config(_)));

        config.cluster_size = 14;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let err = ClientConfig::from_yaml_str("shard_timeout_ms: 0\n").unwrap_err();
        assert_matches!(err, Error::Config(_));
    }

    #[test]
    fn test_bulk_limit_bounds() {
        let mut config = ClientConfig::default();
        config.max_bulk_len = usize::MAX;
        assert_matches!(config.validate(), Err(Error::Config(_)));

        config.max_bulk_len = MAX_BULK_LEN;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_bad_yaml() {
        assert_matches!(
            ClientConfig::from_yaml_str("data_shards: [1, 2]"),
            Err(Error::Yaml(_))
        );
    }
}
