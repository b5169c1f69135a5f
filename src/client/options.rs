//! Per-call operation options

/// Options resolved once at the SET/GET call boundary.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OperationOptions {
    /// Pick placements only; no encoding and no network I/O
    pub simulate: bool,
    /// Endpoint identities to draw placements from, instead of the configured cluster size
    pub cluster_size: Option<usize>,
    /// Explicit endpoint id per shard index, instead of a random draw
    pub placement_override: Option<Vec<usize>>,
}

impl OperationOptions {
    /// Options for a dry run
    pub fn dry_run() -> Self {
        Self {
            simulate: true,
            ..Self::default()
        }
    }

    pub fn with_cluster_size(mut self, cluster_size: usize) -> Self {
        self.cluster_size = Some(cluster_size);
        self
    }

    pub fn with_placement(mut self, placement: Vec<usize>) -> Self {
        self.placement_override = Some(placement);
        self
    }
}
