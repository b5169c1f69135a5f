//! Client Metrics
//!
//! Prometheus collectors for one client instance. Each client owns its own
//! `Registry` so several clients (or tests) can coexist in a process.

use std::time::Duration;

use prometheus::{
    HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};

use crate::domain::ports::Command;
use crate::error::{Error, Result};

/// Latency buckets in seconds, 100us to 10s
const LATENCY_BUCKETS: &[f64] = &[
    0.0001, 0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

/// Per-client Prometheus collectors
#[derive(Clone)]
pub struct ClientMetrics {
    registry: Registry,
    operations: IntCounterVec,
    operation_latency: HistogramVec,
    shard_latency: HistogramVec,
    shard_failures: IntCounterVec,
    reconstructions: IntCounter,
    corruptions: IntCounter,
    abandoned_chunks: IntCounter,
    invalidated_slots: IntCounter,
    repairs: IntCounterVec,
}

impl ClientMetrics {
    /// Create collectors and register them on a fresh registry
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let operations = IntCounterVec::new(
            Opts::new("ecstore_operations_total", "Logical operations by outcome"),
            &["cmd", "status"],
        )
        .map_err(metrics_error)?;
        let operation_latency = HistogramVec::new(
            HistogramOpts::new(
                "ecstore_operation_duration_seconds",
                "End-to-end latency of logical operations",
            )
            .buckets(LATENCY_BUCKETS.to_vec()),
            &["cmd"],
        )
        .map_err(metrics_error)?;
        let shard_latency = HistogramVec::new(
            HistogramOpts::new(
                "ecstore_shard_duration_seconds",
                "Latency of single shard exchanges",
            )
            .buckets(LATENCY_BUCKETS.to_vec()),
            &["cmd", "status"],
        )
        .map_err(metrics_error)?;
        let shard_failures = IntCounterVec::new(
            Opts::new("ecstore_shard_failures_total", "Failed shard exchanges"),
            &["cmd", "kind"],
        )
        .map_err(metrics_error)?;
        let reconstructions = IntCounter::new(
            "ecstore_reconstructions_total",
            "GETs that needed reconstruction",
        )
        .map_err(metrics_error)?;
        let corruptions = IntCounter::new(
            "ecstore_corruptions_total",
            "GETs whose shards arrived complete but inconsistent",
        )
        .map_err(metrics_error)?;
        let abandoned_chunks = IntCounter::new(
            "ecstore_abandoned_chunks_total",
            "Responses carrying the abandoned-chunk sentinel",
        )
        .map_err(metrics_error)?;
        let invalidated_slots = IntCounter::new(
            "ecstore_invalidated_slots_total",
            "Slot connections dropped after timeout or stream end",
        )
        .map_err(metrics_error)?;
        let repairs = IntCounterVec::new(
            Opts::new("ecstore_repairs_total", "Background repairs by outcome"),
            &["status"],
        )
        .map_err(metrics_error)?;

        registry
            .register(Box::new(operations.clone()))
            .map_err(metrics_error)?;
        registry
            .register(Box::new(operation_latency.clone()))
            .map_err(metrics_error)?;
        registry
            .register(Box::new(shard_latency.clone()))
            .map_err(metrics_error)?;
        registry
            .register(Box::new(shard_failures.clone()))
            .map_err(metrics_error)?;
        registry
            .register(Box::new(reconstructions.clone()))
            .map_err(metrics_error)?;
        registry
            .register(Box::new(corruptions.clone()))
            .map_err(metrics_error)?;
        registry
            .register(Box::new(abandoned_chunks.clone()))
            .map_err(metrics_error)?;
        registry
            .register(Box::new(invalidated_slots.clone()))
            .map_err(metrics_error)?;
        registry
            .register(Box::new(repairs.clone()))
            .map_err(metrics_error)?;

        Ok(Self {
            registry,
            operations,
            operation_latency,
            shard_latency,
            shard_failures,
            reconstructions,
            corruptions,
            abandoned_chunks,
            invalidated_slots,
            repairs,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Record a finished logical operation
    pub fn record_operation(&self, cmd: Command, success: bool, elapsed: Duration) {
        let status = if success { "success" } else { "failure" };
        self.operations
            .with_label_values(&[cmd.as_str(), status])
            .inc();
        self.operation_latency
            .with_label_values(&[cmd.as_str()])
            .observe(elapsed.as_secs_f64());
    }

    /// Record the latency of one shard exchange
    pub fn record_shard(&self, cmd: Command, success: bool, elapsed: Duration) {
        let status = if success { "success" } else { "failure" };
        self.shard_latency
            .with_label_values(&[cmd.as_str(), status])
            .observe(elapsed.as_secs_f64());
    }

    pub fn record_shard_failure(&self, cmd: Command, error: &Error) {
        self.shard_failures
            .with_label_values(&[cmd.as_str(), error.kind()])
            .inc();
        if error.invalidates_connection() {
            self.invalidated_slots.inc();
        }
    }

    pub fn record_reconstruction(&self) {
        self.reconstructions.inc();
    }

    pub fn record_corruption(&self) {
        self.corruptions.inc();
    }

    pub fn record_abandoned(&self) {
        self.abandoned_chunks.inc();
    }

    pub fn record_repair(&self, success: bool) {
        let status = if success { "success" } else { "failure" };
        self.repairs.with_label_values(&[status]).inc();
    }

    /// Operations counted for `cmd` and outcome
    pub fn operations(&self, cmd: Command, success: bool) -> u64 {
        let status = if success { "success" } else { "failure" };
        self.operations
            .with_label_values(&[cmd.as_str(), status])
            .get()
    }

    /// Shard exchanges observed for `cmd` and outcome
    pub fn shard_exchanges(&self, cmd: Command, success: bool) -> u64 {
        let status = if success { "success" } else { "failure" };
        self.shard_latency
            .with_label_values(&[cmd.as_str(), status])
            .get_sample_count()
    }

    pub fn reconstructions(&self) -> u64 {
        self.reconstructions.get()
    }

    pub fn invalidated_slots(&self) -> u64 {
        self.invalidated_slots.get()
    }

    /// Render the registry in the Prometheus text exposition format
    pub fn encode_text(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let mut out = String::new();
        encoder
            .encode_utf8(&self.registry.gather(), &mut out)
            .map_err(metrics_error)?;
        Ok(out)
    }
}

impl std::fmt::Debug for ClientMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientMetrics")
            .field("reconstructions", &self.reconstructions.get())
            .field("invalidated_slots", &self.invalidated_slots.get())
            .finish_non_exhaustive()
    }
}

fn metrics_error(e: prometheus::Error) -> Error {
    Error::Internal(format!("metrics: {}", e))
}
