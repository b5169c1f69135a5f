//! Telemetry Events
//!
//! Immutable records of what happened during one operation or one shard
//! exchange. The client emits them through the
//! [`EventPublisher`](super::ports::EventPublisher) port.
//!
//! # Example
//!
//! ```ignore
//! let event = TelemetryEvent::shard_failed(&req_id, "obj1", Command::Get, 4, &addr, &err);
//! publisher.publish(event).await?;
//! ```

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ports::Command;
use crate::error::Error;

/// Telemetry event emitted by the client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum TelemetryEvent {
    // =========================================================================
    // Operation Events
    // =========================================================================
    /// Every shard of a SET was stored.
    ObjectStored {
        req_id: String,
        key: String,
        size: u64,
        placements: Vec<usize>,
        started_at: DateTime<Utc>,
        duration_us: u64,
        timestamp: DateTime<Utc>,
    },

    /// A GET produced a verified object.
    ObjectRetrieved {
        req_id: String,
        key: String,
        size: u64,
        started_at: DateTime<Utc>,
        receive_us: u64,
        decode_us: u64,
        duration_us: u64,
        reconstructed: bool,
        missing_shards: Vec<usize>,
        timestamp: DateTime<Utc>,
    },

    /// A SET or GET failed as a whole.
    OperationFailed {
        req_id: String,
        key: String,
        cmd: Command,
        kind: String,
        reason: String,
        timestamp: DateTime<Utc>,
    },

    // =========================================================================
    // Shard Events
    // =========================================================================
    /// One shard exchange returned a value.
    ShardCompleted {
        req_id: String,
        key: String,
        cmd: Command,
        shard_index: usize,
        endpoint: String,
        bytes: u64,
        duration_us: u64,
        timestamp: DateTime<Utc>,
    },

    /// One shard exchange failed.
    ShardFailed {
        req_id: String,
        key: String,
        cmd: Command,
        shard_index: usize,
        endpoint: String,
        kind: String,
        reason: String,
        invalidated: bool,
        timestamp: DateTime<Utc>,
    },

    /// The endpoint answered with the abandoned-chunk sentinel.
    ChunkAbandoned {
        req_id: String,
        key: String,
        shard_index: usize,
        endpoint: String,
        timestamp: DateTime<Utc>,
    },

    /// All shards arrived but failed verification.
    CorruptionDetected {
        req_id: String,
        key: String,
        timestamp: DateTime<Utc>,
    },

    // =========================================================================
    // Repair Events
    // =========================================================================
    /// Lost shards were rewritten.
    RepairCompleted {
        req_id: String,
        origin_req_id: String,
        key: String,
        shards: Vec<usize>,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// A repair attempt gave up.
    RepairFailed {
        req_id: String,
        origin_req_id: String,
        key: String,
        shards: Vec<usize>,
        reason: String,
        timestamp: DateTime<Utc>,
    },
}

impl TelemetryEvent {
    /// Get the timestamp of the event.
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            TelemetryEvent::ObjectStored { timestamp, .. }
            | TelemetryEvent::ObjectRetrieved { timestamp, .. }
            | TelemetryEvent::OperationFailed { timestamp, .. }
            | TelemetryEvent::ShardCompleted { timestamp, .. }
            | TelemetryEvent::ShardFailed { timestamp, .. }
            | TelemetryEvent::ChunkAbandoned { timestamp, .. }
            | TelemetryEvent::CorruptionDetected { timestamp, .. }
            | TelemetryEvent::RepairCompleted { timestamp, .. }
            | TelemetryEvent::RepairFailed { timestamp, .. } => *timestamp,
        }
    }

    /// Get the event type name.
    pub fn event_type(&self) -> &'static str {
        match self {
            TelemetryEvent::ObjectStored { .. } => "ObjectStored",
            TelemetryEvent::ObjectRetrieved { .. } => "ObjectRetrieved",
            TelemetryEvent::OperationFailed { .. } => "OperationFailed",
            TelemetryEvent::ShardCompleted { .. } => "ShardCompleted",
            TelemetryEvent::ShardFailed { .. } => "ShardFailed",
            TelemetryEvent::ChunkAbandoned { .. } => "ChunkAbandoned",
            TelemetryEvent::CorruptionDetected { .. } => "CorruptionDetected",
            TelemetryEvent::RepairCompleted { .. } => "RepairCompleted",
            TelemetryEvent::RepairFailed { .. } => "RepairFailed",
        }
    }

    /// Request id the event belongs to.
    pub fn req_id(&self) -> &str {
        match self {
            TelemetryEvent::ObjectStored { req_id, .. }
            | TelemetryEvent::ObjectRetrieved { req_id, .. }
            | TelemetryEvent::OperationFailed { req_id, .. }
            | TelemetryEvent::ShardCompleted { req_id, .. }
            | TelemetryEvent::ShardFailed { req_id, .. }
            | TelemetryEvent::ChunkAbandoned { req_id, .. }
            | TelemetryEvent::CorruptionDetected { req_id, .. }
            | TelemetryEvent::RepairCompleted { req_id, .. }
            | TelemetryEvent::RepairFailed { req_id, .. } => req_id,
        }
    }
}

// =============================================================================
// Event Builders
// =============================================================================

impl TelemetryEvent {
    /// Create an ObjectStored event.
    pub fn object_stored(
        req_id: impl Into<String>,
        key: impl Into<String>,
        size: usize,
        placements: Vec<usize>,
        started_at: DateTime<Utc>,
        duration: Duration,
    ) -> Self {
        TelemetryEvent::ObjectStored {
            req_id: req_id.into(),
            key: key.into(),
            size: size as u64,
            placements,
            started_at,
            duration_us: duration.as_micros() as u64,
            timestamp: Utc::now(),
        }
    }

    /// Create an ObjectRetrieved event.
    #[allow(clippy::too_many_arguments)]
    pub fn object_retrieved(
        req_id: impl Into<String>,
        key: impl Into<String>,
        size: usize,
        started_at: DateTime<Utc>,
        receive: Duration,
        decode: Duration,
        duration: Duration,
        missing_shards: Vec<usize>,
        reconstructed: bool,
    ) -> Self {
        TelemetryEvent::ObjectRetrieved {
            req_id: req_id.into(),
            key: key.into(),
            size: size as u64,
            started_at,
            receive_us: receive.as_micros() as u64,
            decode_us: decode.as_micros() as u64,
            duration_us: duration.as_micros() as u64,
            reconstructed,
            missing_shards,
            timestamp: Utc::now(),
        }
    }

    /// Create an OperationFailed event.
    pub fn operation_failed(
        req_id: impl Into<String>,
        key: impl Into<String>,
        cmd: Command,
        error: &Error,
    ) -> Self {
        TelemetryEvent::OperationFailed {
            req_id: req_id.into(),
            key: key.into(),
            cmd,
            kind: error.kind().to_string(),
            reason: error.to_string(),
            timestamp: Utc::now(),
        }
    }

    /// Create a ShardCompleted event.
    pub fn shard_completed(
        req_id: impl Into<String>,
        key: impl Into<String>,
        cmd: Command,
        shard_index: usize,
        endpoint: impl Into<String>,
        bytes: usize,
        duration: Duration,
    ) -> Self {
        TelemetryEvent::ShardCompleted {
            req_id: req_id.into(),
            key: key.into(),
            cmd,
            shard_index,
            endpoint: endpoint.into(),
            bytes: bytes as u64,
            duration_us: duration.as_micros() as u64,
            timestamp: Utc::now(),
        }
    }

    /// Create a ShardFailed event.
    pub fn shard_failed(
        req_id: impl Into<String>,
        key: impl Into<String>,
        cmd: Command,
        shard_index: usize,
        endpoint: impl Into<String>,
        error: &Error,
    ) -> Self {
        TelemetryEvent::ShardFailed {
            req_id: req_id.into(),
            key: key.into(),
            cmd,
            shard_index,
            endpoint: endpoint.into(),
            kind: error.kind().to_string(),
            reason: error.to_string(),
            invalidated: error.invalidates_connection(),
            timestamp: Utc::now(),
        }
    }

    /// Create a ChunkAbandoned event.
    pub fn chunk_abandoned(
        req_id: impl Into<String>,
        key: impl Into<String>,
        shard_index: usize,
        endpoint: impl Into<String>,
    ) -> Self {
        TelemetryEvent::ChunkAbandoned {
            req_id: req_id.into(),
            key: key.into(),
            shard_index,
            endpoint: endpoint.into(),
            timestamp: Utc::now(),
        }
    }

    /// Create a CorruptionDetected event.
    pub fn corruption_detected(req_id: impl Into<String>, key: impl Into<String>) -> Self {
        TelemetryEvent::CorruptionDetected {
            req_id: req_id.into(),
            key: key.into(),
            timestamp: Utc::now(),
        }
    }

    /// Create a RepairCompleted event.
    pub fn repair_completed(
        req_id: impl Into<String>,
        origin_req_id: impl Into<String>,
        key: impl Into<String>,
        shards: Vec<usize>,
        duration: Duration,
    ) -> Self {
        TelemetryEvent::RepairCompleted {
            req_id: req_id.into(),
            origin_req_id: origin_req_id.into(),
            key: key.into(),
            shards,
            duration_ms: duration.as_millis() as u64,
            timestamp: Utc::now(),
        }
    }

    /// Create a RepairFailed event.
    pub fn repair_failed(
        req_id: impl Into<String>,
        origin_req_id: impl Into<String>,
        key: impl Into<String>,
        shards: Vec<usize>,
        reason: impl Into<String>,
    ) -> Self {
        TelemetryEvent::RepairFailed {
            req_id: req_id.into(),
            origin_req_id: origin_req_id.into(),
            key: key.into(),
            shards,
            reason: reason.into(),
            timestamp: Utc::now(),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
