//! Error types for the erasure-coded shard client

use std::time::Duration;

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Direction of a shard exchange that hit its deadline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoPhase {
    /// Request construction through flush
    Write,
    /// Response header through value payload
    Read,
    /// Establishing the slot connection
    Connect,
}

impl std::fmt::Display for IoPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IoPhase::Write => write!(f, "write"),
            IoPhase::Read => write!(f, "read"),
            IoPhase::Connect => write!(f, "connect"),
        }
    }
}

/// Errors that can occur in the shard distribution client
#[derive(Error, Debug)]
#[allow(clippy::enum_variant_names)]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration file parse error
    #[error("Failed to parse configuration: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    // =========================================================================
    // Placement Errors
    // =========================================================================
    /// The placement ring has no members
    #[error("No endpoint available for key: {key}")]
    PlacementUnavailable { key: String },

    // =========================================================================
    // Erasure Coding Errors
    // =========================================================================
    /// Split, encode or write-path verification failed
    #[error("EC encoding failed: {0}")]
    EncodingFailed(String),

    /// Invalid EC configuration
    #[error("Invalid EC configuration: {0}")]
    InvalidEcConfig(String),

    /// Insufficient shards for reconstruction
    #[error("Insufficient shards for reconstruction: have {available}, need {required}")]
    InsufficientShards { available: usize, required: usize },

    /// Reconstruction ran but the result failed verification
    #[error("Object is unrecoverable: {0}")]
    Unrecoverable(String),

    /// Requested object size exceeds what the data shards carry
    #[error("Requested {requested} bytes but shards carry only {available}")]
    SizeMismatch { requested: usize, available: usize },

    // =========================================================================
    // Connection / Wire Errors
    // =========================================================================
    /// The slot connection could not be (re-)established
    #[error("Connection {slot}@{addr} is invalid: {reason}")]
    ConnectionInvalid {
        addr: String,
        slot: usize,
        reason: String,
    },

    /// The remote closed the stream
    #[error("Connection closed by remote")]
    ConnectionClosed,

    /// A write or read deadline expired
    #[error("Shard {phase} timed out after {timeout:?}")]
    Timeout { phase: IoPhase, timeout: Duration },

    /// The echoed request id does not belong to this operation
    #[error("Unexpected response {actual}, want {expected}")]
    UnexpectedResponse { expected: String, actual: String },

    /// The endpoint answered with an error-typed response
    #[error("Endpoint error: {0}")]
    Remote(String),

    /// Malformed frame on the wire
    #[error("Protocol error: {0}")]
    Protocol(String),

    // =========================================================================
    // Operation Errors
    // =========================================================================
    /// At least one shard of a write was not stored
    #[error("{failed} of {total} shard writes failed, first: {first}")]
    IncompleteWrite {
        failed: usize,
        total: usize,
        first: String,
    },
}

impl Error {
    /// Whether this failure leaves the slot connection unusable.
    ///
    /// Timeouts, end-of-stream and malformed frames invalidate the slot so
    /// the next operation reconnects. After a malformed frame the rest of the
    /// response is still unread. Error replies and drained stale responses
    /// leave the connection in place.
    pub fn invalidates_connection(&self) -> bool {
        match self {
            Error::Timeout { .. } | Error::ConnectionClosed | Error::Protocol(_) => true,
            Error::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::UnexpectedEof
                    | std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::TimedOut
            ),
            _ => false,
        }
    }

    /// Whether this is a read-path failure that cannot be repaired by reconstruction
    pub fn is_unrecoverable(&self) -> bool {
        matches!(
            self,
            Error::InsufficientShards { .. } | Error::Unrecoverable(_)
        )
    }

    /// Short label used for metrics and telemetry
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Io(_) => "io",
            Error::Yaml(_) => "config",
            Error::Internal(_) => "internal",
            Error::Config(_) => "config",
            Error::PlacementUnavailable { .. } => "placement_unavailable",
            Error::EncodingFailed(_) => "encoding",
            Error::InvalidEcConfig(_) => "config",
            Error::InsufficientShards { .. } => "unrecoverable",
            Error::Unrecoverable(_) => "unrecoverable",
            Error::SizeMismatch { .. } => "size_mismatch",
            Error::ConnectionInvalid { .. } => "connection_invalid",
            Error::ConnectionClosed => "connection_closed",
            Error::Timeout { .. } => "timeout",
            Error::UnexpectedResponse { .. } => "unexpected_response",
            Error::Remote(_) => "remote",
            Error::Protocol(_) => "protocol",
            Error::IncompleteWrite { .. } => "incomplete_write",
        }
    }
}

/// Failure of a public SET/GET, tagged with its request id
#[derive(Error, Debug)]
#[error("Operation {req_id} failed: {error}")]
pub struct OperationError {
    /// Request id, for correlating telemetry
    pub req_id: String,
    /// Underlying cause
    #[source]
    pub error: Error,
}

impl OperationError {
    pub fn new(req_id: impl Into<String>, error: Error) -> Self {
        Self {
            req_id: req_id.into(),
            error,
        }
    }
}

/// Result of a public SET/GET
pub type OperationResult<T> = std::result::Result<T, OperationError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_and_eof_invalidate() {
        let timeout = Error::Timeout {
            phase: IoPhase::Read,
            timeout: Duration::from_millis(10),
        };
        assert!(timeout.invalidates_connection());
        assert!(Error::ConnectionClosed.invalidates_connection());

        let eof = Error::Io(std::io::Error::from(std::io::ErrorKind::UnexpectedEof));
        assert!(eof.invalidates_connection());
    }

    #[test]
    fn test_malformed_frame_invalidates() {
        assert!(Error::Protocol("bulk of 8 bytes exceeds limit 4".into()).invalidates_connection());
        assert_eq!(Error::Protocol("bad".into()).kind(), "protocol");
    }

    #[test]
    fn test_application_errors_keep_connection() {
        assert!(!Error::Remote("ERR chunk not found".into()).invalidates_connection());
        assert!(!Error::UnexpectedResponse {
            expected: "a".into(),
            actual: "b".into(),
        }
        .invalidates_connection());
    }

    #[test]
    fn test_unrecoverable_classification() {
        assert!(Error::InsufficientShards {
            available: 3,
            required: 4
        }
        .is_unrecoverable());
        assert!(Error::Unrecoverable("corrupted".into()).is_unrecoverable());
        assert!(!Error::EncodingFailed("empty".into()).is_unrecoverable());
    }

    #[test]
    fn test_operation_error_keeps_source() {
        use std::error::Error as _;

        let err = OperationError::new("req-7", Error::Unrecoverable("too many losses".into()));
        assert_eq!(
            err.to_string(),
            "Operation req-7 failed: Object is unrecoverable: too many losses"
        );
        assert!(err.source().is_some());
        assert!(err.error.is_unrecoverable());
    }

    #[test]
    fn test_timeout_display() {
        let err = Error::Timeout {
            phase: IoPhase::Write,
            timeout: Duration::from_millis(250),
        };
        assert_eq!(err.to_string(), "Shard write timed out after 250ms");
        assert_eq!(err.kind(), "timeout");
    }
}
