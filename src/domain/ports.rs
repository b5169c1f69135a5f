//! Domain Ports (Port/Adapter Pattern)
//!
//! The client core depends only on the traits below. Adapters provide
//! concrete implementations.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        Client Core                           │
//! │  ┌─────────────────────────────────────────────────────┐    │
//! │  │                    Ports (Traits)                    │    │
//! │  │      Locator │ Connector │ EventPublisher            │    │
//! │  └─────────────────────────────────────────────────────┘    │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   Infrastructure Layer                       │
//! │  ┌─────────────────────────────────────────────────────┐    │
//! │  │                  Adapters (Impls)                    │    │
//! │  │ ConsistentHashRing │ TcpConnector │ InMemoryCluster  │    │
//! │  └─────────────────────────────────────────────────────┘    │
//! └─────────────────────────────────────────────────────────────┘
//! ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncWrite};

use super::events::TelemetryEvent;
use crate::error::Result;

// =============================================================================
// Value Objects
// =============================================================================

/// Logical operation kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Command {
    Set,
    Get,
    Repair,
}

impl Command {
    pub fn as_str(&self) -> &'static str {
        match self {
            Command::Set => "set",
            Command::Get => "get",
            Command::Repair => "repair",
        }
    }
}

impl std::fmt::Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Boxed read half of a slot connection
pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;

/// Boxed write half of a slot connection
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// A live bidirectional byte stream to one endpoint slot.
pub struct Transport {
    pub reader: BoxedReader,
    pub writer: BoxedWriter,
}

impl Transport {
    pub fn new<R, W>(reader: R, writer: W) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            reader: Box::new(reader),
            writer: Box::new(writer),
        }
    }
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport").finish_non_exhaustive()
    }
}

// =============================================================================
// Locator Port
// =============================================================================

/// Port for resolving the endpoint that serves a key.
///
/// Membership is maintained outside the client. Implementations must be
/// deterministic for fixed membership.
pub trait Locator: Send + Sync {
    /// Endpoint address for `key`, or `PlacementUnavailable`.
    fn locate(&self, key: &str) -> Result<String>;
}

// =============================================================================
// Connector Port
// =============================================================================

/// Port for opening slot connections.
///
/// The registry calls this lazily, once per `(addr, slot)` until the slot is
/// invalidated.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a connection for shard slot `slot` of endpoint `addr`.
    async fn connect(&self, addr: &str, slot: usize) -> Result<Transport>;
}

// =============================================================================
// Event Publisher Port
// =============================================================================

/// Port for publishing telemetry events.
///
/// Delivery is best effort; the client never fails an operation because a
/// publisher did.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish a telemetry event.
    async fn publish(&self, event: TelemetryEvent) -> Result<()>;

    /// Publish multiple events.
    async fn publish_all(&self, events: Vec<TelemetryEvent>) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_labels() {
        assert_eq!(Command::Set.to_string(), "set");
        assert_eq!(Command::Repair.as_str(), "repair");
        assert_eq!(serde_json::to_string(&Command::Get).unwrap(), "\"get\"");
    }

    #[test]
    fn test_transport_from_duplex() {
        let (client, _server) = tokio::io::duplex(64);
        let (r, w) = tokio::io::split(client);
        let transport = Transport::new(r, w);
        assert!(format!("{:?}", transport).starts_with("Transport"));
    }
}
