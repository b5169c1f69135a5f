//! ecstore - Erasure-Coded Shard Distribution Client
//!
//! Stores objects on key-value endpoints as `data + parity` Reed-Solomon
//! shards. Each shard index travels over its own long-lived connection, and
//! reads survive the loss of up to `parity` shards, which are then rewritten
//! in the background.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                          EcClient                                │
//! │   placement ─► encode ─► N shard exchanges ─► aggregate/decode   │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  Ports: Locator │ Connector │ EventPublisher                     │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  Adapters: ConsistentHashRing │ TcpConnector │ InMemoryCluster   │
//! │            LoggingEventPublisher │ InMemoryEventCollector        │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```ignore
//! let ring = ConsistentHashRing::with_members(DEFAULT_VIRTUAL_NODES, ["10.0.0.7:6378"]);
//! let client = EcClient::builder(ClientConfig::new(4, 2))
//!     .locator(Arc::new(ring))
//!     .build()?;
//!
//! client.set("obj1", &value, &OperationOptions::default()).await?;
//! let reply = client.get("obj1", value.len(), &OperationOptions::default()).await?;
//! ```
//!
//! # Modules
//!
//! - [`adapters`] - Port implementations (TCP, simulated endpoints, publishers)
//! - [`client`] - Connection registry, shard driver, result aggregation, orchestration
//! - [`config`] - Client configuration
//! - [`domain`] - Ports and telemetry events
//! - [`ec`] - Erasure coding
//! - [`error`] - Error types
//! - [`metrics`] - Prometheus metrics
//! - [`placement`] - Consistent-hash ring and shard placement
//! - [`protocol`] - Wire framing

pub mod adapters;
pub mod client;
pub mod config;
pub mod domain;
pub mod ec;
pub mod error;
pub mod metrics;
pub mod placement;
pub mod protocol;

// Re-export commonly used types
pub use client::{EcClient, GetReply, OperationOptions, RepairReport, SetReply};
pub use config::ClientConfig;
pub use ec::{ErasureCoder, JoinReader};
pub use error::{Error, OperationError, Result};
pub use placement::{ConsistentHashRing, DEFAULT_VIRTUAL_NODES};
