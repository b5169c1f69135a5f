//! Infrastructure Adapters
//!
//! Adapter implementations for the domain ports.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        Domain Layer                              │
//! │  ┌────────────────────────────────────────────────────────────┐ │
//! │  │        Ports: Locator │ Connector │ EventPublisher         │ │
//! │  └────────────────────────────────────────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────┘
//!                               │
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                     Adapters (This Module)                       │
//! │  ┌────────────────────────────────────────────────────────────┐ │
//! │  │ TcpConnector │ InMemoryCluster                              │ │
//! │  │ LoggingEventPublisher │ InMemoryEventCollector │ Composite  │ │
//! │  └────────────────────────────────────────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The `Locator` port is implemented by
//! [`ConsistentHashRing`](crate::placement::ConsistentHashRing).

mod event_publisher;
mod memory;
mod tcp;

pub use event_publisher::{CompositeEventPublisher, InMemoryEventCollector, LoggingEventPublisher};
pub use memory::{Fault, InMemoryCluster, StoredChunk};
pub use tcp::TcpConnector;
