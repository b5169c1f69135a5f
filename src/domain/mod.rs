//! Domain Layer
//!
//! # Architecture
//!
//! - **Ports** (`ports.rs`) - Trait abstractions for placement, connections
//!   and telemetry delivery
//! - **Events** (`events.rs`) - Telemetry events emitted per operation and
//!   per shard
//!
//! # Usage
//!
//! ```ignore
//! use ecstore::domain::ports::{Connector, Locator};
//!
//! async fn open<L: Locator, C: Connector>(locator: &L, connector: &C, key: &str) -> Result<()> {
//!     let addr = locator.locate(key)?;
//!     let _transport = connector.connect(&addr, 0).await?;
//!     Ok(())
//! }
//! ```

pub mod events;
pub mod ports;

// Re-export commonly used types
pub use events::TelemetryEvent;
pub use ports::{BoxedReader, BoxedWriter, Command, Connector, EventPublisher, Locator, Transport};
