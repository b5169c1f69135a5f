//! Shard Distribution Client
//!
//! ```text
//!                    ┌──────────────────────┐
//!   set / get ──────▶│ EcClient             │  orchestrator.rs
//!                    └──────────┬───────────┘
//!                 one task per shard index (N)
//!                               ▼
//!                    ┌──────────────────────┐
//!                    │ ShardDriver          │  rpc.rs
//!                    └──────────┬───────────┘
//!                               ▼
//!                    ┌──────────────────────┐
//!                    │ ConnectionRegistry   │  connection.rs
//!                    │ (endpoint, slot) ──▶ │
//!                    │   connection         │
//!                    └──────────────────────┘
//!
//!   outcomes land in ShardResults (results.rs), one slot per index
//! ```

pub mod connection;
pub mod options;
pub mod orchestrator;
pub mod results;
pub mod rpc;

pub use connection::{Connection, ConnectionRegistry, SlotGuard};
pub use options::OperationOptions;
pub use orchestrator::{
    EcClient, EcClientBuilder, GetReply, OperationStats, RepairHandle, RepairReport, SetReply,
};
pub use results::{ShardOutcome, ShardResults};
pub use rpc::{GetChunk, Received, SetChunk, ShardDriver};
