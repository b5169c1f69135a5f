//! Erasure Coding Module
//!
//! Turns a byte payload into `data_shards + parity_shards` shard buffers and
//! back.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                     Erasure Coding Module                     │
//! ├──────────────────────────────────────────────────────────────┤
//! │                                                               │
//! │   SET:  split ──▶ encode ──▶ verify ──▶ N shard buffers        │
//! │                                                               │
//! │   GET:  N slots ──▶ verify ──(fail)──▶ reconstruct ──▶ verify  │
//! │                        │                                  │   │
//! │                        └──────────(ok)────────────────────┤   │
//! │                                                           ▼   │
//! │                                                 JoinReader    │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Components
//!
//! - **Coder** (`encoder.rs`): Reed-Solomon split/encode/verify/reconstruct
//!   using the `reed-solomon-erasure` crate. Reconstruction succeeds iff at
//!   least `data_shards` of the `N` shards are present and consistent.
//! - **Join** (`join.rs`): lazy, single-pass reader over the first `size`
//!   bytes of the data shards.
//!
//! # Usage
//!
//! ```rust
//! use ecstore::ec::ErasureCoder;
//! use std::io::Read;
//!
//! let coder = ErasureCoder::new(4, 2).unwrap();
//! let data = b"Hello, World!";
//! let shards = coder.encode_object(data).unwrap();
//!
//! let mut slots: Vec<Option<Vec<u8>>> = shards.into_iter().map(Some).collect();
//! slots[0] = None;
//! slots[3] = None;
//!
//! let status = coder.decode(&mut slots).unwrap();
//! assert!(status.reconstructed);
//!
//! let mut out = Vec::new();
//! coder.join(slots, data.len()).unwrap().read_to_end(&mut out).unwrap();
//! assert_eq!(out, data);
//! ```

pub mod encoder;
pub mod join;

#[cfg(test)]
mod proptest;

pub use encoder::{DecodeStatus, ErasureCoder};
pub use join::JoinReader;
