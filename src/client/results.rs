//! Result Aggregator
//!
//! Fixed-size outcome table for the `N` shard workers of one operation.
//!
//! # Invariant
//!
//! Slot `i` is written by the worker that owns shard index `i`, at most once
//! per operation. Slots are `OnceLock`s, so a second write is rejected rather
//! than racing. The only datum written by several workers is the failure
//! tally (an atomic counter plus the first error message under a mutex).
//! Readers (`ret`, `error`, the index partitions) are meant to run after all
//! workers have joined.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::OnceLock;

use bytes::Bytes;
use parking_lot::Mutex;

use crate::error::Error;

/// What one shard exchange produced
#[derive(Debug)]
pub enum ShardOutcome {
    /// Value returned by the endpoint
    Chunk(Bytes),
    /// Exchange failed
    Failed(Error),
    /// Endpoint marked the response abandoned; neither success nor failure
    Abandoned,
}

/// Outcome table for one operation
#[derive(Debug)]
pub struct ShardResults {
    slots: Vec<OnceLock<ShardOutcome>>,
    failures: AtomicUsize,
    first_error: Mutex<Option<String>>,
}

impl ShardResults {
    /// Table with `len` empty slots
    pub fn new(len: usize) -> Self {
        Self {
            slots: (0..len).map(|_| OnceLock::new()).collect(),
            failures: AtomicUsize::new(0),
            first_error: Mutex::new(None),
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Record a value for slot `i`. Returns false if the slot was already written.
    pub fn set(&self, i: usize, value: Bytes) -> bool {
        self.put(i, ShardOutcome::Chunk(value))
    }

    /// Record a failure for slot `i` and bump the shared failure tally.
    pub fn set_error(&self, i: usize, err: Error) -> bool {
        let message = err.to_string();
        if !self.put(i, ShardOutcome::Failed(err)) {
            return false;
        }

        self.failures.fetch_add(1, Ordering::AcqRel);
        let mut first = self.first_error.lock();
        if first.is_none() {
            *first = Some(format!("shard {}: {}", i, message));
        }
        true
    }

    /// Mark slot `i` abandoned.
    pub fn abandon(&self, i: usize) -> bool {
        self.put(i, ShardOutcome::Abandoned)
    }

    /// Whether any shard failed
    pub fn has_error(&self) -> bool {
        self.failures.load(Ordering::Acquire) > 0
    }

    pub fn failure_count(&self) -> usize {
        self.failures.load(Ordering::Acquire)
    }

    /// Message of the first recorded failure
    pub fn first_error(&self) -> Option<String> {
        self.first_error.lock().clone()
    }

    pub fn outcome(&self, i: usize) -> Option<&ShardOutcome> {
        self.slots.get(i).and_then(OnceLock::get)
    }

    /// Value of slot `i`, if it succeeded
    pub fn ret(&self, i: usize) -> Option<&Bytes> {
        match self.outcome(i) {
            Some(ShardOutcome::Chunk(value)) => Some(value),
            _ => None,
        }
    }

    /// Error of slot `i`, if it failed
    pub fn error(&self, i: usize) -> Option<&Error> {
        match self.outcome(i) {
            Some(ShardOutcome::Failed(err)) => Some(err),
            _ => None,
        }
    }

    /// Indices that produced a value
    pub fn present_indices(&self) -> Vec<usize> {
        self.indices(|o| matches!(o, Some(ShardOutcome::Chunk(_))))
    }

    /// Indices that failed. A slot no worker wrote counts as failed.
    pub fn failed_indices(&self) -> Vec<usize> {
        self.indices(|o| matches!(o, Some(ShardOutcome::Failed(_)) | None))
    }

    /// Indices answered with the abandoned sentinel
    pub fn abandoned_indices(&self) -> Vec<usize> {
        self.indices(|o| matches!(o, Some(ShardOutcome::Abandoned)))
    }

    /// Shard set for the decoder: values where present, `None` elsewhere
    pub fn shards(&self) -> Vec<Option<Vec<u8>>> {
        (0..self.len())
            .map(|i| self.ret(i).map(|value| value.to_vec()))
            .collect()
    }

    fn put(&self, i: usize, outcome: ShardOutcome) -> bool {
        match self.slots.get(i) {
            Some(slot) => slot.set(outcome).is_ok(),
            None => false,
        }
    }

    fn indices(&self, pred: impl Fn(Option<&ShardOutcome>) -> bool) -> Vec<usize> {
        (0..self.len()).filter(|&i| pred(self.outcome(i))).collect()
    }
}
