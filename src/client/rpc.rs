//! Shard RPC Driver
//!
//! Runs exactly one shard exchange (SET or GET) on a validated slot and
//! classifies how it ended.
//!
//! # Exchange
//!
//! 1. Write the request and flush, under the write deadline.
//! 2. Under the read deadline:
//!    - an error frame fails the shard with `Remote`;
//!    - a foreign `reqId` drains the rest of the response and fails the
//!      shard with `UnexpectedResponse`;
//!    - chunk id `-1` ends the response as `Abandoned`;
//!    - otherwise the value bulk is read into memory.
//!
//! Timeouts and end-of-stream invalidate the slot. Other failures leave the
//! connection in place for the next operation.

use std::future::Future;
use std::time::Duration;

use bytes::Bytes;
use tokio::io::AsyncRead;
use tracing::{debug, trace};

use super::connection::{Connection, SlotGuard};
use crate::error::{Error, IoPhase, Result};
use crate::protocol::{RespReader, RespType, ABANDONED_CHUNK_ID, CMD_GET_CHUNK, CMD_SET_CHUNK};

/// One shard SET request
#[derive(Debug, Clone)]
pub struct SetChunk<'a> {
    pub key: &'a str,
    pub req_id: &'a str,
    /// Logical size of the whole object
    pub size: usize,
    pub index: usize,
    pub data_shards: usize,
    pub parity_shards: usize,
    /// Endpoint identity that should hold this shard
    pub endpoint_id: usize,
    /// Number of endpoint identities placement drew from
    pub ring_size: usize,
    pub payload: &'a [u8],
}

impl SetChunk<'_> {
    fn fields(&self) -> [String; 8] {
        [
            self.key.to_string(),
            self.req_id.to_string(),
            self.size.to_string(),
            self.index.to_string(),
            self.data_shards.to_string(),
            self.parity_shards.to_string(),
            self.endpoint_id.to_string(),
            self.ring_size.to_string(),
        ]
    }
}

/// One shard GET request
#[derive(Debug, Clone, Copy)]
pub struct GetChunk<'a> {
    pub key: &'a str,
    pub req_id: &'a str,
    pub index: usize,
}

/// How a shard response ended, short of failure
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Received {
    /// The response value
    Value(Bytes),
    /// The endpoint no longer tracks the request
    Abandoned,
}

/// Executes shard exchanges under per-phase deadlines
#[derive(Debug, Clone, Copy)]
pub struct ShardDriver {
    timeout: Duration,
}

impl ShardDriver {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Store one shard. The value echoes the endpoint id that kept it.
    pub async fn set(&self, slot: &mut SlotGuard, req: &SetChunk<'_>) -> Result<Received> {
        let fields = req.fields();
        let mut command: Vec<&str> = Vec::with_capacity(fields.len() + 1);
        command.push(CMD_SET_CHUNK);
        command.extend(fields.iter().map(String::as_str));

        self.exchange(slot, &command, Some(req.payload), req.req_id, req.index)
            .await
    }

    /// Fetch one shard.
    pub async fn get(&self, slot: &mut SlotGuard, req: &GetChunk<'_>) -> Result<Received> {
        let index = req.index.to_string();
        let command = [CMD_GET_CHUNK, req.key, req.req_id, index.as_str()];

        self.exchange(slot, &command, None, req.req_id, req.index)
            .await
    }

    async fn exchange(
        &self,
        slot: &mut SlotGuard,
        command: &[&str],
        payload: Option<&[u8]>,
        req_id: &str,
        index: usize,
    ) -> Result<Received> {
        let result = match slot.connection() {
            Ok(conn) => {
                self.exchange_on(conn, command, payload, req_id, index)
                    .await
            }
            Err(e) => Err(e),
        };

        if let Err(e) = &result {
            if e.invalidates_connection() {
                slot.invalidate();
            }
        }
        result
    }

    pub(crate) async fn exchange_on(
        &self,
        conn: &mut Connection,
        command: &[&str],
        payload: Option<&[u8]>,
        req_id: &str,
        index: usize,
    ) -> Result<Received> {
        conn.begin_exchange();

        let writer = &mut conn.writer;
        self.deadline(IoPhase::Write, async {
            writer.write_command(command, payload).await?;
            writer.flush().await
        })
        .await?;
        trace!(req_id, index, cmd = command.first().copied().unwrap_or_default(), "Request flushed");

        self.deadline(IoPhase::Read, read_response(&mut conn.reader, req_id, index))
            .await
    }

    async fn deadline<T>(&self, phase: IoPhase, fut: impl Future<Output = Result<T>>) -> Result<T> {
        tokio::time::timeout(self.timeout, fut)
            .await
            .map_err(|_| Error::Timeout {
                phase,
                timeout: self.timeout,
            })?
    }
}

/// Read one response to the request tagged `req_id`
pub(crate) async fn read_response<R: AsyncRead + Unpin>(
    reader: &mut RespReader<R>,
    req_id: &str,
    index: usize,
) -> Result<Received> {
    if reader.peek_type().await? == RespType::Error {
        return Err(Error::Remote(reader.read_error().await?));
    }

    let echoed = reader.read_bulk_string().await?;
    if echoed != req_id {
        // Drain the stale response so the next exchange starts on a frame boundary
        let chunk_id = reader.read_bulk_string().await?;
        if chunk_id != ABANDONED_CHUNK_ID {
            reader.skip_bulk().await?;
        }
        return Err(Error::UnexpectedResponse {
            expected: req_id.to_string(),
            actual: echoed,
        });
    }

    let chunk_id = reader.read_bulk_string().await?;
    if chunk_id == ABANDONED_CHUNK_ID {
        return Ok(Received::Abandoned);
    }
    if chunk_id != index.to_string() {
        debug!(req_id, index, chunk_id = %chunk_id, "Chunk id differs from shard index");
    }

    Ok(Received::Value(reader.read_bulk().await?))
}
