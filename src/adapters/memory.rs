//! Simulated Endpoints
//!
//! `InMemoryCluster` is a `Connector` whose connections lead to in-process
//! endpoint tasks speaking the shard wire protocol. Chunks are kept in
//! memory per `(address, key, index)`.
//!
//! Faults are injected per `(address, slot)` and consumed one per request,
//! in the order they were queued. Refusals are consumed per connect.
//!
//! This is a test double, not a storage server.

use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use tokio::io::{AsyncRead, AsyncWrite, DuplexStream};
use tracing::{debug, trace};

use crate::domain::ports::{Connector, Transport};
use crate::error::{Error, Result};
use crate::protocol::{
    RespReader, RespWriter, ABANDONED_CHUNK_ID, CMD_GET_CHUNK, CMD_SET_CHUNK, GET_CHUNK_FIELDS,
    SET_CHUNK_FIELDS,
};

/// In-flight bytes per simulated connection
const DUPLEX_CAPACITY: usize = 64 * 1024;

/// Misbehaviour applied to one request on one slot
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fault {
    /// Answer with an error frame instead of handling the request
    Error(String),
    /// Read the request, never answer, hang up once the client does
    Stall,
    /// Close the connection right after reading the request
    Drop,
    /// Answer with a request id that belongs to nobody
    Stale,
    /// Answer with the abandoned-chunk sentinel
    Abandon,
    /// Handle the request after a delay
    Delay(Duration),
}

/// A chunk held by a simulated endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredChunk {
    pub data: Bytes,
    /// Endpoint id the writer asked for
    pub endpoint_id: usize,
    /// Request id of the write that stored it
    pub req_id: String,
    /// Logical object size sent with the write
    pub size: usize,
}

type SlotKey = (String, usize);
type ChunkKey = (String, String, usize);

#[derive(Debug, Default)]
struct ClusterState {
    chunks: DashMap<ChunkKey, StoredChunk>,
    faults: DashMap<SlotKey, VecDeque<Fault>>,
    refusals: DashMap<SlotKey, usize>,
    connects: DashMap<SlotKey, usize>,
    requests: AtomicUsize,
}

impl ClusterState {
    fn next_fault(&self, addr: &str, slot: usize) -> Option<Fault> {
        self.faults
            .get_mut(&(addr.to_string(), slot))
            .and_then(|mut queue| queue.pop_front())
    }

    fn take_refusal(&self, key: &SlotKey) -> bool {
        match self.refusals.get_mut(key) {
            Some(mut left) if *left > 0 => {
                *left -= 1;
                true
            }
            _ => false,
        }
    }
}

/// In-process endpoints reachable through the `Connector` port
#[derive(Debug, Clone, Default)]
pub struct InMemoryCluster {
    state: Arc<ClusterState>,
}

impl InMemoryCluster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `times` copies of `fault` for requests on `(addr, slot)`
    pub fn inject(&self, addr: &str, slot: usize, fault: Fault, times: usize) {
        let mut queue = self
            .state
            .faults
            .entry((addr.to_string(), slot))
            .or_default();
        queue.extend(std::iter::repeat(fault).take(times));
    }

    /// Refuse the next `times` connects to `(addr, slot)`
    pub fn refuse(&self, addr: &str, slot: usize, times: usize) {
        *self
            .state
            .refusals
            .entry((addr.to_string(), slot))
            .or_default() += times;
    }

    /// Drop every queued fault and refusal
    pub fn clear_faults(&self) {
        self.state.faults.clear();
        self.state.refusals.clear();
    }

    /// Faults still queued for `(addr, slot)`
    pub fn pending_faults(&self, addr: &str, slot: usize) -> usize {
        self.state
            .faults
            .get(&(addr.to_string(), slot))
            .map(|q| q.len())
            .unwrap_or(0)
    }

    pub fn chunk(&self, addr: &str, key: &str, index: usize) -> Option<StoredChunk> {
        self.state
            .chunks
            .get(&(addr.to_string(), key.to_string(), index))
            .map(|c| c.clone())
    }

    /// Forget one stored chunk, as if the endpoint lost it
    pub fn remove_chunk(&self, addr: &str, key: &str, index: usize) -> bool {
        self.state
            .chunks
            .remove(&(addr.to_string(), key.to_string(), index))
            .is_some()
    }

    pub fn chunk_count(&self) -> usize {
        self.state.chunks.len()
    }

    /// Connections opened so far for `(addr, slot)`
    pub fn connects(&self, addr: &str, slot: usize) -> usize {
        self.state
            .connects
            .get(&(addr.to_string(), slot))
            .map(|n| *n)
            .unwrap_or(0)
    }

    /// Requests received across all endpoints
    pub fn requests(&self) -> usize {
        self.state.requests.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Connector for InMemoryCluster {
    async fn connect(&self, addr: &str, slot: usize) -> Result<Transport> {
        let key = (addr.to_string(), slot);
        if self.state.take_refusal(&key) {
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                format!("{} refused slot {}", addr, slot),
            )));
        }
        *self.state.connects.entry(key).or_default() += 1;

        let (client, server) = tokio::io::duplex(DUPLEX_CAPACITY);
        tokio::spawn(serve(self.state.clone(), addr.to_string(), slot, server));

        let (reader, writer) = tokio::io::split(client);
        Ok(Transport::new(reader, writer))
    }
}

// =============================================================================
// Endpoint Side
// =============================================================================

enum Reply {
    Chunk {
        req_id: String,
        chunk_id: String,
        value: Option<Bytes>,
    },
    Error(String),
}

async fn serve(state: Arc<ClusterState>, addr: String, slot: usize, stream: DuplexStream) {
    let (r, w) = tokio::io::split(stream);
    let mut reader = RespReader::new(r);
    let mut writer = RespWriter::new(w);

    loop {
        let request = match read_request(&mut reader).await {
            Ok(fields) => fields,
            Err(Error::ConnectionClosed) => break,
            Err(e) => {
                debug!(addr = %addr, slot, error = %e, "Simulated endpoint dropping connection");
                break;
            }
        };
        state.requests.fetch_add(1, Ordering::Relaxed);

        let fault = state.next_fault(&addr, slot);
        trace!(addr = %addr, slot, fault = ?fault, "Simulated request");

        let reply = match fault {
            Some(Fault::Stall) => {
                // Any further frame or a hang-up ends the stall
                let _ = reader.peek_type().await;
                break;
            }
            Some(Fault::Drop) => break,
            Some(Fault::Error(msg)) => Reply::Error(msg),
            Some(Fault::Delay(delay)) => {
                tokio::time::sleep(delay).await;
                handle(&state, &addr, &request)
            }
            Some(Fault::Stale) => match handle(&state, &addr, &request) {
                Reply::Chunk {
                    req_id,
                    chunk_id,
                    value,
                } => Reply::Chunk {
                    req_id: format!("stale-{}", req_id),
                    chunk_id,
                    value,
                },
                err => err,
            },
            Some(Fault::Abandon) => match handle(&state, &addr, &request) {
                Reply::Chunk { req_id, .. } => Reply::Chunk {
                    req_id,
                    chunk_id: ABANDONED_CHUNK_ID.to_string(),
                    value: None,
                },
                err => err,
            },
            None => handle(&state, &addr, &request),
        };

        if write_reply(&mut writer, reply).await.is_err() {
            break;
        }
    }
}

async fn read_request<R: AsyncRead + Unpin>(reader: &mut RespReader<R>) -> Result<Vec<Bytes>> {
    let len = reader.read_array_header().await?;
    let mut fields = Vec::with_capacity(len + 1);
    for _ in 0..len {
        fields.push(reader.read_bulk().await?);
    }

    // The SET payload trails the array
    if fields.first().is_some_and(|tag| &tag[..] == CMD_SET_CHUNK.as_bytes()) {
        fields.push(reader.read_bulk().await?);
    }
    Ok(fields)
}

async fn write_reply<W: AsyncWrite + Unpin>(writer: &mut RespWriter<W>, reply: Reply) -> Result<()> {
    match reply {
        Reply::Error(msg) => writer.write_error(&msg).await?,
        Reply::Chunk {
            req_id,
            chunk_id,
            value,
        } => {
            writer.write_bulk_string(&req_id).await?;
            writer.write_bulk_string(&chunk_id).await?;
            if let Some(value) = value {
                writer.write_bulk(&value).await?;
            }
        }
    }
    writer.flush().await
}

fn handle(state: &ClusterState, addr: &str, fields: &[Bytes]) -> Reply {
    let result = match fields.first().map(|tag| &tag[..]) {
        Some(tag) if tag == CMD_SET_CHUNK.as_bytes() => handle_set(state, addr, fields),
        Some(tag) if tag == CMD_GET_CHUNK.as_bytes() => handle_get(state, addr, fields),
        Some(tag) => Err(format!(
            "ERR unknown command '{}'",
            String::from_utf8_lossy(tag)
        )),
        None => Err("ERR empty request".to_string()),
    };
    result.unwrap_or_else(Reply::Error)
}

fn handle_set(state: &ClusterState, addr: &str, fields: &[Bytes]) -> std::result::Result<Reply, String> {
    if fields.len() != SET_CHUNK_FIELDS + 1 {
        return Err(format!("ERR set chunk takes {} fields", SET_CHUNK_FIELDS));
    }

    let key = text(fields, 1)?;
    let req_id = text(fields, 2)?;
    let size = number(fields, 3)?;
    let index = number(fields, 4)?;
    let endpoint_id = number(fields, 7)?;

    state.chunks.insert(
        (addr.to_string(), key, index),
        StoredChunk {
            data: fields[SET_CHUNK_FIELDS].clone(),
            endpoint_id,
            req_id: req_id.clone(),
            size,
        },
    );

    Ok(Reply::Chunk {
        req_id,
        chunk_id: index.to_string(),
        value: Some(Bytes::from(endpoint_id.to_string())),
    })
}

fn handle_get(state: &ClusterState, addr: &str, fields: &[Bytes]) -> std::result::Result<Reply, String> {
    if fields.len() != GET_CHUNK_FIELDS {
        return Err(format!("ERR get chunk takes {} fields", GET_CHUNK_FIELDS));
    }

    let key = text(fields, 1)?;
    let req_id = text(fields, 2)?;
    let index = number(fields, 3)?;

    let data = state
        .chunks
        .get(&(addr.to_string(), key.clone(), index))
        .map(|c| c.data.clone())
        .ok_or_else(|| format!("ERR chunk {} of {} not found", index, key))?;

    Ok(Reply::Chunk {
        req_id,
        chunk_id: index.to_string(),
        value: Some(data),
    })
}

fn text(fields: &[Bytes], i: usize) -> std::result::Result<String, String> {
    String::from_utf8(fields[i].to_vec()).map_err(|_| format!("ERR field {} is not UTF-8", i))
}

fn number(fields: &[Bytes], i: usize) -> std::result::Result<usize, String> {
    text(fields, i)?
        .parse()
        .map_err(|_| format!("ERR field {} is not a number", i))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::BoxedReader;
    use assert_matches::assert_matches;

    /// Send one request on a fresh connection and hand back the read half
    async fn exchange(
        cluster: &InMemoryCluster,
        slot: usize,
        fields: &[&str],
        payload: Option<&[u8]>,
    ) -> RespReader<BoxedReader> {
        let Transport { reader, writer } = cluster.connect("mem-0", slot).await.unwrap();
        let mut w = RespWriter::new(writer);
        w.write_command(fields, payload).await.unwrap();
        w.flush().await.unwrap();
        RespReader::new(reader)
    }

    #[tokio::test]
    async fn test_set_then_get() {
        let cluster = InMemoryCluster::new();

        let mut r = exchange(
            &cluster,
            2,
            &[CMD_SET_CHUNK, "obj", "r1", "5", "2", "4", "2", "9", "14"],
            Some(b"chunk"),
        )
        .await;
        assert_eq!(r.read_bulk_string().await.unwrap(), "r1");
        assert_eq!(r.read_bulk_string().await.unwrap(), "2");
        assert_eq!(r.read_bulk_string().await.unwrap(), "9");

        let stored = cluster.chunk("mem-0", "obj", 2).unwrap();
        assert_eq!(&stored.data[..], b"chunk");
        assert_eq!(stored.endpoint_id, 9);
        assert_eq!(stored.size, 5);

        let mut r = exchange(&cluster, 2, &[CMD_GET_CHUNK, "obj", "r2", "2"], None).await;
        assert_eq!(r.read_bulk_string().await.unwrap(), "r2");
        assert_eq!(r.read_bulk_string().await.unwrap(), "2");
        assert_eq!(&r.read_bulk().await.unwrap()[..], b"chunk");

        assert_eq!(cluster.connects("mem-0", 2), 2);
        assert_eq!(cluster.requests(), 2);
    }

    #[tokio::test]
    async fn test_missing_chunk_is_error_reply() {
        let cluster = InMemoryCluster::new();
        let mut r = exchange(&cluster, 0, &[CMD_GET_CHUNK, "nope", "r", "0"], None).await;
        assert!(r.read_error().await.unwrap().contains("not found"));
    }

    #[tokio::test]
    async fn test_faults_are_consumed_in_order() {
        let cluster = InMemoryCluster::new();
        cluster.inject("mem-0", 1, Fault::Abandon, 1);
        cluster.inject("mem-0", 1, Fault::Stale, 1);
        assert_eq!(cluster.pending_faults("mem-0", 1), 2);

        let set = [CMD_SET_CHUNK, "k", "r1", "1", "1", "4", "2", "0", "14"];

        let mut r = exchange(&cluster, 1, &set, Some(b"x")).await;
        assert_eq!(r.read_bulk_string().await.unwrap(), "r1");
        assert_eq!(r.read_bulk_string().await.unwrap(), ABANDONED_CHUNK_ID);

        let mut r = exchange(&cluster, 1, &set, Some(b"x")).await;
        assert_eq!(r.read_bulk_string().await.unwrap(), "stale-r1");

        assert_eq!(cluster.pending_faults("mem-0", 1), 0);
    }

    #[tokio::test]
    async fn test_drop_closes_connection() {
        let cluster = InMemoryCluster::new();
        cluster.inject("mem-0", 0, Fault::Drop, 1);

        let mut r = exchange(&cluster, 0, &[CMD_GET_CHUNK, "k", "r", "0"], None).await;
        assert_matches!(r.peek_type().await, Err(Error::ConnectionClosed));
    }

    #[tokio::test]
    async fn test_refused_connect() {
        let cluster = InMemoryCluster::new();
        cluster.refuse("mem-0", 3, 1);

        assert_matches!(cluster.connect("mem-0", 3).await, Err(Error::Io(_)));
        assert!(cluster.connect("mem-0", 3).await.is_ok());
        assert_eq!(cluster.connects("mem-0", 3), 1);
    }

    #[tokio::test]
    async fn test_remove_chunk() {
        let cluster = InMemoryCluster::new();
        let mut r = exchange(
            &cluster,
            0,
            &[CMD_SET_CHUNK, "k", "r", "1", "0", "4", "2", "0", "14"],
            Some(b"x"),
        )
        .await;
        r.read_bulk_string().await.unwrap();

        assert_eq!(cluster.chunk_count(), 1);
        assert!(cluster.remove_chunk("mem-0", "k", 0));
        assert!(!cluster.remove_chunk("mem-0", "k", 0));
        assert_eq!(cluster.chunk_count(), 0);
    }
}
