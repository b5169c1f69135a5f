//! Connection Registry
//!
//! One long-lived connection per `(endpoint, shard slot)`, owned by the
//! client instance.
//!
//! # Slot discipline
//!
//! - Each slot sits behind its own async mutex. A shard worker holds the
//!   slot for its whole exchange, so two operations never interleave frames
//!   on the same connection.
//! - Slots connect lazily on first use and after invalidation.
//! - A worker that hits a timeout or stream end invalidates its slot; the
//!   *next* operation reconnects. The failing operation does not retry.

use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info};

use crate::domain::ports::{BoxedReader, BoxedWriter, Connector};
use crate::error::{Error, Result};
use crate::protocol::{RespReader, RespWriter};

/// An established slot connection
pub struct Connection {
    pub(crate) reader: RespReader<BoxedReader>,
    pub(crate) writer: RespWriter<BoxedWriter>,
    connected_at: Instant,
    exchanges: u64,
}

impl Connection {
    pub(crate) fn new(reader: BoxedReader, writer: BoxedWriter, max_bulk_len: usize) -> Self {
        Self {
            reader: RespReader::new(reader).with_max_bulk_len(max_bulk_len),
            writer: RespWriter::new(writer),
            connected_at: Instant::now(),
            exchanges: 0,
        }
    }

    /// Exchanges started on this connection
    pub fn exchanges(&self) -> u64 {
        self.exchanges
    }

    pub(crate) fn begin_exchange(&mut self) {
        self.exchanges += 1;
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("age", &self.connected_at.elapsed())
            .field("exchanges", &self.exchanges)
            .finish()
    }
}

type Slot = Arc<Mutex<Option<Connection>>>;

#[derive(Debug)]
struct EndpointSlots {
    slots: Vec<Slot>,
}

impl EndpointSlots {
    fn new(len: usize) -> Self {
        Self {
            slots: (0..len).map(|_| Arc::new(Mutex::new(None))).collect(),
        }
    }
}

/// Exclusive use of one validated slot
pub struct SlotGuard {
    guard: OwnedMutexGuard<Option<Connection>>,
    addr: String,
    slot: usize,
}

impl SlotGuard {
    /// The slot's connection, unless it was invalidated under this guard
    pub fn connection(&mut self) -> Result<&mut Connection> {
        let (addr, slot) = (&self.addr, self.slot);
        self.guard.as_mut().ok_or_else(|| Error::ConnectionInvalid {
            addr: addr.clone(),
            slot,
            reason: "slot invalidated".to_string(),
        })
    }

    /// Drop the connection so the next operation reconnects
    pub fn invalidate(&mut self) {
        if let Some(conn) = self.guard.take() {
            debug!(
                addr = %self.addr,
                slot = self.slot,
                exchanges = conn.exchanges(),
                "Slot invalidated"
            );
        }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub fn slot(&self) -> usize {
        self.slot
    }
}

impl std::fmt::Debug for SlotGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlotGuard")
            .field("addr", &self.addr)
            .field("slot", &self.slot)
            .field("connected", &self.guard.is_some())
            .finish()
    }
}

/// Registry of slot connections per endpoint
pub struct ConnectionRegistry {
    endpoints: DashMap<String, Arc<EndpointSlots>>,
    connector: Arc<dyn Connector>,
    slots_per_endpoint: usize,
    max_bulk_len: usize,
}

impl ConnectionRegistry {
    pub fn new(connector: Arc<dyn Connector>, slots_per_endpoint: usize, max_bulk_len: usize) -> Self {
        Self {
            endpoints: DashMap::new(),
            connector,
            slots_per_endpoint,
            max_bulk_len,
        }
    }

    /// Lock slot `slot` of `addr`, connecting it first if needed.
    ///
    /// Waits while another operation holds the slot.
    pub async fn validate(&self, addr: &str, slot: usize) -> Result<SlotGuard> {
        if slot >= self.slots_per_endpoint {
            return Err(Error::ConnectionInvalid {
                addr: addr.to_string(),
                slot,
                reason: format!("endpoints have {} slots", self.slots_per_endpoint),
            });
        }

        let cell = self.endpoint(addr).slots[slot].clone();
        let mut guard = cell.lock_owned().await;

        if guard.is_none() {
            let transport = self.connector.connect(addr, slot).await.map_err(|e| {
                Error::ConnectionInvalid {
                    addr: addr.to_string(),
                    slot,
                    reason: e.to_string(),
                }
            })?;
            *guard = Some(Connection::new(
                transport.reader,
                transport.writer,
                self.max_bulk_len,
            ));
            debug!(addr, slot, "Slot connected");
        }

        Ok(SlotGuard {
            guard,
            addr: addr.to_string(),
            slot,
        })
    }

    /// Forget every slot of `addr`, e.g. after the endpoint was recycled.
    ///
    /// Exchanges already holding a slot finish on their connection; it is
    /// closed when they release it.
    pub fn close_endpoint(&self, addr: &str) -> bool {
        let removed = self.endpoints.remove(addr).is_some();
        if removed {
            info!(addr, "Endpoint connections closed");
        }
        removed
    }

    /// Slots of `addr` currently holding a connection. Busy slots count as connected.
    pub fn connected_slots(&self, addr: &str) -> usize {
        let Some(endpoint) = self.endpoints.get(addr).map(|e| e.clone()) else {
            return 0;
        };

        endpoint
            .slots
            .iter()
            .filter(|slot| match slot.try_lock() {
                Ok(conn) => conn.is_some(),
                Err(_) => true,
            })
            .count()
    }

    /// Endpoints with registered slots
    pub fn endpoints(&self) -> Vec<String> {
        self.endpoints.iter().map(|e| e.key().clone()).collect()
    }

    pub fn slots_per_endpoint(&self) -> usize {
        self.slots_per_endpoint
    }

    fn endpoint(&self, addr: &str) -> Arc<EndpointSlots> {
        self.endpoints
            .entry(addr.to_string())
            .or_insert_with(|| Arc::new(EndpointSlots::new(self.slots_per_endpoint)))
            .clone()
    }
}

impl std::fmt::Debug for ConnectionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionRegistry")
            .field("endpoints", &self.endpoints.len())
            .field("slots_per_endpoint", &self.slots_per_endpoint)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::InMemoryCluster;
    use crate::protocol::DEFAULT_MAX_BULK_LEN;
    use assert_matches::assert_matches;
    use std::time::Duration;

    fn registry(cluster: &InMemoryCluster) -> ConnectionRegistry {
        ConnectionRegistry::new(Arc::new(cluster.clone()), 6, DEFAULT_MAX_BULK_LEN)
    }

    #[tokio::test]
    async fn test_lazy_connect_and_reuse() {
        let cluster = InMemoryCluster::new();
        let registry = registry(&cluster);
        assert_eq!(registry.connected_slots("mem-0"), 0);

        {
            let mut slot = registry.validate("mem-0", 2).await.unwrap();
            slot.connection().unwrap().begin_exchange();
        }
        {
            let mut slot = registry.validate("mem-0", 2).await.unwrap();
            assert_eq!(slot.connection().unwrap().exchanges(), 1);
        }

        assert_eq!(cluster.connects("mem-0", 2), 1);
        assert_eq!(registry.connected_slots("mem-0"), 1);
        assert_eq!(registry.endpoints(), vec!["mem-0".to_string()]);
    }

    #[tokio::test]
    async fn test_invalidate_forces_reconnect() {
        let cluster = InMemoryCluster::new();
        let registry = registry(&cluster);

        let mut slot = registry.validate("mem-0", 0).await.unwrap();
        slot.invalidate();
        assert_matches!(slot.connection(), Err(Error::ConnectionInvalid { .. }));
        drop(slot);

        registry.validate("mem-0", 0).await.unwrap();
        assert_eq!(cluster.connects("mem-0", 0), 2);
    }

    #[tokio::test]
    async fn test_connect_failure_is_connection_invalid() {
        let cluster = InMemoryCluster::new();
        cluster.refuse("mem-0", 1, 1);
        let registry = registry(&cluster);

        assert_matches!(
            registry.validate("mem-0", 1).await,
            Err(Error::ConnectionInvalid { slot: 1, .. })
        );
        // Nothing cached after a failed connect
        assert!(registry.validate("mem-0", 1).await.is_ok());
    }

    #[tokio::test]
    async fn test_slot_out_of_range() {
        let registry = registry(&InMemoryCluster::new());
        assert_matches!(
            registry.validate("mem-0", 6).await,
            Err(Error::ConnectionInvalid { slot: 6, .. })
        );
    }

    #[tokio::test]
    async fn test_slot_is_exclusive() {
        let cluster = InMemoryCluster::new();
        let registry = Arc::new(registry(&cluster));

        let held = registry.validate("mem-0", 3).await.unwrap();

        let waiter = {
            let registry = registry.clone();
            tokio::spawn(async move { registry.validate("mem-0", 3).await.map(|_| ()) })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(held);
        waiter.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_close_endpoint() {
        let cluster = InMemoryCluster::new();
        let registry = registry(&cluster);

        registry.validate("mem-0", 0).await.unwrap();
        assert!(registry.close_endpoint("mem-0"));
        assert!(!registry.close_endpoint("mem-0"));
        assert_eq!(registry.connected_slots("mem-0"), 0);

        registry.validate("mem-0", 0).await.unwrap();
        assert_eq!(cluster.connects("mem-0", 0), 2);
    }
}
