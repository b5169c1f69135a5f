//! Operation Orchestrator
//!
//! Public SET/GET entry points. Each operation fans out one task per shard
//! index, waits for all of them, then aggregates.
//!
//! # Write path
//!
//! ```text
//! placement ─► locate ─► split/encode/verify ─► N shard SETs ─► all stored?
//! ```
//!
//! A SET succeeds only when every shard was stored.
//!
//! # Read path
//!
//! ```text
//! locate ─► N shard GETs ─► verify ─► reconstruct? ─► re-verify ─► join
//!                                                         │
//!                                                         └─► repair failed indices (background)
//! ```
//!
//! Up to `parity_shards` failed shards are absorbed by reconstruction and
//! rewritten in the background. The GET never waits on the repair.

use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use tokio::sync::oneshot;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::connection::ConnectionRegistry;
use super::options::OperationOptions;
use super::results::ShardResults;
use super::rpc::{GetChunk, Received, SetChunk, ShardDriver};
use crate::adapters::{LoggingEventPublisher, TcpConnector};
use crate::config::ClientConfig;
use crate::domain::{Command, Connector, EventPublisher, Locator, TelemetryEvent};
use crate::ec::{ErasureCoder, JoinReader};
use crate::error::{Error, OperationError, OperationResult, Result};
use crate::metrics::ClientMetrics;
use crate::placement::{check_placement, random_placement};

/// Endpoint id sent with repair writes. An endpoint keeps the id a key was
/// first written with, so any value is accepted.
const REPAIR_ENDPOINT_ID: usize = 0;

// =============================================================================
// Replies
// =============================================================================

/// Timing and outcome of one operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationStats {
    /// Wall-clock start
    pub begin: DateTime<Utc>,
    /// Total duration
    pub duration: Duration,
    /// Until the last shard worker finished
    pub receive: Duration,
    /// Verify, reconstruct and join (GET only)
    pub decode: Duration,
    /// Whether missing shards had to be reconstructed
    pub reconstructed: bool,
    /// Indices that failed
    pub failed_shards: Vec<usize>,
    /// Indices answered with the abandoned sentinel
    pub abandoned_shards: Vec<usize>,
    /// Dry run: nothing was encoded or sent
    pub simulated: bool,
}

impl OperationStats {
    fn started(begin: DateTime<Utc>) -> Self {
        Self {
            begin,
            duration: Duration::ZERO,
            receive: Duration::ZERO,
            decode: Duration::ZERO,
            reconstructed: false,
            failed_shards: Vec::new(),
            abandoned_shards: Vec::new(),
            simulated: false,
        }
    }

    /// Indices that did not contribute a shard
    pub fn missing_shards(&self) -> Vec<usize> {
        let mut missing: Vec<usize> = self
            .failed_shards
            .iter()
            .chain(&self.abandoned_shards)
            .copied()
            .collect();
        missing.sort_unstable();
        missing
    }
}

/// Successful SET
#[derive(Debug)]
pub struct SetReply {
    pub req_id: String,
    /// Endpoint id holding each shard, as echoed by the endpoints
    pub placements: Vec<usize>,
    pub stats: OperationStats,
}

/// Successful GET
#[derive(Debug)]
pub struct GetReply {
    pub req_id: String,
    /// Object bytes. `None` for a dry run.
    pub reader: Option<JoinReader>,
    pub stats: OperationStats,
    /// Background rewrite of the failed shards, if any failed
    pub repair: Option<RepairHandle>,
}

/// Outcome of one background repair
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepairReport {
    pub req_id: String,
    /// GET that triggered the repair
    pub origin_req_id: String,
    pub key: String,
    /// Indices the repair rewrote
    pub shards: Vec<usize>,
    /// Indices confirmed stored
    pub repaired: Vec<usize>,
    /// Indices not confirmed stored
    pub failed: Vec<usize>,
    pub duration: Duration,
}

impl RepairReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty() && self.repaired.len() == self.shards.len()
    }
}

/// Handle on a background repair
#[derive(Debug)]
pub struct RepairHandle {
    req_id: String,
    shards: Vec<usize>,
    rx: oneshot::Receiver<RepairReport>,
}

impl RepairHandle {
    pub fn req_id(&self) -> &str {
        &self.req_id
    }

    /// Indices being rewritten
    pub fn shards(&self) -> &[usize] {
        &self.shards
    }

    /// Wait for the repair to finish
    pub async fn wait(self) -> Result<RepairReport> {
        self.rx
            .await
            .map_err(|_| Error::Internal(format!("repair {} ended without a report", self.req_id)))
    }
}

// =============================================================================
// Client
// =============================================================================

/// Erasure-coded shard client
///
/// Cheap to clone; clones share connections, metrics and repair tasks.
#[derive(Clone)]
pub struct EcClient {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    config: ClientConfig,
    coder: ErasureCoder,
    locator: Arc<dyn Locator>,
    registry: ConnectionRegistry,
    driver: ShardDriver,
    events: Arc<dyn EventPublisher>,
    metrics: ClientMetrics,
    repairs: TaskTracker,
}

/// What the shard workers of one operation do
struct ShardOp {
    cmd: Command,
    addr: String,
    key: String,
    req_id: String,
    job: ShardJob,
}

enum ShardJob {
    Set {
        /// One buffer per shard index
        shards: Vec<Bytes>,
        size: usize,
        /// Endpoint id per shard index
        placements: Vec<usize>,
        ring_size: usize,
    },
    Get,
}

/// Builder for [`EcClient`]
pub struct EcClientBuilder {
    config: ClientConfig,
    locator: Option<Arc<dyn Locator>>,
    connector: Option<Arc<dyn Connector>>,
    events: Option<Arc<dyn EventPublisher>>,
    metrics: Option<ClientMetrics>,
}

impl EcClientBuilder {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            locator: None,
            connector: None,
            events: None,
            metrics: None,
        }
    }

    /// Placement source. Required.
    pub fn locator(mut self, locator: Arc<dyn Locator>) -> Self {
        self.locator = Some(locator);
        self
    }

    /// Slot connection factory. Defaults to TCP.
    pub fn connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = Some(connector);
        self
    }

    /// Telemetry sink. Defaults to debug logging.
    pub fn event_publisher(mut self, events: Arc<dyn EventPublisher>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn metrics(mut self, metrics: ClientMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn build(self) -> Result<EcClient> {
        self.config.validate()?;

        let locator = self
            .locator
            .ok_or_else(|| Error::Config("a locator is required".to_string()))?;
        let connector = self
            .connector
            .unwrap_or_else(|| Arc::new(TcpConnector::new(self.config.connect_timeout())));
        let events = self
            .events
            .unwrap_or_else(|| Arc::new(LoggingEventPublisher::new()));
        let metrics = match self.metrics {
            Some(metrics) => metrics,
            None => ClientMetrics::new()?,
        };

        let coder = ErasureCoder::new(self.config.data_shards, self.config.parity_shards)?;
        let registry = ConnectionRegistry::new(
            connector,
            coder.total_shards(),
            self.config.max_bulk_len,
        );

        info!(
            data_shards = self.config.data_shards,
            parity_shards = self.config.parity_shards,
            cluster_size = self.config.cluster_size,
            "Shard client ready"
        );

        Ok(EcClient {
            inner: Arc::new(ClientInner {
                driver: ShardDriver::new(self.config.shard_timeout()),
                config: self.config,
                coder,
                locator,
                registry,
                events,
                metrics,
                repairs: TaskTracker::new(),
            }),
        })
    }
}

impl std::fmt::Debug for EcClientBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EcClientBuilder")
            .field("config", &self.config)
            .field("locator", &self.locator.is_some())
            .finish_non_exhaustive()
    }
}

impl EcClient {
    pub fn builder(config: ClientConfig) -> EcClientBuilder {
        EcClientBuilder::new(config)
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    pub fn metrics(&self) -> &ClientMetrics {
        &self.inner.metrics
    }

    /// Slot connections, e.g. to drop a recycled endpoint
    pub fn registry(&self) -> &ConnectionRegistry {
        &self.inner.registry
    }

    /// Repairs still running
    pub fn pending_repairs(&self) -> usize {
        self.inner.repairs.len()
    }

    /// Store `value` under `key`.
    ///
    /// Fails unless every shard is stored. With `opts.simulate` only the
    /// shard placement is drawn.
    #[instrument(skip(self, value, opts), fields(size = value.len()))]
    pub async fn set(
        &self,
        key: &str,
        value: &[u8],
        opts: &OperationOptions,
    ) -> OperationResult<SetReply> {
        let req_id = new_req_id();
        let begin = Utc::now();
        let start = Instant::now();

        match self.inner.set(&req_id, key, value, opts, begin, start).await {
            Ok(reply) => Ok(reply),
            Err(e) => Err(self.inner.fail(Command::Set, &req_id, key, e, start).await),
        }
    }

    /// Read the first `size` bytes of the object under `key`.
    ///
    /// Failed shards are reconstructed and rewritten in the background.
    #[instrument(skip(self, opts))]
    pub async fn get(
        &self,
        key: &str,
        size: usize,
        opts: &OperationOptions,
    ) -> OperationResult<GetReply> {
        let req_id = new_req_id();
        let begin = Utc::now();
        let start = Instant::now();

        match self.inner.get(&req_id, key, size, opts, begin, start).await {
            Ok(reply) => Ok(reply),
            Err(e) => Err(self.inner.fail(Command::Get, &req_id, key, e, start).await),
        }
    }

    /// Wait for the running repairs.
    ///
    /// GETs issued afterwards still reconstruct, but schedule no repair.
    pub async fn shutdown(&self) {
        self.inner.repairs.close();
        let pending = self.inner.repairs.len();
        if pending > 0 {
            info!(pending, "Waiting for repairs");
        }
        self.inner.repairs.wait().await;
    }
}

impl std::fmt::Debug for EcClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EcClient")
            .field("config", &self.inner.config)
            .field("registry", &self.inner.registry)
            .field("pending_repairs", &self.inner.repairs.len())
            .finish()
    }
}

impl ClientInner {
    async fn set(
        self: &Arc<Self>,
        req_id: &str,
        key: &str,
        value: &[u8],
        opts: &OperationOptions,
        begin: DateTime<Utc>,
        start: Instant,
    ) -> Result<SetReply> {
        let (placements, ring_size) = self.placements(opts)?;
        let mut stats = OperationStats::started(begin);

        if opts.simulate {
            stats.simulated = true;
            stats.duration = start.elapsed();
            debug!(req_id, key, ?placements, "Simulated SET placement");
            return Ok(SetReply {
                req_id: req_id.to_string(),
                placements,
                stats,
            });
        }

        let addr = self.locator.locate(key)?;
        let shards = self
            .coder
            .encode_object(value)?
            .into_iter()
            .map(Bytes::from)
            .collect();

        let op = Arc::new(ShardOp {
            cmd: Command::Set,
            addr,
            key: key.to_string(),
            req_id: req_id.to_string(),
            job: ShardJob::Set {
                shards,
                size: value.len(),
                placements: placements.clone(),
                ring_size,
            },
        });
        let results = self.fan_out(&op, &self.all_indices()).await;

        stats.receive = start.elapsed();
        stats.failed_shards = results.failed_indices();
        stats.abandoned_shards = results.abandoned_indices();

        if !stats.failed_shards.is_empty() {
            return Err(Error::IncompleteWrite {
                failed: stats.failed_shards.len(),
                total: results.len(),
                first: results
                    .first_error()
                    .unwrap_or_else(|| "shard worker aborted".to_string()),
            });
        }

        let placements = echoed_placements(&results, &placements);
        stats.duration = start.elapsed();

        self.metrics
            .record_operation(Command::Set, true, stats.duration);
        self.publish(TelemetryEvent::object_stored(
            req_id,
            key,
            value.len(),
            placements.clone(),
            begin,
            stats.duration,
        ))
        .await;
        info!(
            req_id,
            key,
            addr = %op.addr,
            size = value.len(),
            duration_ms = stats.duration.as_millis() as u64,
            "Object stored"
        );

        Ok(SetReply {
            req_id: req_id.to_string(),
            placements,
            stats,
        })
    }

    async fn get(
        self: &Arc<Self>,
        req_id: &str,
        key: &str,
        size: usize,
        opts: &OperationOptions,
        begin: DateTime<Utc>,
        start: Instant,
    ) -> Result<GetReply> {
        let mut stats = OperationStats::started(begin);

        if opts.simulate {
            stats.simulated = true;
            stats.duration = start.elapsed();
            debug!(req_id, key, "Simulated GET");
            return Ok(GetReply {
                req_id: req_id.to_string(),
                reader: None,
                stats,
                repair: None,
            });
        }

        let addr = self.locator.locate(key)?;
        let op = Arc::new(ShardOp {
            cmd: Command::Get,
            addr,
            key: key.to_string(),
            req_id: req_id.to_string(),
            job: ShardJob::Get,
        });
        let results = self.fan_out(&op, &self.all_indices()).await;

        stats.receive = start.elapsed();
        stats.failed_shards = results.failed_indices();
        stats.abandoned_shards = results.abandoned_indices();

        let decode_start = Instant::now();
        let mut shards = results.shards();
        let status = match self.coder.decode(&mut shards) {
            Ok(status) => status,
            Err(e) => {
                if matches!(e, Error::Unrecoverable(_)) {
                    self.metrics.record_corruption();
                    self.publish(TelemetryEvent::corruption_detected(req_id, key))
                        .await;
                }
                return Err(e);
            }
        };
        if status.reconstructed {
            self.metrics.record_reconstruction();
        }

        // Copy out the rebuilt shards before join takes ownership
        let repair_payload = if stats.failed_shards.is_empty() {
            None
        } else {
            Some(
                shards
                    .iter()
                    .enumerate()
                    .map(|(i, shard)| match shard {
                        Some(s) if stats.failed_shards.contains(&i) => Bytes::copy_from_slice(s),
                        _ => Bytes::new(),
                    })
                    .collect::<Vec<_>>(),
            )
        };

        let reader = self.coder.join(shards, size)?;
        stats.decode = decode_start.elapsed();
        stats.reconstructed = status.reconstructed;

        let repair = match repair_payload {
            Some(_) if self.repairs.is_closed() => {
                warn!(req_id, key, shards = ?stats.failed_shards, "Client shut down, repair skipped");
                None
            }
            Some(payload) => Some(self.spawn_repair(&op, size, payload, stats.failed_shards.clone())),
            None => None,
        };

        stats.duration = start.elapsed();
        self.metrics
            .record_operation(Command::Get, true, stats.duration);
        self.publish(TelemetryEvent::object_retrieved(
            req_id,
            key,
            size,
            begin,
            stats.receive,
            stats.decode,
            stats.duration,
            stats.missing_shards(),
            stats.reconstructed,
        ))
        .await;
        info!(
            req_id,
            key,
            addr = %op.addr,
            size,
            reconstructed = stats.reconstructed,
            duration_ms = stats.duration.as_millis() as u64,
            "Object retrieved"
        );

        Ok(GetReply {
            req_id: req_id.to_string(),
            reader: Some(reader),
            stats,
            repair,
        })
    }

    /// Run one worker per index in `indices` and wait for all of them
    async fn fan_out(self: &Arc<Self>, op: &Arc<ShardOp>, indices: &[usize]) -> Arc<ShardResults> {
        let results = Arc::new(ShardResults::new(self.coder.total_shards()));

        let workers = indices.iter().map(|&i| {
            let inner = Arc::clone(self);
            let op = Arc::clone(op);
            let results = Arc::clone(&results);
            tokio::spawn(async move { inner.run_shard(&op, i, &results).await })
        });

        for joined in join_all(workers).await {
            if let Err(e) = joined {
                warn!(req_id = %op.req_id, error = %e, "Shard worker aborted");
            }
        }

        results
    }

    async fn run_shard(&self, op: &ShardOp, i: usize, results: &ShardResults) {
        let start = Instant::now();
        let received = match self.registry.validate(&op.addr, i).await {
            Ok(mut slot) => match &op.job {
                ShardJob::Set {
                    shards,
                    size,
                    placements,
                    ring_size,
                } => {
                    let req = SetChunk {
                        key: &op.key,
                        req_id: &op.req_id,
                        size: *size,
                        index: i,
                        data_shards: self.coder.data_shards(),
                        parity_shards: self.coder.parity_shards(),
                        endpoint_id: placements[i],
                        ring_size: *ring_size,
                        payload: &shards[i],
                    };
                    self.driver.set(&mut slot, &req).await
                }
                ShardJob::Get => {
                    let req = GetChunk {
                        key: &op.key,
                        req_id: &op.req_id,
                        index: i,
                    };
                    self.driver.get(&mut slot, &req).await
                }
            },
            Err(e) => Err(e),
        };

        let elapsed = start.elapsed();
        self.metrics.record_shard(op.cmd, received.is_ok(), elapsed);

        match received {
            Ok(Received::Value(value)) => {
                debug!(req_id = %op.req_id, cmd = %op.cmd, index = i, len = value.len(), "Shard done");
                self.publish(TelemetryEvent::shard_completed(
                    &op.req_id,
                    &op.key,
                    op.cmd,
                    i,
                    &op.addr,
                    value.len(),
                    elapsed,
                ))
                .await;
                results.set(i, value);
            }
            Ok(Received::Abandoned) => {
                debug!(req_id = %op.req_id, cmd = %op.cmd, index = i, "Shard response abandoned");
                self.metrics.record_abandoned();
                self.publish(TelemetryEvent::chunk_abandoned(
                    &op.req_id, &op.key, i, &op.addr,
                ))
                .await;
                results.abandon(i);
            }
            Err(e) => {
                warn!(
                    req_id = %op.req_id,
                    cmd = %op.cmd,
                    index = i,
                    addr = %op.addr,
                    invalidated = e.invalidates_connection(),
                    error = %e,
                    "Shard failed"
                );
                self.metrics.record_shard_failure(op.cmd, &e);
                self.publish(TelemetryEvent::shard_failed(
                    &op.req_id, &op.key, op.cmd, i, &op.addr, &e,
                ))
                .await;
                results.set_error(i, e);
            }
        }
    }

    fn spawn_repair(
        self: &Arc<Self>,
        origin: &ShardOp,
        size: usize,
        payload: Vec<Bytes>,
        targets: Vec<usize>,
    ) -> RepairHandle {
        let req_id = new_req_id();
        let op = Arc::new(ShardOp {
            cmd: Command::Repair,
            addr: origin.addr.clone(),
            key: origin.key.clone(),
            req_id: req_id.clone(),
            job: ShardJob::Set {
                shards: payload,
                size,
                placements: vec![REPAIR_ENDPOINT_ID; self.coder.total_shards()],
                ring_size: self.config.cluster_size,
            },
        });

        debug!(req_id = %req_id, origin_req_id = %origin.req_id, shards = ?targets, "Repair scheduled");

        let (tx, rx) = oneshot::channel();
        let inner = Arc::clone(self);
        let origin_req_id = origin.req_id.clone();
        let shards = targets.clone();
        self.repairs.spawn(async move {
            let report = inner.repair(&op, origin_req_id, targets).await;
            // Nobody may be waiting
            let _ = tx.send(report);
        });

        RepairHandle { req_id, shards, rx }
    }

    async fn repair(
        self: &Arc<Self>,
        op: &Arc<ShardOp>,
        origin_req_id: String,
        targets: Vec<usize>,
    ) -> RepairReport {
        let start = Instant::now();
        let results = self.fan_out(op, &targets).await;

        let (repaired, failed): (Vec<usize>, Vec<usize>) =
            targets.iter().partition(|&&i| results.ret(i).is_some());
        let report = RepairReport {
            req_id: op.req_id.clone(),
            origin_req_id,
            key: op.key.clone(),
            shards: targets,
            repaired,
            failed,
            duration: start.elapsed(),
        };

        self.metrics.record_repair(report.is_success());
        if report.is_success() {
            info!(
                req_id = %report.req_id,
                origin_req_id = %report.origin_req_id,
                shards = ?report.shards,
                "Repair completed"
            );
            self.publish(TelemetryEvent::repair_completed(
                &report.req_id,
                &report.origin_req_id,
                &report.key,
                report.shards.clone(),
                report.duration,
            ))
            .await;
        } else {
            let reason = results
                .first_error()
                .unwrap_or_else(|| format!("shards {:?} not confirmed", report.failed));
            warn!(
                req_id = %report.req_id,
                origin_req_id = %report.origin_req_id,
                failed = ?report.failed,
                reason = %reason,
                "Repair failed"
            );
            self.publish(TelemetryEvent::repair_failed(
                &report.req_id,
                &report.origin_req_id,
                &report.key,
                report.shards.clone(),
                reason,
            ))
            .await;
        }

        report
    }

    async fn fail(
        &self,
        cmd: Command,
        req_id: &str,
        key: &str,
        error: Error,
        start: Instant,
    ) -> OperationError {
        self.metrics.record_operation(cmd, false, start.elapsed());
        warn!(req_id, key, cmd = %cmd, kind = error.kind(), error = %error, "Operation failed");
        self.publish(TelemetryEvent::operation_failed(req_id, key, cmd, &error))
            .await;
        OperationError::new(req_id, error)
    }

    /// Endpoint id per shard, and the number of ids they were drawn from
    fn placements(&self, opts: &OperationOptions) -> Result<(Vec<usize>, usize)> {
        let cluster_size = opts.cluster_size.unwrap_or(self.config.cluster_size);
        let shards = self.coder.total_shards();

        let placements = match &opts.placement_override {
            Some(placement) => {
                check_placement(placement, cluster_size, shards)?;
                placement.clone()
            }
            None => random_placement(cluster_size, shards)?,
        };

        Ok((placements, cluster_size))
    }

    fn all_indices(&self) -> Vec<usize> {
        (0..self.coder.total_shards()).collect()
    }

    async fn publish(&self, event: TelemetryEvent) {
        if let Err(e) = self.events.publish(event).await {
            warn!(error = %e, "Failed to publish telemetry event");
        }
    }
}

/// Endpoint ids echoed in SET values, falling back to the requested id
fn echoed_placements(results: &ShardResults, requested: &[usize]) -> Vec<usize> {
    requested
        .iter()
        .enumerate()
        .map(|(i, &want)| {
            results
                .ret(i)
                .and_then(|value| std::str::from_utf8(value).ok())
                .and_then(|s| s.trim().parse().ok())
                .unwrap_or(want)
        })
        .collect()
}

fn new_req_id() -> String {
    Uuid::new_v4().to_string()
}
