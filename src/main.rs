//! ecstore command line
//!
//! ```text
//! ecstore --endpoint 10.0.0.7:6378 set obj1 --file ./payload.bin
//! ecstore --endpoint 10.0.0.7:6378 get obj1 9000 --out ./copy.bin
//! ecstore simulate obj1 --rounds 5
//! ecstore --in-memory roundtrip obj1 9000 --fail 1,4
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use rand::RngCore;
use tokio::io::AsyncWriteExt;
use tracing::{info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use ecstore::adapters::{Fault, InMemoryCluster, LoggingEventPublisher, TcpConnector};
use ecstore::domain::Connector;
use ecstore::placement::ConsistentHashRing;
use ecstore::{ClientConfig, EcClient, OperationOptions};

/// Address used for the simulated endpoint when none is given
const IN_MEMORY_ENDPOINT: &str = "mem-0";

// =============================================================================
// CLI Arguments
// =============================================================================

/// Erasure-coded shard client
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Endpoint addresses forming the placement ring
    #[arg(long = "endpoint", env = "ECSTORE_ENDPOINTS", value_delimiter = ',')]
    endpoints: Vec<String>,

    /// YAML configuration file
    #[arg(long, env = "ECSTORE_CONFIG")]
    config: Option<PathBuf>,

    /// Data shards (overrides the configuration file)
    #[arg(long)]
    data_shards: Option<usize>,

    /// Parity shards (overrides the configuration file)
    #[arg(long)]
    parity_shards: Option<usize>,

    /// Endpoint identities for shard placement
    #[arg(long)]
    cluster_size: Option<usize>,

    /// Per-phase shard deadline in milliseconds
    #[arg(long, env = "ECSTORE_SHARD_TIMEOUT_MS")]
    shard_timeout_ms: Option<u64>,

    /// Use simulated in-process endpoints instead of TCP
    #[arg(long)]
    in_memory: bool,

    /// Print Prometheus metrics before exiting
    #[arg(long)]
    print_metrics: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,

    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Store an object
    Set {
        key: String,
        /// Read the value from a file
        #[arg(long, conflicts_with = "value")]
        file: Option<PathBuf>,
        /// Inline value
        #[arg(long)]
        value: Option<String>,
        /// Endpoint id per shard, instead of a random draw
        #[arg(long, value_delimiter = ',')]
        placement: Option<Vec<usize>>,
    },
    /// Fetch an object
    Get {
        key: String,
        /// Object size in bytes
        size: usize,
        /// Write the object to a file instead of stdout
        #[arg(long)]
        out: Option<PathBuf>,
        /// Wait for the background repair before exiting
        #[arg(long)]
        wait_repair: bool,
    },
    /// Draw shard placements without any I/O
    Simulate {
        key: String,
        #[arg(long, default_value = "1")]
        rounds: usize,
    },
    /// Store random bytes, fail some shards, read them back and repair
    Roundtrip {
        key: String,
        size: usize,
        /// Shard indices whose next GET exchange fails
        #[arg(long, value_delimiter = ',')]
        fail: Vec<usize>,
    },
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    init_logging(&args);

    let config = load_config(&args)?;
    info!(
        data_shards = config.data_shards,
        parity_shards = config.parity_shards,
        cluster_size = config.cluster_size,
        shard_timeout_ms = config.shard_timeout_ms,
        in_memory = args.in_memory,
        "Starting ecstore"
    );

    let mut endpoints = args.endpoints.clone();
    let cluster = InMemoryCluster::new();
    let connector: Arc<dyn Connector> = if args.in_memory {
        if endpoints.is_empty() {
            endpoints.push(IN_MEMORY_ENDPOINT.to_string());
        }
        Arc::new(cluster.clone())
    } else {
        Arc::new(TcpConnector::new(config.connect_timeout()))
    };

    let ring = Arc::new(ConsistentHashRing::with_members(
        config.virtual_nodes,
        endpoints,
    ));
    let client = EcClient::builder(config)
        .locator(ring.clone())
        .connector(connector)
        .event_publisher(Arc::new(LoggingEventPublisher::info_level()))
        .build()
        .context("failed to build client")?;

    let result = run(&args.command, &client, &ring, &cluster).await;

    client.shutdown().await;
    if args.print_metrics {
        println!("{}", client.metrics().encode_text()?);
    }

    result
}

async fn run(
    cmd: &Cmd,
    client: &EcClient,
    ring: &ConsistentHashRing,
    cluster: &InMemoryCluster,
) -> anyhow::Result<()> {
    match cmd {
        Cmd::Set {
            key,
            file,
            value,
            placement,
        } => {
            let data = match (file, value) {
                (Some(path), _) => tokio::fs::read(path)
                    .await
                    .with_context(|| format!("failed to read {}", path.display()))?,
                (None, Some(value)) => value.clone().into_bytes(),
                (None, None) => bail!("either --file or --value is required"),
            };

            let mut opts = OperationOptions::default();
            if let Some(placement) = placement {
                opts = opts.with_placement(placement.clone());
            }

            let reply = client.set(key, &data, &opts).await?;
            println!(
                "stored {} ({} bytes) req_id={} placements={:?}",
                key,
                data.len(),
                reply.req_id,
                reply.placements
            );
        }

        Cmd::Get {
            key,
            size,
            out,
            wait_repair,
        } => {
            let reply = client.get(key, *size, &OperationOptions::default()).await?;
            if let Some(mut reader) = reply.reader {
                match out {
                    Some(path) => {
                        let mut file = tokio::fs::File::create(path)
                            .await
                            .with_context(|| format!("failed to create {}", path.display()))?;
                        tokio::io::copy(&mut reader, &mut file).await?;
                        file.flush().await?;
                    }
                    None => {
                        let mut stdout = tokio::io::stdout();
                        tokio::io::copy(&mut reader, &mut stdout).await?;
                        stdout.flush().await?;
                    }
                }
            }

            if let (Some(repair), true) = (reply.repair, *wait_repair) {
                let report = repair.wait().await?;
                info!(repaired = ?report.repaired, failed = ?report.failed, "Repair finished");
            }
        }

        Cmd::Simulate { key, rounds } => {
            for round in 0..*rounds {
                let reply = client.set(key, &[], &OperationOptions::dry_run()).await?;
                println!("round {}: placements={:?}", round, reply.placements);
            }
        }

        Cmd::Roundtrip { key, size, fail } => {
            let mut data = vec![0u8; *size];
            rand::thread_rng().fill_bytes(&mut data);

            let reply = client.set(key, &data, &OperationOptions::default()).await?;
            println!("stored {} req_id={}", key, reply.req_id);

            let addr = ring
                .locate(key)
                .context("no endpoint for key")?
                .to_string();
            for &index in fail {
                cluster.inject(&addr, index, Fault::Drop, 1);
            }

            let reply = client.get(key, *size, &OperationOptions::default()).await?;
            let mut read = Vec::with_capacity(*size);
            if let Some(mut reader) = reply.reader {
                tokio::io::copy(&mut reader, &mut read).await?;
            }
            if read != data {
                bail!("object {} came back different", key);
            }
            println!(
                "read {} bytes req_id={} reconstructed={} failed={:?}",
                read.len(),
                reply.req_id,
                reply.stats.reconstructed,
                reply.stats.failed_shards
            );

            if let Some(repair) = reply.repair {
                let report = repair.wait().await?;
                println!(
                    "repair req_id={} repaired={:?} failed={:?}",
                    report.req_id, report.repaired, report.failed
                );
            }
        }
    }

    Ok(())
}

fn load_config(args: &Args) -> anyhow::Result<ClientConfig> {
    let mut config = match &args.config {
        Some(path) => ClientConfig::from_yaml_file(path)
            .with_context(|| format!("failed to load {}", path.display()))?,
        None => ClientConfig::default(),
    };

    if let Some(data_shards) = args.data_shards {
        config.data_shards = data_shards;
    }
    if let Some(parity_shards) = args.parity_shards {
        config.parity_shards = parity_shards;
    }
    if let Some(cluster_size) = args.cluster_size {
        config.cluster_size = cluster_size;
    }
    if let Some(timeout) = args.shard_timeout_ms {
        config.shard_timeout_ms = timeout;
    }

    config.validate()?;
    Ok(config)
}

// =============================================================================
// Logging
// =============================================================================

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::from_default_env().add_directive(level.into());

    // Logs go to stderr so `get` can stream the object to stdout
    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .init();
    }
}
