//! NetMesh node
//!
//! Runs one NetMeshBase that replicates with other nodes over TCP:
//! 1. Serves and receives replicas through Xpriso
//! 2. Shadows `file://` and `http(s)://` resources through Probes
//! 3. Sweeps stale replicas in the background
//!
//! Usage:
//!   netmesh-node --port 7341 --db node.db
//!
//! The node identifier is `tcp://<advertise-host>:<port>`.

use std::{net::SocketAddr, path::PathBuf, sync::Arc, time::Duration};
use anyhow::{Context, Result};
use clap::Parser;
use netmesh_comm::{EndpointKind, TcpTransport, TcpTransportConfig};
use netmesh_core::{DefaultSweeper, MeshBaseConfig, ScheduledSweeper, SweepPolicy};
use netmesh_node::{build_router, NodeState};
use netmesh_probe::{
    FetcherChain, FileFetcher, HttpFetcher, LocalNetMeshBase, ProbeDirectory, ProbeManagerConfig,
    ScheduledProbeManager,
};
use netmesh_store::SqliteStore;
use netmesh_types::NetMeshBaseIdentifier;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser, Debug)]
#[command(name = "netmesh-node")]
#[command(about = "NetMesh replication node")]
struct Args {
    /// Port to listen on for Xpriso traffic (TCP)
    #[arg(short, long, default_value = "7341")]
    port: u16,

    /// Host name or address other nodes reach this node at
    #[arg(long, default_value = "127.0.0.1")]
    advertise_host: String,

    /// SQLite database for objects and proxies; in memory if omitted
    #[arg(long)]
    db: Option<PathBuf>,

    /// HTTP API port for the status endpoint
    #[arg(long, default_value = "7342")]
    http_port: u16,

    /// Use fire-and-forget endpoints instead of ping-pong
    #[arg(long)]
    fire_and_forget: bool,

    /// Seconds a replica may go unread before it is purged
    #[arg(long, default_value = "3600")]
    purge_after: u64,

    /// Seconds between sweep steps
    #[arg(long, default_value = "60")]
    sweep_interval: u64,

    /// Seconds a shadow without partners is kept; negative keeps it forever
    #[arg(long, default_value = "600", allow_negative_numbers = true)]
    shadow_ttl: i64,

    /// Enable verbose debug logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let log_level = if args.verbose { "debug" } else { "info" };
    FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level)),
        )
        .with_target(false)
        .compact()
        .init();

    info!("NetMesh node starting...");
    let identifier = NetMeshBaseIdentifier::parse(&format!("tcp://{}:{}", args.advertise_host, args.port))
        .context("Invalid node identifier")?;

    let transport = TcpTransport::bind(
        identifier.clone(),
        TcpTransportConfig {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], args.port)),
            ..TcpTransportConfig::default()
        },
    )
    .await
    .context("Failed to bind Xpriso port")?;

    let config = MeshBaseConfig {
        endpoint_kind: if args.fire_and_forget {
            EndpointKind::FireAndForget
        } else {
            EndpointKind::PingPong
        },
        ..MeshBaseConfig::default()
    };

    let fetcher = FetcherChain::new()
        .with(Arc::new(FileFetcher))
        .with(Arc::new(HttpFetcher::new(Duration::from_secs(30)).context("Failed to build HTTP client")?));
    let probes = ScheduledProbeManager::start(
        ProbeManagerConfig {
            time_not_needed_till_expires: u64::try_from(args.shadow_ttl).ok().map(Duration::from_secs),
            ..ProbeManagerConfig::default()
        },
        Arc::new(fetcher),
        ProbeDirectory::json(),
    );

    let mut builder = LocalNetMeshBase::builder(Arc::new(transport), probes.clone()).config(config);
    if let Some(path) = &args.db {
        let store = SqliteStore::open(path)
            .with_context(|| format!("Failed to open database {}", path.display()))?;
        builder = builder.store(Arc::new(store));
    }
    let base = builder.open().await.context("Failed to open NetMeshBase")?;
    info!("Node identifier: {}", base.identifier());

    let policy = SweepPolicy {
        purge_unread_after: Some(Duration::from_secs(args.purge_after)),
        interval: Duration::from_secs(args.sweep_interval),
        ..SweepPolicy::default()
    };
    let sweeper = ScheduledSweeper::start(
        base.base(),
        Arc::new(DefaultSweeper::new(policy.clone())),
        policy,
    );

    // Spawn HTTP status endpoint
    let state = Arc::new(NodeState {
        base: base.base().clone(),
        probes: Some(probes),
    });
    let http_port = args.http_port;
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", http_port))
        .await
        .context("Failed to bind HTTP port")?;
    let server = tokio::spawn(async move {
        info!("HTTP status endpoint listening on port {}", http_port);
        if let Err(e) = axum::serve(listener, build_router(state)).await {
            error!("HTTP server failed: {}", e);
        }
    });

    println!("\n========================================");
    println!("  NetMesh Node Running");
    println!("========================================");
    println!("  Identifier: {}", base.identifier());
    println!("  Xpriso:     {}", args.port);
    println!("  HTTP:       {}", http_port);
    println!("========================================\n");

    tokio::signal::ctrl_c().await.context("Failed to listen for shutdown")?;
    info!("Shutting down...");
    sweeper.stop();
    server.abort();
    base.close().await.context("Failed to close NetMeshBase")?;
    Ok(())
}
