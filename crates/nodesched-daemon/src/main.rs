//! nodesched daemon
//!
//! Runs the cluster task manager on its event loop and serves the REST API.

use anyhow::Context;
use clap::Parser;
use nodesched_api::{create_router, NodeDirectory};
use nodesched_core::{DaemonConfig, LoggingConfig, SchedulerConfig, Task};
use nodesched_runtime::{post_periodic, EventLoop, EventLoopHandle, Executor};
use nodesched_scheduler::{ClusterResourceScheduler, ClusterTaskManager, GrantingLocalTaskManager};
use std::fs::OpenOptions;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// nodesched daemon - node-local cluster task scheduler
#[derive(Parser, Debug)]
#[command(name = "nodeschedd")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to the TOML configuration file
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// Address to bind the API server
    #[arg(long)]
    address: Option<String>,

    /// Port for the REST API server
    #[arg(long)]
    port: Option<u16>,

    /// Log level or filter directive
    #[arg(long)]
    log_level: Option<String>,
}

impl Args {
    fn load_config(&self) -> anyhow::Result<DaemonConfig> {
        let mut config = match &self.config {
            Some(path) => DaemonConfig::from_file(path)
                .with_context(|| format!("Failed to load {}", path.display()))?,
            None => DaemonConfig::default(),
        };
        if let Some(address) = &self.address {
            config.api.address = address.clone();
        }
        if let Some(port) = self.port {
            config.api.port = port;
        }
        if let Some(level) = &self.log_level {
            config.logging.level = level.clone();
        }
        Ok(config)
    }
}

fn init_logging(config: &LoggingConfig) -> anyhow::Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);

    let file = match &config.file {
        Some(path) => Some(
            OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?,
        ),
        None => None,
    };
    let json = config.format.eq_ignore_ascii_case("json");

    match (file, json) {
        (Some(file), true) => builder
            .json()
            .with_ansi(false)
            .with_writer(Mutex::new(file))
            .try_init(),
        (Some(file), false) => builder.with_ansi(false).with_writer(Mutex::new(file)).try_init(),
        (None, true) => builder.json().try_init(),
        (None, false) => builder.try_init(),
    }
    .map_err(|e| anyhow::anyhow!("Failed to set subscriber: {}", e))
}

/// Build the cluster task manager from the static cluster layout
fn build_scheduler(config: &DaemonConfig, nodes: &NodeDirectory) -> anyhow::Result<ClusterTaskManager> {
    let local = &config.cluster.local_node;
    let local_id = local.resolve_id();
    let mut crs = ClusterResourceScheduler::with_default_strategy(
        local_id,
        local.resource_set()?,
        config.scheduler.spread_threshold,
    );
    crs.view_mut().set_node_labels(&local_id, local.labels.clone())?;
    nodes.upsert(local.node_info(local_id));
    info!(node_id = %local_id, resources = %local.resource_set()?, "Local node registered");

    for peer in &config.cluster.nodes {
        let peer_id = peer.resolve_id();
        if peer_id == local_id {
            warn!(node_id = %peer_id, "Peer entry duplicates the local node, skipping");
            continue;
        }
        crs.update_node_resources(peer_id, peer.resource_set()?, None);
        crs.view_mut().set_node_labels(&peer_id, peer.labels.clone())?;
        nodes.upsert(peer.node_info(peer_id));
        info!(node_id = %peer_id, endpoint = %peer.node_info(peer_id).endpoint(), "Peer node registered");
    }

    let announce = Box::new(|task: &Task| {
        warn!(
            task_id = %task.task_id,
            name = %task.name,
            resources = %task.required_resources,
            "Task is infeasible: no node in the cluster can satisfy its resource request"
        );
    });

    Ok(ClusterTaskManager::new(
        crs,
        nodes.clone(),
        announce,
        Box::new(GrantingLocalTaskManager::new(local_id)),
        config.scheduler.clone(),
    ))
}

/// Arm the infeasible retry, debug dump and metrics handlers
fn start_periodic_handlers(
    handle: &EventLoopHandle<ClusterTaskManager>,
    config: &SchedulerConfig,
) -> anyhow::Result<()> {
    if config.infeasible_retry_interval_ms > 0 {
        post_periodic(
            handle.clone(),
            "ClusterTaskManager.ScheduleAndDispatchTasks",
            Duration::from_millis(config.infeasible_retry_interval_ms),
            |ctm: &mut ClusterTaskManager| {
                if ctm.schedule_and_dispatch_tasks().revived > 0 {
                    ctm.schedule_and_dispatch_tasks();
                }
            },
        )?;
    }

    if config.debug_dump_interval_ms > 0 {
        let events = handle.stats();
        post_periodic(
            handle.clone(),
            "ClusterTaskManager.DebugStr",
            Duration::from_millis(config.debug_dump_interval_ms),
            move |ctm: &mut ClusterTaskManager| {
                info!("\n{}{}", ctm.debug_str(), events.summary());
            },
        )?;
    }

    if config.metrics_report_interval_ms > 0 {
        post_periodic(
            handle.clone(),
            "ClusterTaskManager.RecordMetrics",
            Duration::from_millis(config.metrics_report_interval_ms),
            |ctm: &mut ClusterTaskManager| ctm.record_metrics(),
        )?;
    }
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = args.load_config()?;
    init_logging(&config.logging)?;

    info!("Starting nodesched daemon v{}", env!("CARGO_PKG_VERSION"));

    let nodes = NodeDirectory::new();
    let scheduler = build_scheduler(&config, &nodes)?;
    let event_loop = EventLoop::new(scheduler)?;
    let handle = event_loop.handle();
    start_periodic_handlers(&handle, &config.scheduler)?;
    let event_loop_task = tokio::spawn(event_loop.run());

    let router = create_router(handle.clone(), nodes);

    let addr: SocketAddr = format!("{}:{}", config.api.address, config.api.port)
        .parse()
        .context("Invalid address")?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("API server listening on {}", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    handle.stop();
    let ctm = event_loop_task.await.context("Event loop task failed")?;
    info!(
        pending = ctm.pending_queue_size(),
        infeasible = ctm.infeasible_queue_size(),
        "Scheduler stopped"
    );
    Ok(())
}
