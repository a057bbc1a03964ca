//! Replica watchdog.
//!
//! # Architecture Overview
//!
//! ```text
//!   ┌───────────────────────────────────────────────────────────┐
//!   │                     REPLICA WATCHDOG                      │
//!   │                                                           │
//!   │  ┌────────────┐   online()   ┌──────────┐   SQL probes    │
//!   │  │ HostPoller │─────────────▶│   Host   │────────────────────▶ Replica
//!   │  └────────────┘              │  + pool  │                 │
//!   │                              └────┬─────┘   write LSN     │
//!   │                                   └──────────────────────────▶ Primary
//!   │                                                           │
//!   │  ┌────────────┐   tick       ┌──────────────────────┐     │
//!   │  │  Watchdog  │─────────────▶│ HeapFragmentation    │     │
//!   │  │            │              │ MemoryGrowth         │◀── /proc
//!   │  └─────┬──────┘              └──────────────────────┘     │
//!   │        │ strikes exceeded                                 │
//!   │        ▼                                                  │
//!   │  ViolationHandler (log / graceful shutdown)               │
//!   └───────────────────────────────────────────────────────────┘
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;

use replica_watchdog::config::{self, HandlerKind, LoadBalancingConfig, WatchdogConfig};
use replica_watchdog::lifecycle::{signals, Shutdown};
use replica_watchdog::load_balancing::poller::HostPoller;
use replica_watchdog::load_balancing::postgres::{pg_config, PgPool};
use replica_watchdog::load_balancing::{Host, Primary};
use replica_watchdog::memory::watchdog::monitors::{HeapFragmentation, MemoryGrowth};
use replica_watchdog::memory::watchdog::{LogOnlyHandler, ShutdownHandler, StrikeMonitor, ViolationHandler, Watchdog};
use replica_watchdog::memory::{ProcMemory, ProcessMemory};
use replica_watchdog::observability::{logging, metrics};

#[derive(Parser)]
#[command(name = "replica-watchdog")]
#[command(about = "Replica health polling and process memory watchdog", long_about = None)]
struct Cli {
    /// Path to a TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = config::load(cli.config.as_deref())?;

    logging::init_logging(&config.observability.log_level);
    tracing::info!("replica-watchdog v{} starting", env!("CARGO_PKG_VERSION"));

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse::<SocketAddr>() {
            Ok(addr) => {
                if let Err(e) = metrics::init_metrics(addr) {
                    tracing::error!(error = %e, "Failed to start metrics endpoint");
                }
            }
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let shutdown = Shutdown::new();
    let triggered = shutdown.subscribe();
    let mut tasks = Vec::new();

    if config.load_balancing.hosts.is_empty() {
        tracing::info!("No replicas configured, replica poller disabled");
    } else {
        let poller = build_poller(&config.load_balancing);
        tasks.push(tokio::spawn(poller.run(shutdown.subscribe())));
    }

    if config.watchdog.enabled {
        let watchdog = build_watchdog(&config.watchdog, &shutdown);
        tasks.push(tokio::spawn(watchdog.run(shutdown.subscribe())));
    } else {
        tracing::info!("Memory watchdog disabled");
    }

    signals::wait_for_shutdown(&shutdown, triggered).await;

    for task in tasks {
        if let Err(e) = task.await {
            tracing::error!(error = %e, "Background task failed");
        }
    }

    tracing::info!("Shutdown complete");
    Ok(())
}

fn build_poller(lb: &LoadBalancingConfig) -> HostPoller<PgPool> {
    let connect_timeout = Duration::from_secs(lb.connect_timeout_secs);
    let query_timeout = Duration::from_secs(lb.query_timeout_secs);
    let pool_for = |host: &str, port: u16| {
        let pg = pg_config(host, port, &lb.database, &lb.user, lb.password.as_deref(), connect_timeout);
        PgPool::new(pg, lb.pool_size, query_timeout)
    };

    let primary = Arc::new(Primary::new(pool_for(&lb.primary.host, lb.primary.port)));

    let hosts = lb
        .hosts
        .iter()
        .map(|address| {
            tracing::info!(db_host = %address.host, db_port = address.port, "Tracking replica");
            Arc::new(Host::new(
                address.host.clone(),
                address.port,
                pool_for(&address.host, address.port),
                Arc::clone(&primary),
                lb.host_settings(),
            ))
        })
        .collect();

    HostPoller::new(
        hosts,
        Duration::from_secs(lb.poll_interval_secs),
        Duration::from_secs(lb.disconnect_timeout_secs),
    )
}

fn build_watchdog(wd: &WatchdogConfig, shutdown: &Shutdown) -> Watchdog {
    let memory: Arc<dyn ProcessMemory> = Arc::new(ProcMemory::default());
    let worker_id = wd.worker_id();

    let handler: Box<dyn ViolationHandler> = match wd.handler {
        HandlerKind::Log => Box::new(LogOnlyHandler),
        HandlerKind::Shutdown => Box::new(ShutdownHandler::new(shutdown.clone())),
    };

    tracing::info!(
        worker_id = %worker_id,
        max_strikes = wd.max_strikes,
        max_heap_fragmentation = wd.max_heap_fragmentation,
        max_mem_growth = wd.max_mem_growth,
        "Memory watchdog configured"
    );

    Watchdog::new(Duration::from_secs(wd.interval_secs), handler)
        .with_monitor(StrikeMonitor::new(
            HeapFragmentation::new(Arc::clone(&memory), wd.max_heap_fragmentation),
            wd.max_strikes,
            worker_id.clone(),
            Arc::clone(&memory),
        ))
        .with_monitor(StrikeMonitor::new(
            MemoryGrowth::new(Arc::clone(&memory), wd.max_mem_growth, wd.reference_pid),
            wd.max_strikes,
            worker_id,
            memory,
        ))
}
