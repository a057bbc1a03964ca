//! Periodic replica status polling.
//!
//! # Responsibilities
//! - Drive `Host::online` for every replica on a fixed cadence
//! - Keep going when a check fails unexpectedly
//! - Abandon an in-progress round of checks when shutdown arrives
//! - Drain and disconnect every host on shutdown

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tokio::time;

use crate::load_balancing::host::Host;
use crate::load_balancing::pool::ConnectionPool;

pub struct HostPoller<P> {
    hosts: Vec<Arc<Host<P>>>,
    poll_interval: Duration,
    disconnect_timeout: Duration,
}

impl<P: ConnectionPool + 'static> HostPoller<P> {
    pub fn new(hosts: Vec<Arc<Host<P>>>, poll_interval: Duration, disconnect_timeout: Duration) -> Self {
        Self {
            hosts,
            poll_interval,
            disconnect_timeout,
        }
    }

    pub fn hosts(&self) -> &[Arc<Host<P>>] {
        &self.hosts
    }

    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        tracing::info!(
            hosts = self.hosts.len(),
            interval_secs = self.poll_interval.as_secs_f64(),
            "Replica poller starting"
        );

        let mut ticker = time::interval(self.poll_interval);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.recv() => {
                    tracing::info!("Replica poller received shutdown signal, draining hosts");
                    break;
                }
            }

            // An in-flight check is dropped on shutdown; leases release on drop.
            tokio::select! {
                _ = self.check_all() => {}
                _ = shutdown.recv() => {
                    tracing::info!("Replica poller received shutdown signal mid-check, draining hosts");
                    break;
                }
            }
        }

        self.disconnect_all().await;
    }

    /// Poll every host once. Returns how many are online.
    pub async fn check_all(&self) -> usize {
        let mut online = 0;

        for host in &self.hosts {
            match host.online().await {
                Ok(true) => online += 1,
                Ok(false) => {}
                Err(e) => {
                    tracing::error!(
                        db_host = %host.host(),
                        db_port = host.port(),
                        error = %e,
                        "Replica status check raised an unexpected error"
                    );
                }
            }
        }

        online
    }

    async fn disconnect_all(&self) {
        let mut drains = JoinSet::new();
        for host in &self.hosts {
            let host = Arc::clone(host);
            let timeout = self.disconnect_timeout;
            drains.spawn(async move { host.disconnect(timeout).await });
        }

        while let Some(result) = drains.join_next().await {
            if let Err(e) = result {
                tracing::error!(error = %e, "Host drain task failed");
            }
        }
    }
}
