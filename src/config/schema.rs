//! Configuration schema definitions.
//!
//! All types derive Serde traits for deserialization from a TOML file.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::load_balancing::HostSettings;

/// Root configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ServiceConfig {
    /// Replica health settings.
    pub load_balancing: LoadBalancingConfig,

    /// Memory watchdog settings.
    pub watchdog: WatchdogConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Address of one database server.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct DatabaseAddress {
    pub host: String,

    #[serde(default = "default_pg_port")]
    pub port: u16,
}

fn default_pg_port() -> u16 {
    5432
}

impl Default for DatabaseAddress {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: default_pg_port(),
        }
    }
}

/// Replica health configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoadBalancingConfig {
    /// Primary server, used to look up the current write location.
    pub primary: DatabaseAddress,

    /// Replica servers.
    pub hosts: Vec<DatabaseAddress>,

    pub database: String,

    pub user: String,

    pub password: Option<String>,

    /// Connections per replica pool.
    pub pool_size: usize,

    /// TCP connect timeout in seconds.
    pub connect_timeout_secs: u64,

    /// Bound on connection setup and on each query, in seconds.
    pub query_timeout_secs: u64,

    /// Bound on one whole replica status check, in seconds.
    pub probe_timeout_secs: u64,

    /// Base replica check interval in seconds (jittered up to twice this).
    pub replica_check_interval: f64,

    /// Maximum replay lag in seconds.
    pub max_replication_lag_time: f64,

    /// Maximum WAL distance from the primary in bytes.
    pub max_replication_difference: i64,

    /// Upper bound on draining a host's pool before disconnecting.
    pub disconnect_timeout_secs: u64,

    /// Sleep between drain checks in seconds.
    pub drain_poll_interval_secs: u64,

    /// How often the poller calls `online` on each host, in seconds.
    pub poll_interval_secs: u64,
}

impl Default for LoadBalancingConfig {
    fn default() -> Self {
        Self {
            primary: DatabaseAddress::default(),
            hosts: Vec::new(),
            database: "postgres".to_string(),
            user: "postgres".to_string(),
            password: None,
            pool_size: 5,
            connect_timeout_secs: 5,
            query_timeout_secs: 10,
            probe_timeout_secs: 30,
            replica_check_interval: 60.0,
            max_replication_lag_time: 60.0,
            max_replication_difference: 8 * 1024 * 1024,
            disconnect_timeout_secs: 120,
            drain_poll_interval_secs: 2,
            poll_interval_secs: 1,
        }
    }
}

impl LoadBalancingConfig {
    pub fn host_settings(&self) -> HostSettings {
        HostSettings {
            replica_check_interval: self.replica_check_interval,
            max_replication_lag_time: self.max_replication_lag_time,
            max_replication_difference: self.max_replication_difference,
            drain_poll_interval: Duration::from_secs(self.drain_poll_interval_secs),
            probe_timeout: Duration::from_secs(self.probe_timeout_secs),
        }
    }
}

/// What the watchdog does once a monitor exceeds its strikes.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum HandlerKind {
    /// Log the violation and keep running.
    #[default]
    Log,
    /// Trigger a graceful shutdown.
    Shutdown,
}

/// Memory watchdog configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WatchdogConfig {
    pub enabled: bool,

    /// Seconds between ticks.
    pub interval_secs: u64,

    /// Consecutive violating ticks tolerated before the handler fires.
    pub max_strikes: u32,

    /// Heap fragmentation ratio limit.
    pub max_heap_fragmentation: f64,

    /// Allowed USS multiple of the reference process.
    pub max_mem_growth: f64,

    /// Process whose USS is the growth baseline (defaults to self).
    pub reference_pid: Option<u32>,

    /// Identity used in payloads and metric labels (defaults to `process_<pid>`).
    pub worker_id: Option<String>,

    pub handler: HandlerKind,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 60,
            max_strikes: 5,
            max_heap_fragmentation: 0.5,
            max_mem_growth: 3.0,
            reference_pid: None,
            worker_id: None,
            handler: HandlerKind::Log,
        }
    }
}

impl WatchdogConfig {
    pub fn worker_id(&self) -> String {
        self.worker_id
            .clone()
            .unwrap_or_else(|| format!("process_{}", std::process::id()))
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: true,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}
