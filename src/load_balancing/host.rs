//! Replica host health tracking.
//!
//! # Responsibilities
//! - Answer "can reads go to this replica?" without a round trip on most calls
//! - Periodically probe replication lag (time first, then bytes against the primary)
//! - Own the replica's connection pool and drain it on teardown
//!
//! # State Transitions
//! ```text
//! Online  → Offline: probe finds the replica stale, or a connection error is observed
//! Offline → Online:  a later probe finds the replica fresh again
//! ```
//!
//! # Design Decisions
//! - Probe cadence is re-sampled from a jittered interval list on every call
//! - `online` and `last_checked_at` are relaxed atomics; a race costs at most one extra probe
//! - `offline()` skips interval gating and tears the pool down immediately

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rand::seq::SliceRandom;
use tokio::time::{self, Instant};

use crate::load_balancing::lsn::Lsn;
use crate::load_balancing::pool::{query_first_row, ConnectionPool, DbError, Row};
use crate::load_balancing::primary::Primary;
use crate::observability::metrics;

/// Default upper bound on how long `disconnect` waits for in-flight queries.
pub const DEFAULT_DISCONNECT_TIMEOUT: Duration = Duration::from_secs(120);

const REPLICATION_LAG_TIME_SQL: &str =
    "SELECT EXTRACT(EPOCH FROM (now() - pg_last_xact_replay_timestamp()))::float AS lag";

const REPLICA_LOCATION_SQL: &str = "SELECT pg_last_wal_replay_lsn()::text AS location";

/// Thresholds and timings supplied by the load balancer configuration.
#[derive(Debug, Clone)]
pub struct HostSettings {
    /// Base probe interval in seconds; the effective interval is jittered up to twice this.
    pub replica_check_interval: f64,
    /// Maximum replay lag in seconds for a replica to count as fresh.
    pub max_replication_lag_time: f64,
    /// Maximum WAL distance in bytes from the primary's write location.
    pub max_replication_difference: i64,
    /// Sleep between pool checks while draining.
    pub drain_poll_interval: Duration,
    /// Upper bound on one status refresh, primary lookup included.
    pub probe_timeout: Duration,
}

impl Default for HostSettings {
    fn default() -> Self {
        Self {
            replica_check_interval: 60.0,
            max_replication_lag_time: 60.0,
            max_replication_difference: 8 * 1024 * 1024,
            drain_poll_interval: Duration::from_secs(2),
            probe_timeout: Duration::from_secs(30),
        }
    }
}

/// Candidate probe intervals: `base, base + 0.5, ...` up to `base * 2`.
pub fn check_intervals(base: f64) -> Vec<f64> {
    let base = if base.is_finite() { base.max(0.0) } else { 0.0 };
    let steps = (base / 0.5).floor() as usize;

    (0..=steps).map(|i| base + i as f64 * 0.5).collect()
}

/// A single database replica.
pub struct Host<P> {
    host: String,
    port: u16,
    pool: P,
    primary: Arc<Primary<P>>,
    settings: HostSettings,
    intervals: Vec<f64>,
    online: AtomicBool,
    /// Reference point for `last_checked_at`.
    epoch: Instant,
    /// Milliseconds since `epoch` of the last completed status refresh.
    last_checked_at: AtomicU64,
}

impl<P: ConnectionPool> Host<P> {
    /// Create a host. It starts online with its last check set to now.
    pub fn new(
        host: impl Into<String>,
        port: u16,
        pool: P,
        primary: Arc<Primary<P>>,
        settings: HostSettings,
    ) -> Self {
        let intervals = check_intervals(settings.replica_check_interval);

        Self {
            host: host.into(),
            port,
            pool,
            primary,
            settings,
            intervals,
            online: AtomicBool::new(true),
            epoch: Instant::now(),
            last_checked_at: AtomicU64::new(0),
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn pool(&self) -> &P {
        &self.pool
    }

    pub fn intervals(&self) -> &[f64] {
        &self.intervals
    }

    /// The last known status, without probing.
    pub fn cached_online(&self) -> bool {
        self.online.load(Ordering::Relaxed)
    }

    /// Return true if reads may be routed to this replica.
    ///
    /// Probes the replica only when the jittered check interval has elapsed.
    /// Connection errors mark the host offline; other errors propagate. A
    /// probe running past `probe_timeout` counts as a connection error.
    pub async fn online(&self) -> Result<bool, DbError> {
        if !self.check_replica_status() {
            return Ok(self.online.load(Ordering::Relaxed));
        }

        let was_online = self.online.load(Ordering::Relaxed);

        let refreshed = match time::timeout(self.settings.probe_timeout, self.refresh_status()).await {
            Ok(result) => result,
            Err(_) => Err(DbError::ConnectionNotEstablished(format!(
                "replica status check timed out after {:?}",
                self.settings.probe_timeout
            ))),
        };

        let online = match refreshed {
            Ok(online) => online,
            Err(e) if e.is_connection_error() => {
                tracing::warn!(
                    db_host = %self.host,
                    db_port = self.port,
                    error = %e,
                    "Replica status check failed"
                );
                self.offline();
                return Ok(false);
            }
            Err(e) => return Err(e),
        };

        if online && !was_online {
            tracing::info!(
                event = "host_online",
                db_host = %self.host,
                db_port = self.port,
                "Host is online after replica status check"
            );
        } else if !online {
            tracing::warn!(
                event = "host_offline",
                db_host = %self.host,
                db_port = self.port,
                "Host is offline after replica status check"
            );
        }

        metrics::record_host_online(&self.host, self.port, online);
        Ok(online)
    }

    /// Re-evaluate freshness and record the time of the check.
    pub async fn refresh_status(&self) -> Result<bool, DbError> {
        let online = self.replica_is_up_to_date().await?;

        self.online.store(online, Ordering::Relaxed);
        self.last_checked_at.store(self.elapsed_millis(), Ordering::Relaxed);

        Ok(online)
    }

    /// Mark the host offline and disconnect its pool without waiting.
    pub fn offline(&self) {
        tracing::warn!(
            event = "host_offline",
            db_host = %self.host,
            db_port = self.port,
            "Marking host as offline"
        );

        self.online.store(false, Ordering::Relaxed);
        self.pool.disconnect();
        metrics::record_host_offline(&self.host, self.port);
    }

    /// Wait up to `timeout` for pooled connections to go idle, then disconnect.
    ///
    /// The pool is disconnected even if connections are still in use when
    /// the deadline passes.
    pub async fn disconnect(&self, timeout: Duration) {
        let deadline = Instant::now() + timeout;

        loop {
            let in_use = self.pool.in_use_count();
            if in_use == 0 {
                break;
            }

            let now = Instant::now();
            if now >= deadline {
                tracing::warn!(
                    db_host = %self.host,
                    db_port = self.port,
                    in_use,
                    timeout_secs = timeout.as_secs_f64(),
                    "Timed out draining host, disconnecting with connections in use"
                );
                break;
            }

            time::sleep(self.settings.drain_poll_interval.min(deadline - now)).await;
        }

        self.pool.disconnect();
        tracing::info!(db_host = %self.host, db_port = self.port, "Host disconnected");
    }

    /// True when the jittered interval since the last check has elapsed.
    pub fn check_replica_status(&self) -> bool {
        let interval = self
            .intervals
            .choose(&mut rand::thread_rng())
            .copied()
            .unwrap_or(self.settings.replica_check_interval);

        let last = self.last_checked_at.load(Ordering::Relaxed);
        let elapsed = self.elapsed_millis().saturating_sub(last) as f64 / 1000.0;

        elapsed >= interval
    }

    /// Fresh if replay lag is within bounds, or failing that, if the replica
    /// is close enough in bytes to the primary's write location.
    pub async fn replica_is_up_to_date(&self) -> Result<bool, DbError> {
        if self.replication_lag_below_threshold().await {
            return Ok(true);
        }

        self.data_is_recent_enough().await
    }

    pub async fn replication_lag_below_threshold(&self) -> bool {
        match self.replication_lag_time().await {
            Some(lag) => lag <= self.settings.max_replication_lag_time,
            None => false,
        }
    }

    /// A primary without writes leaves replicas with a growing replay
    /// timestamp lag even though they have nothing left to replay. Comparing
    /// WAL positions catches that case.
    pub async fn data_is_recent_enough(&self) -> Result<bool, DbError> {
        let location = self.primary.write_location().await?;

        Ok(match self.replication_lag_size(location).await {
            Some(size) => size <= self.settings.max_replication_difference,
            None => false,
        })
    }

    /// Seconds since the last replayed transaction, if this is a replica.
    pub async fn replication_lag_time(&self) -> Option<f64> {
        let row = self.query_and_release(REPLICATION_LAG_TIME_SQL).await;

        row.get("lag").and_then(|lag| lag.parse().ok())
    }

    /// Bytes between `location` and this server's own position.
    ///
    /// Logical subscribers report their position through
    /// `pg_replication_origin_status`; physical replicas through their replay
    /// LSN; a primary through its insert LSN. Only one replication origin is
    /// expected; with several, the first reported row is used.
    pub async fn replication_lag_size(&self, location: Lsn) -> Option<i64> {
        let sql = format!(
            "SELECT pg_wal_lsn_diff({}, (\
             CASE \
             WHEN (SELECT TRUE FROM pg_replication_origin_status) \
             THEN (SELECT remote_lsn FROM pg_replication_origin_status) \
             WHEN pg_is_in_recovery() \
             THEN pg_last_wal_replay_lsn() \
             ELSE pg_current_wal_insert_lsn() \
             END))::float AS diff",
            location.to_sql_literal()
        );

        let row = self.query_and_release(&sql).await;
        row.get("diff")
            .and_then(|diff| diff.parse::<f64>().ok())
            .map(|diff| diff as i64)
    }

    /// The replica's last replayed WAL position.
    pub async fn database_replica_location(&self) -> Option<Lsn> {
        let row = self.query_and_release(REPLICA_LOCATION_SQL).await;

        row.get("location").and_then(|location| location.parse().ok())
    }

    /// True if the replica has replayed at least up to `location`.
    pub async fn caught_up(&self, location: Lsn) -> bool {
        matches!(self.replication_lag_size(location).await, Some(lag) if lag <= 0)
    }

    /// Run `sql` and return its first row, or an empty row on any error.
    ///
    /// The connection goes back to the pool on every path.
    pub async fn query_and_release(&self, sql: &str) -> Row {
        match query_first_row(&self.pool, sql).await {
            Ok(row) => row.unwrap_or_default(),
            Err(e) => {
                tracing::warn!(
                    db_host = %self.host,
                    db_port = self.port,
                    error = %e,
                    "Replica query failed"
                );
                Row::new()
            }
        }
    }

    fn elapsed_millis(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }
}

impl<P> std::fmt::Debug for Host<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Host")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("online", &self.online.load(Ordering::Relaxed))
            .finish()
    }
}
