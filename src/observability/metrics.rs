//! Metrics collection and exposition.
//!
//! # Metrics
//! - `memwd_violations_total` (counter): violating ticks, by `pid` and `reason`
//! - `memwd_violations_handled_total` (counter): callbacks fired, by `pid` and `reason`
//! - `memwd_max_heap_frag` (gauge): configured heap fragmentation limit
//! - `memwd_max_mem_growth` (gauge): configured memory growth multiplier
//! - `db_load_balancing_host_online` (gauge): 1=online, 0=offline, by host
//! - `db_load_balancing_host_offline_total` (counter): forced offline transitions
//!
//! # Design Decisions
//! - Without an installed recorder every call is a no-op, so tests need no setup

use std::net::SocketAddr;

use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus recorder and its scrape endpoint.
pub fn init_metrics(addr: SocketAddr) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;

    metrics::describe_counter!(
        "memwd_violations_total",
        "Watchdog ticks where a monitored limit was violated"
    );
    metrics::describe_counter!(
        "memwd_violations_handled_total",
        "Watchdog violations that exceeded the strike limit and were handled"
    );
    metrics::describe_gauge!("memwd_max_heap_frag", "Configured heap fragmentation limit");
    metrics::describe_gauge!("memwd_max_mem_growth", "Configured memory growth multiplier");
    metrics::describe_gauge!(
        "db_load_balancing_host_online",
        "Replica status after the last check (1=online, 0=offline)"
    );
    metrics::describe_counter!(
        "db_load_balancing_host_offline_total",
        "Replicas forced offline after a connection error"
    );

    tracing::info!(address = %addr, "Metrics endpoint listening");
    Ok(())
}

pub fn record_violation(worker_id: &str, reason: &str) {
    metrics::counter!(
        "memwd_violations_total",
        "pid" => worker_id.to_string(),
        "reason" => reason.to_string()
    )
    .increment(1);
}

pub fn record_violation_handled(worker_id: &str, reason: &str) {
    metrics::counter!(
        "memwd_violations_handled_total",
        "pid" => worker_id.to_string(),
        "reason" => reason.to_string()
    )
    .increment(1);
}

pub fn set_max_heap_fragmentation(limit: f64) {
    metrics::gauge!("memwd_max_heap_frag").set(limit);
}

pub fn set_max_mem_growth(limit: f64) {
    metrics::gauge!("memwd_max_mem_growth").set(limit);
}

pub fn record_host_online(host: &str, port: u16, online: bool) {
    metrics::gauge!(
        "db_load_balancing_host_online",
        "db_host" => host.to_string(),
        "db_port" => port.to_string()
    )
    .set(if online { 1.0 } else { 0.0 });
}

pub fn record_host_offline(host: &str, port: u16) {
    metrics::counter!(
        "db_load_balancing_host_offline_total",
        "db_host" => host.to_string(),
        "db_port" => port.to_string()
    )
    .increment(1);
    record_host_online(host, port, false);
}
