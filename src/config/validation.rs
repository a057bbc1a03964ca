//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (intervals > 0, ratios within bounds)

use std::fmt;
use std::net::SocketAddr;

use crate::config::schema::{DatabaseAddress, ServiceConfig};

/// Largest accepted `replica_check_interval`. Each host keeps one candidate
/// interval per half second up to twice this value.
pub const MAX_REPLICA_CHECK_INTERVAL: f64 = 86_400.0;

/// A single semantic problem with the configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Check every semantic rule, collecting all failures.
pub fn validate_config(config: &ServiceConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();
    let lb = &config.load_balancing;

    check_address(&mut errors, "load_balancing.primary", &lb.primary);
    for (i, host) in lb.hosts.iter().enumerate() {
        check_address(&mut errors, &format!("load_balancing.hosts[{}]", i), host);
    }

    if lb.pool_size == 0 {
        errors.push(ValidationError::new("load_balancing.pool_size", "must be at least 1"));
    }
    if !(0.0..=MAX_REPLICA_CHECK_INTERVAL).contains(&lb.replica_check_interval) {
        errors.push(ValidationError::new(
            "load_balancing.replica_check_interval",
            format!("must be between 0 and {} seconds", MAX_REPLICA_CHECK_INTERVAL),
        ));
    }
    if !lb.max_replication_lag_time.is_finite() || lb.max_replication_lag_time < 0.0 {
        errors.push(ValidationError::new(
            "load_balancing.max_replication_lag_time",
            "must be a non-negative number of seconds",
        ));
    }
    if lb.max_replication_difference < 0 {
        errors.push(ValidationError::new(
            "load_balancing.max_replication_difference",
            "must not be negative",
        ));
    }
    if lb.query_timeout_secs == 0 {
        errors.push(ValidationError::new("load_balancing.query_timeout_secs", "must be > 0"));
    }
    if lb.probe_timeout_secs == 0 {
        errors.push(ValidationError::new("load_balancing.probe_timeout_secs", "must be > 0"));
    }
    if lb.drain_poll_interval_secs == 0 {
        errors.push(ValidationError::new("load_balancing.drain_poll_interval_secs", "must be > 0"));
    }
    if lb.poll_interval_secs == 0 {
        errors.push(ValidationError::new("load_balancing.poll_interval_secs", "must be > 0"));
    }

    let wd = &config.watchdog;
    if wd.interval_secs == 0 {
        errors.push(ValidationError::new("watchdog.interval_secs", "must be > 0"));
    }
    if !(0.0..=1.0).contains(&wd.max_heap_fragmentation) {
        errors.push(ValidationError::new(
            "watchdog.max_heap_fragmentation",
            "must be between 0.0 and 1.0",
        ));
    }
    if !wd.max_mem_growth.is_finite() || wd.max_mem_growth <= 0.0 {
        errors.push(ValidationError::new("watchdog.max_mem_growth", "must be > 0"));
    }

    let obs = &config.observability;
    if obs.metrics_enabled && obs.metrics_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!("invalid socket address {:?}", obs.metrics_address),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_address(errors: &mut Vec<ValidationError>, field: &str, address: &DatabaseAddress) {
    if address.host.trim().is_empty() {
        errors.push(ValidationError::new(format!("{}.host", field), "must not be empty"));
    }
    if address.port == 0 {
        errors.push(ValidationError::new(format!("{}.port", field), "must not be 0"));
    }
}
