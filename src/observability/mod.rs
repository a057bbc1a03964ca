//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Hosts and watchdog monitors produce:
//!     → logging.rs (structured tracing events)
//!     → metrics.rs (counters, gauges)
//!
//! Consumers:
//!     → stdout log aggregation
//!     → Prometheus scrape endpoint
//! ```

pub mod logging;
pub mod metrics;
