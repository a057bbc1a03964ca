//! Database load balancing: replica host health.
//!
//! # Data Flow
//! ```text
//! Caller about to route a read
//!     → host.rs (cached online flag, jitter-gated)
//!     → interval elapsed? probe the replica:
//!         - replay timestamp lag (host.rs)
//!         - otherwise WAL byte lag against primary.rs write location
//!     → pool.rs (lease a connection, always released)
//!     → postgres.rs (tokio-postgres driver)
//!
//! poller.rs drives the checks on a timer and drains hosts on shutdown.
//! ```
//!
//! # Design Decisions
//! - Health state is per host; routing policy lives elsewhere
//! - Connection-class failures demote a host, anything else propagates
//! - Each host exclusively owns its pool

pub mod host;
pub mod lsn;
pub mod poller;
pub mod pool;
pub mod postgres;
pub mod primary;

pub use host::{Host, HostSettings};
pub use lsn::Lsn;
pub use pool::{Connection, ConnectionPool, DbError, Row};
pub use primary::Primary;
