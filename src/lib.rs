//! Database replica health tracking and a process memory watchdog.

pub mod config;
pub mod lifecycle;
pub mod load_balancing;
pub mod memory;
pub mod observability;

pub use config::ServiceConfig;
pub use lifecycle::Shutdown;
pub use load_balancing::{Host, HostSettings};
pub use memory::watchdog::Watchdog;
