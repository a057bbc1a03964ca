//! Process memory health.
//!
//! # Data Flow
//! ```text
//! process.rs (/proc readings)
//!     → watchdog/monitors (heap fragmentation, memory growth)
//!     → watchdog/monitor.rs (strike counting)
//!     → watchdog/handlers.rs (remediation)
//! ```

pub mod process;
pub mod watchdog;

pub use process::{ProcMemory, ProcessMemory};
