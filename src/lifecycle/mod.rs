//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Shutdown::trigger
//!
//! Shutdown (shutdown.rs):
//!     broadcast → replica poller drains hosts
//!               → memory watchdog exits its loop
//! ```
//!
//! # Design Decisions
//! - A watchdog handler may trigger the same shutdown path as a signal
//! - Host draining has its own deadline, so shutdown cannot hang

pub mod shutdown;
pub mod signals;

pub use shutdown::Shutdown;
