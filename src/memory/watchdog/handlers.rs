//! Remediation for exceeded strike limits.

use crate::lifecycle::Shutdown;
use crate::memory::watchdog::monitor::Payload;

/// Reacts to a monitor whose strikes exceeded the maximum.
pub trait ViolationHandler: Send {
    /// Handle a violation. Returning `true` stops the watchdog.
    fn handle(&mut self, reason: &str, payload: &Payload) -> bool;

    fn name(&self) -> &'static str;
}

/// Records the violation and keeps the process running.
#[derive(Debug, Default)]
pub struct LogOnlyHandler;

impl ViolationHandler for LogOnlyHandler {
    fn handle(&mut self, reason: &str, _payload: &Payload) -> bool {
        tracing::info!(reason, "Memory violation left to run (log-only handler)");
        false
    }

    fn name(&self) -> &'static str {
        "log_only"
    }
}

/// Requests a graceful process shutdown.
pub struct ShutdownHandler {
    shutdown: Shutdown,
}

impl ShutdownHandler {
    pub fn new(shutdown: Shutdown) -> Self {
        Self { shutdown }
    }
}

impl ViolationHandler for ShutdownHandler {
    fn handle(&mut self, reason: &str, _payload: &Payload) -> bool {
        tracing::warn!(reason, "Memory violation, requesting graceful shutdown");
        self.shutdown.trigger();
        true
    }

    fn name(&self) -> &'static str {
        "shutdown"
    }
}
