//! Memory watchdog.
//!
//! # Data Flow
//! ```text
//! Timer tick (mod.rs)
//!     → each monitor (monitor.rs):
//!         refresh_state → update strikes → violation metrics
//!     → strikes > max_strikes?
//!         → handler (handlers.rs) with the violation payload
//!         → handler asks to stop? watchdog exits
//! ```
//!
//! # Design Decisions
//! - Monitors run in registration order; a stopping handler ends the tick
//! - Ticks are synchronous; monitors only read `/proc`

pub mod handlers;
pub mod monitor;
pub mod monitors;

use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time::{self, Instant};

pub use handlers::{LogOnlyHandler, ShutdownHandler, ViolationHandler};
pub use monitor::{Condition, Monitor, Payload, StrikeMonitor, Tick};

/// Drives a set of monitors on a fixed interval.
pub struct Watchdog {
    monitors: Vec<Box<dyn Monitor>>,
    handler: Box<dyn ViolationHandler>,
    interval: Duration,
}

impl Watchdog {
    pub fn new(interval: Duration, handler: Box<dyn ViolationHandler>) -> Self {
        Self {
            monitors: Vec::new(),
            handler,
            interval,
        }
    }

    pub fn with_monitor(mut self, monitor: impl Monitor + 'static) -> Self {
        self.monitors.push(Box::new(monitor));
        self
    }

    pub fn monitors(&self) -> &[Box<dyn Monitor>] {
        &self.monitors
    }

    /// Run every monitor once. Returns true if the handler asked to stop.
    pub fn tick(&mut self) -> bool {
        let handler = &mut self.handler;
        let mut stop = false;

        for monitor in self.monitors.iter_mut() {
            let reason = monitor.reason().to_string();
            let mut on_violation = |payload: &Payload| {
                tracing::warn!(
                    event = "strikes_exceeded",
                    reason = %reason,
                    handler = handler.name(),
                    payload = %serde_json::Value::Object(payload.clone()),
                    "Memory watchdog strikes exceeded"
                );
                stop |= handler.handle(&reason, payload);
            };

            monitor.call(Some(&mut on_violation));

            if stop {
                break;
            }
        }

        stop
    }

    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        if self.monitors.is_empty() {
            tracing::info!("Memory watchdog has no monitors, not starting");
            return;
        }

        tracing::info!(
            interval_secs = self.interval.as_secs_f64(),
            monitors = self.monitors.len(),
            handler = self.handler.name(),
            "Memory watchdog starting"
        );

        let mut ticker = time::interval_at(Instant::now() + self.interval, self.interval);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if self.tick() {
                        tracing::info!("Memory watchdog stopped by handler");
                        break;
                    }
                }
                _ = shutdown.recv() => {
                    tracing::info!("Memory watchdog received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }
}
