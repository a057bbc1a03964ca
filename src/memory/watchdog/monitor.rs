//! Strike-counting monitor.
//!
//! # State Machine
//! ```text
//! Ok → Violating: the tick after max_strikes consecutive violating ticks
//! Violating → Ok: callback fired, strikes reset
//! any → Ok:       a single tick within the limit resets strikes
//! ```
//!
//! # Design Decisions
//! - What is measured lives in a `Condition`; strike bookkeeping, metrics
//!   and the payload envelope live in `StrikeMonitor`
//! - The callback fires on `strikes > max_strikes`, so a condition must hold
//!   for `max_strikes + 1` ticks before remediation

use std::sync::Arc;

use serde_json::Value;

use crate::memory::process::ProcessMemory;
use crate::observability::metrics;

/// Key/value details describing a violation.
pub type Payload = serde_json::Map<String, Value>;

/// A measurable process condition sampled once per tick.
pub trait Condition: Send {
    /// Sample the current state. Called at the start of every tick.
    fn refresh_state(&mut self) {}

    /// Whether the last sample violates the configured limit.
    fn above_the_limit(&self) -> bool {
        false
    }

    /// Condition-specific payload entries.
    fn payload(&self) -> Payload {
        Payload::new()
    }
}

/// Outcome of one monitor tick.
#[derive(Debug, Clone, PartialEq)]
pub enum Tick {
    /// The condition is within its limit; strikes were reset.
    WithinLimit,
    /// The condition is violated but the callback did not fire.
    Violation { strikes: u32 },
    /// The callback fired with this payload; strikes were reset.
    Handled(Payload),
}

/// A monitor the watchdog can drive without knowing its condition type.
pub trait Monitor: Send {
    /// Run one tick, invoking `callback` if strikes exceed the maximum.
    fn call(&mut self, callback: Option<&mut dyn FnMut(&Payload)>) -> Tick;

    /// Label identifying the monitored condition.
    fn reason(&self) -> &str;

    fn strikes(&self) -> u32;

    fn max_strikes(&self) -> u32;
}

/// Wraps a `Condition` with consecutive-violation counting.
pub struct StrikeMonitor<C> {
    condition: C,
    max_strikes: u32,
    strikes: u32,
    reason: String,
    worker_id: String,
    memory: Arc<dyn ProcessMemory>,
}

impl<C: Condition> StrikeMonitor<C> {
    pub fn new(
        condition: C,
        max_strikes: u32,
        worker_id: impl Into<String>,
        memory: Arc<dyn ProcessMemory>,
    ) -> Self {
        Self {
            condition,
            max_strikes,
            strikes: 0,
            reason: reason_for::<C>(),
            worker_id: worker_id.into(),
            memory,
        }
    }

    pub fn condition(&self) -> &C {
        &self.condition
    }

    pub fn above_the_limit(&self) -> bool {
        self.condition.above_the_limit()
    }

    /// Common violation details merged with the condition's own entries.
    pub fn payload(&self) -> Payload {
        let mut payload = Payload::new();
        payload.insert("worker_id".into(), Value::from(self.worker_id.clone()));
        payload.insert("memwd_max_strikes".into(), Value::from(self.max_strikes));
        payload.insert("memwd_cur_strikes".into(), Value::from(self.strikes));
        payload.insert("memwd_rss_bytes".into(), Value::from(self.memory.rss_bytes()));

        payload.extend(self.condition.payload());
        payload
    }

    fn update_strikes(&mut self) {
        if self.above_the_limit() {
            self.strikes = self.strikes.saturating_add(1);
        } else {
            self.strikes = 0;
        }
    }
}

impl<C: Condition> Monitor for StrikeMonitor<C> {
    fn call(&mut self, callback: Option<&mut dyn FnMut(&Payload)>) -> Tick {
        self.condition.refresh_state();
        self.update_strikes();

        if !self.above_the_limit() {
            return Tick::WithinLimit;
        }

        metrics::record_violation(&self.worker_id, &self.reason);

        let callback = match callback {
            Some(callback) if self.strikes > self.max_strikes => callback,
            _ => {
                return Tick::Violation {
                    strikes: self.strikes,
                }
            }
        };

        metrics::record_violation_handled(&self.worker_id, &self.reason);

        let payload = self.payload();
        callback(&payload);
        self.strikes = 0;

        Tick::Handled(payload)
    }

    fn reason(&self) -> &str {
        &self.reason
    }

    fn strikes(&self) -> u32 {
        self.strikes
    }

    fn max_strikes(&self) -> u32 {
        self.max_strikes
    }
}

/// snake_case form of a type's bare name, e.g. `HeapFragmentation` → `heap_fragmentation`.
fn reason_for<C>() -> String {
    let full = std::any::type_name::<C>();
    let bare = full.split('<').next().unwrap_or(full);
    let name = bare.rsplit("::").next().unwrap_or(bare);

    let mut reason = String::with_capacity(name.len() + 4);
    for (i, ch) in name.chars().enumerate() {
        if ch.is_ascii_uppercase() {
            if i > 0 {
                reason.push('_');
            }
            reason.push(ch.to_ascii_lowercase());
        } else {
            reason.push(ch);
        }
    }
    reason
}
