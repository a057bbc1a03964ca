//! Unique set size growth relative to a startup baseline.
//!
//! The baseline is the USS of a reference process (typically the pre-fork
//! parent), captured on the first tick and never refreshed. Growth is
//! measured against that fixed point, so slow leaks accumulate toward the
//! limit instead of being absorbed by a sliding window.

use std::sync::{Arc, OnceLock};

use serde_json::Value;

use crate::memory::process::ProcessMemory;
use crate::memory::watchdog::monitor::{Condition, Payload};
use crate::observability::metrics;

pub const DEFAULT_MAX_MEM_GROWTH: f64 = 3.0;

/// Violated while this process's USS exceeds `max_mem_growth` times the reference USS.
pub struct MemoryGrowth {
    memory: Arc<dyn ProcessMemory>,
    max_mem_growth: f64,
    reference_pid: Option<u32>,
    reference_uss: OnceLock<u64>,
    current_uss: u64,
    memory_limit: u64,
}

impl MemoryGrowth {
    /// `reference_pid` of `None` uses the current process as the baseline.
    pub fn new(memory: Arc<dyn ProcessMemory>, max_mem_growth: f64, reference_pid: Option<u32>) -> Self {
        metrics::set_max_mem_growth(max_mem_growth);

        Self {
            memory,
            max_mem_growth,
            reference_pid,
            reference_uss: OnceLock::new(),
            current_uss: 0,
            memory_limit: 0,
        }
    }

    /// The baseline, once captured.
    pub fn reference_uss(&self) -> Option<u64> {
        self.reference_uss.get().copied()
    }

    pub fn current_uss(&self) -> u64 {
        self.current_uss
    }

    pub fn memory_limit(&self) -> u64 {
        self.memory_limit
    }
}

impl Condition for MemoryGrowth {
    /// A zero reading is a failed read, not a baseline; capture is retried
    /// on the next tick and the limit stays unset until then.
    fn refresh_state(&mut self) {
        self.current_uss = self.memory.uss_bytes(None);

        let reference = match self.reference_uss.get() {
            Some(reference) => *reference,
            None => {
                let reading = self.memory.uss_bytes(self.reference_pid);
                if reading == 0 {
                    tracing::warn!(
                        reference_pid = ?self.reference_pid,
                        "Reference USS unavailable, memory growth not checked this tick"
                    );
                    self.memory_limit = 0;
                    return;
                }
                *self.reference_uss.get_or_init(|| reading)
            }
        };

        self.memory_limit = (self.max_mem_growth * reference as f64) as u64;
    }

    /// Without a captured baseline nothing is compared.
    fn above_the_limit(&self) -> bool {
        self.memory_limit > 0 && self.current_uss > self.memory_limit
    }

    fn payload(&self) -> Payload {
        let mut payload = Payload::new();
        payload.insert("message".into(), Value::from("memory limit exceeded"));
        payload.insert("memwd_uss_bytes".into(), Value::from(self.current_uss));
        payload.insert("memwd_ref_uss_bytes".into(), Value::from(self.reference_uss().unwrap_or(0)));
        payload.insert("memwd_max_uss_bytes".into(), Value::from(self.memory_limit));
        payload
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

    const MB: u64 = 1024 * 1024;

    struct UssFeed {
        reference: AtomicU64,
        current: AtomicU64,
        reference_reads: AtomicUsize,
    }

    impl ProcessMemory for UssFeed {
        fn rss_bytes(&self) -> u64 {
            0
        }

        fn uss_bytes(&self, pid: Option<u32>) -> u64 {
            match pid {
                Some(_) => {
                    self.reference_reads.fetch_add(1, Ordering::SeqCst);
                    self.reference.load(Ordering::SeqCst)
                }
                None => self.current.load(Ordering::SeqCst),
            }
        }

        fn heap_fragmentation(&self) -> f64 {
            0.0
        }
    }

    fn feed(reference: u64, current: u64) -> Arc<UssFeed> {
        Arc::new(UssFeed {
            reference: AtomicU64::new(reference),
            current: AtomicU64::new(current),
            reference_reads: AtomicUsize::new(0),
        })
    }

    #[test]
    fn test_limit_from_reference() {
        let memory = feed(100 * MB, 250 * MB);
        let mut condition = MemoryGrowth::new(memory.clone(), DEFAULT_MAX_MEM_GROWTH, Some(1));

        condition.refresh_state();
        assert_eq!(condition.memory_limit(), 300 * MB);
        assert!(!condition.above_the_limit());

        memory.current.store(350 * MB, Ordering::SeqCst);
        condition.refresh_state();
        assert!(condition.above_the_limit());
    }

    #[test]
    fn test_reference_captured_once() {
        let memory = feed(100 * MB, 120 * MB);
        let mut condition = MemoryGrowth::new(memory.clone(), 2.0, Some(1));

        for _ in 0..5 {
            condition.refresh_state();
        }

        assert_eq!(memory.reference_reads.load(Ordering::SeqCst), 1);
        assert_eq!(condition.reference_uss(), Some(100 * MB));
    }

    #[test]
    fn test_unreadable_reference_is_within_limit() {
        let memory = feed(0, 500 * MB);
        let mut condition = MemoryGrowth::new(memory, 3.0, Some(1));

        condition.refresh_state();
        assert!(!condition.above_the_limit());
        assert_eq!(condition.reference_uss(), None);
        assert_eq!(condition.memory_limit(), 0);
    }

    #[test]
    fn test_reference_captured_after_failed_read() {
        let memory = feed(0, 350 * MB);
        let mut condition = MemoryGrowth::new(memory.clone(), 3.0, Some(1));

        condition.refresh_state();
        assert!(!condition.above_the_limit());

        memory.reference.store(100 * MB, Ordering::SeqCst);
        condition.refresh_state();

        assert_eq!(condition.reference_uss(), Some(100 * MB));
        assert_eq!(condition.memory_limit(), 300 * MB);
        assert!(condition.above_the_limit());

        // Captured once: later reference changes are ignored.
        memory.reference.store(500 * MB, Ordering::SeqCst);
        condition.refresh_state();
        assert_eq!(condition.reference_uss(), Some(100 * MB));
        assert_eq!(memory.reference_reads.load(Ordering::SeqCst), 2);
    }
}
