//! Heap fragmentation limit.

use std::sync::Arc;

use serde_json::Value;

use crate::memory::process::ProcessMemory;
use crate::memory::watchdog::monitor::{Condition, Payload};
use crate::observability::metrics;

pub const DEFAULT_MAX_HEAP_FRAGMENTATION: f64 = 0.5;

/// Violated while the sampled heap fragmentation ratio exceeds the limit.
pub struct HeapFragmentation {
    memory: Arc<dyn ProcessMemory>,
    max_heap_fragmentation: f64,
    fragmentation: f64,
}

impl HeapFragmentation {
    pub fn new(memory: Arc<dyn ProcessMemory>, max_heap_fragmentation: f64) -> Self {
        metrics::set_max_heap_fragmentation(max_heap_fragmentation);

        Self {
            memory,
            max_heap_fragmentation,
            fragmentation: 0.0,
        }
    }

    /// The most recent sample.
    pub fn fragmentation(&self) -> f64 {
        self.fragmentation
    }

    pub fn max_heap_fragmentation(&self) -> f64 {
        self.max_heap_fragmentation
    }
}

impl Condition for HeapFragmentation {
    fn refresh_state(&mut self) {
        self.fragmentation = self.memory.heap_fragmentation();
    }

    fn above_the_limit(&self) -> bool {
        self.fragmentation > self.max_heap_fragmentation
    }

    fn payload(&self) -> Payload {
        let mut payload = Payload::new();
        payload.insert("message".into(), Value::from("heap fragmentation limit exceeded"));
        payload.insert("memwd_cur_heap_frag".into(), Value::from(self.fragmentation));
        payload.insert("memwd_max_heap_frag".into(), Value::from(self.max_heap_fragmentation));
        payload
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::watchdog::monitor::{Monitor, StrikeMonitor, Tick};
    use std::sync::Mutex;

    struct FragmentationFeed(Mutex<Vec<f64>>);

    impl ProcessMemory for FragmentationFeed {
        fn rss_bytes(&self) -> u64 {
            1024
        }

        fn uss_bytes(&self, _pid: Option<u32>) -> u64 {
            0
        }

        fn heap_fragmentation(&self) -> f64 {
            let mut feed = self.0.lock().unwrap();
            if feed.is_empty() {
                0.0
            } else {
                feed.remove(0)
            }
        }
    }

    #[test]
    fn test_limit_is_exclusive() {
        let memory = Arc::new(FragmentationFeed(Mutex::new(vec![0.5, 0.51])));
        let mut condition = HeapFragmentation::new(memory, DEFAULT_MAX_HEAP_FRAGMENTATION);

        condition.refresh_state();
        assert!(!condition.above_the_limit());

        condition.refresh_state();
        assert!(condition.above_the_limit());
        assert_eq!(condition.fragmentation(), 0.51);
    }

    #[test]
    fn test_fires_with_fragmentation_payload() {
        let memory = Arc::new(FragmentationFeed(Mutex::new(vec![0.8, 0.8, 0.8])));
        let condition = HeapFragmentation::new(memory.clone(), 0.5);
        let mut monitor = StrikeMonitor::new(condition, 2, "puma_1", memory);
        let mut seen = None;

        monitor.call(None);
        monitor.call(None);
        let tick = monitor.call(Some(&mut |payload: &Payload| seen = Some(payload.clone())));

        assert!(matches!(tick, Tick::Handled(_)));
        assert_eq!(monitor.reason(), "heap_fragmentation");

        let payload = seen.unwrap();
        assert_eq!(payload["message"], "heap fragmentation limit exceeded");
        assert_eq!(payload["memwd_cur_heap_frag"], 0.8);
        assert_eq!(payload["memwd_max_heap_frag"], 0.5);
        assert_eq!(payload["memwd_cur_strikes"], 3);
    }
}
