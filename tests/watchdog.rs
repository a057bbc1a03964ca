//! Memory watchdog tests driven by fake memory readings.

use std::sync::Arc;
use std::time::Duration;

use replica_watchdog::lifecycle::Shutdown;
use replica_watchdog::memory::watchdog::monitors::{HeapFragmentation, MemoryGrowth};
use replica_watchdog::memory::watchdog::{
    LogOnlyHandler, Monitor, Payload, ShutdownHandler, StrikeMonitor, Tick, ViolationHandler, Watchdog,
};
use tokio::time;

mod common;

use common::FakeMemory;

const MB: u64 = 1024 * 1024;

fn memory(reference_uss: u64, uss: u64) -> Arc<FakeMemory> {
    let memory = Arc::new(FakeMemory::default());
    memory.reference_uss.store(reference_uss, std::sync::atomic::Ordering::SeqCst);
    memory.set_uss(uss);
    memory.rss.store(512 * MB, std::sync::atomic::Ordering::SeqCst);
    memory
}

fn growth_monitor(memory: &Arc<FakeMemory>, max_strikes: u32) -> StrikeMonitor<MemoryGrowth> {
    let condition = MemoryGrowth::new(memory.clone(), 3.0, Some(1));
    StrikeMonitor::new(condition, max_strikes, "puma_0", memory.clone())
}

/// Counts calls and optionally asks the watchdog to stop.
struct Recording {
    reasons: Arc<std::sync::Mutex<Vec<String>>>,
    stop: bool,
}

impl ViolationHandler for Recording {
    fn handle(&mut self, reason: &str, _payload: &Payload) -> bool {
        self.reasons.lock().unwrap().push(reason.to_string());
        self.stop
    }

    fn name(&self) -> &'static str {
        "recording"
    }
}

#[test]
fn test_memory_growth_fires_after_strikes() {
    let memory = memory(100 * MB, 350 * MB);
    let mut monitor = growth_monitor(&memory, 4);
    let mut payloads = Vec::new();

    for _ in 0..4 {
        let tick = monitor.call(Some(&mut |payload: &Payload| payloads.push(payload.clone())));
        assert!(matches!(tick, Tick::Violation { .. }));
    }
    assert!(payloads.is_empty());

    let tick = monitor.call(Some(&mut |payload: &Payload| payloads.push(payload.clone())));
    assert!(matches!(tick, Tick::Handled(_)));
    assert_eq!(payloads.len(), 1);

    let payload = &payloads[0];
    assert_eq!(payload["message"], "memory limit exceeded");
    assert_eq!(payload["memwd_uss_bytes"], 350 * MB);
    assert_eq!(payload["memwd_ref_uss_bytes"], 100 * MB);
    assert_eq!(payload["memwd_max_uss_bytes"], 300 * MB);
    assert_eq!(payload["memwd_cur_strikes"], 5);
    assert_eq!(payload["memwd_max_strikes"], 4);
    assert_eq!(payload["memwd_rss_bytes"], 512 * MB);
    assert_eq!(payload["worker_id"], "puma_0");
    assert_eq!(monitor.strikes(), 0);
    assert_eq!(monitor.reason(), "memory_growth");
}

#[test]
fn test_memory_dip_resets_strikes() {
    let memory = memory(100 * MB, 350 * MB);
    let mut monitor = growth_monitor(&memory, 2);

    monitor.call(None);
    monitor.call(None);
    assert_eq!(monitor.strikes(), 2);

    memory.set_uss(250 * MB);
    assert_eq!(monitor.call(None), Tick::WithinLimit);
    assert_eq!(monitor.strikes(), 0);
}

#[test]
fn test_heap_fragmentation_monitor() {
    let memory = memory(0, 0);
    memory.set_fragmentation(0.8);
    let condition = HeapFragmentation::new(memory.clone(), 0.5);
    let mut monitor = StrikeMonitor::new(condition, 0, "puma_1", memory.clone());

    let mut seen = None;
    let tick = monitor.call(Some(&mut |payload: &Payload| seen = Some(payload.clone())));

    assert!(matches!(tick, Tick::Handled(_)));
    let payload = seen.unwrap();
    assert_eq!(payload["message"], "heap fragmentation limit exceeded");
    assert_eq!(payload["memwd_max_heap_frag"], 0.5);
    assert_eq!(monitor.reason(), "heap_fragmentation");
}

#[test]
fn test_tick_stops_at_first_stopping_handler() {
    let memory = memory(100 * MB, 350 * MB);
    memory.set_fragmentation(0.9);
    let reasons = Arc::new(std::sync::Mutex::new(Vec::new()));

    let handler = Recording {
        reasons: reasons.clone(),
        stop: true,
    };
    let mut watchdog = Watchdog::new(Duration::from_secs(60), Box::new(handler))
        .with_monitor(StrikeMonitor::new(
            HeapFragmentation::new(memory.clone(), 0.5),
            0,
            "puma_0",
            memory.clone(),
        ))
        .with_monitor(growth_monitor(&memory, 0));

    assert!(watchdog.tick());
    assert_eq!(*reasons.lock().unwrap(), vec!["heap_fragmentation".to_string()]);
    // The growth monitor never ran.
    assert_eq!(watchdog.monitors()[1].strikes(), 0);
}

#[test]
fn test_log_only_handler_keeps_ticking() {
    let memory = memory(100 * MB, 350 * MB);
    let mut watchdog =
        Watchdog::new(Duration::from_secs(60), Box::new(LogOnlyHandler)).with_monitor(growth_monitor(&memory, 1));

    for _ in 0..6 {
        assert!(!watchdog.tick());
    }
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_handler_stops_run_and_signals() {
    let memory = memory(100 * MB, 350 * MB);
    let shutdown = Shutdown::new();
    let mut signal = shutdown.subscribe();

    let watchdog = Watchdog::new(Duration::from_secs(60), Box::new(ShutdownHandler::new(shutdown.clone())))
        .with_monitor(growth_monitor(&memory, 2));

    let task = tokio::spawn(watchdog.run(shutdown.subscribe()));

    // Fires on the third tick, three intervals in.
    time::timeout(Duration::from_secs(181), task).await.unwrap().unwrap();
    assert!(signal.recv().await.is_ok());
}

#[tokio::test(start_paused = true)]
async fn test_run_exits_on_shutdown() {
    let memory = memory(100 * MB, 120 * MB);
    let shutdown = Shutdown::new();

    let watchdog =
        Watchdog::new(Duration::from_secs(60), Box::new(LogOnlyHandler)).with_monitor(growth_monitor(&memory, 5));
    let task = tokio::spawn(watchdog.run(shutdown.subscribe()));

    time::sleep(Duration::from_secs(600)).await;
    assert!(!task.is_finished());

    shutdown.trigger();
    task.await.unwrap();
}
