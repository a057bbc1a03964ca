//! Process memory sampling.
//!
//! # Responsibilities
//! - Report resident and unique set sizes for this or another process
//! - Estimate heap fragmentation
//!
//! # Design Decisions
//! - Reads Linux `/proc`; unreadable files report zero instead of failing a tick
//! - Parsing is split from file access so it can be tested on fixtures

use std::fs;
use std::path::PathBuf;

/// Source of memory readings for watchdog monitors.
pub trait ProcessMemory: Send + Sync {
    /// Resident set size of the current process, in bytes.
    fn rss_bytes(&self) -> u64;

    /// Unique set size of `pid` (the current process when `None`), in bytes.
    fn uss_bytes(&self, pid: Option<u32>) -> u64;

    /// Heap fragmentation ratio in `[0, 1]`.
    fn heap_fragmentation(&self) -> f64;
}

/// `ProcessMemory` backed by the `/proc` filesystem.
#[derive(Debug, Clone)]
pub struct ProcMemory {
    root: PathBuf,
}

impl Default for ProcMemory {
    fn default() -> Self {
        Self::new("/proc")
    }
}

impl ProcMemory {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn read(&self, pid: Option<u32>, file: &str) -> String {
        let dir = pid.map_or_else(|| "self".to_string(), |pid| pid.to_string());
        let path = self.root.join(dir).join(file);

        match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) => {
                tracing::debug!(path = %path.display(), error = %e, "Failed to read process memory stats");
                String::new()
            }
        }
    }
}

impl ProcessMemory for ProcMemory {
    fn rss_bytes(&self) -> u64 {
        sum_kb_fields(&self.read(None, "status"), &["VmRSS"])
    }

    fn uss_bytes(&self, pid: Option<u32>) -> u64 {
        sum_kb_fields(
            &self.read(pid, "smaps_rollup"),
            &["Private_Clean", "Private_Dirty", "Private_Hugetlb"],
        )
    }

    fn heap_fragmentation(&self) -> f64 {
        heap_fragmentation(&self.read(None, "smaps"))
    }
}

/// Sum `Key:   123 kB` lines for the given keys, returned in bytes.
pub fn sum_kb_fields(text: &str, keys: &[&str]) -> u64 {
    text.lines()
        .filter_map(|line| {
            let (key, value) = line.split_once(':')?;
            if !keys.contains(&key.trim()) {
                return None;
            }
            value.split_whitespace().next()?.parse::<u64>().ok()
        })
        .sum::<u64>()
        * 1024
}

/// Fraction of the `[heap]` mapping that is reserved but not resident.
///
/// Returns 0 when the process has no `[heap]` mapping.
pub fn heap_fragmentation(smaps: &str) -> f64 {
    let mut in_heap = false;
    let mut size = None;
    let mut rss = None;

    for line in smaps.lines() {
        let is_header = line
            .split_whitespace()
            .next()
            .is_some_and(|first| first.contains('-') && !first.ends_with(':'));

        if is_header {
            if in_heap {
                break;
            }
            in_heap = line.trim_end().ends_with("[heap]");
            continue;
        }

        if in_heap {
            if line.starts_with("Size:") {
                size = Some(sum_kb_fields(line, &["Size"]));
            } else if line.starts_with("Rss:") {
                rss = Some(sum_kb_fields(line, &["Rss"]));
            }
        }
    }

    match (size, rss) {
        (Some(size), Some(rss)) if size > 0 => (1.0 - rss as f64 / size as f64).clamp(0.0, 1.0),
        _ => 0.0,
    }
}
