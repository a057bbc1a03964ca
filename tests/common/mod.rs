//! Shared test doubles for host and watchdog tests.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use replica_watchdog::load_balancing::{Connection, ConnectionPool, DbError, Lsn, Row};
use replica_watchdog::memory::ProcessMemory;

type Responder = Box<dyn Fn(&str) -> Result<Option<Row>, DbError> + Send + Sync>;

#[derive(Default)]
struct Shared {
    responders: Mutex<Vec<(String, Responder)>>,
    hangs: Mutex<Vec<String>>,
    queries: Mutex<Vec<String>>,
    acquire_error: Mutex<Option<DbError>>,
    acquired: AtomicUsize,
    released: AtomicUsize,
    in_use: AtomicUsize,
    pinned: AtomicUsize,
    disconnects: AtomicUsize,
}

/// Scripted pool: queries are answered by the first responder whose pattern
/// the SQL contains; unmatched queries return no row.
#[derive(Clone, Default)]
pub struct MockPool {
    shared: Arc<Shared>,
}

impl MockPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on<F>(&self, pattern: &str, responder: F) -> &Self
    where
        F: Fn(&str) -> Result<Option<Row>, DbError> + Send + Sync + 'static,
    {
        self.shared
            .responders
            .lock()
            .unwrap()
            .push((pattern.to_string(), Box::new(responder)));
        self
    }

    /// Answer queries containing `pattern` with a single-column row.
    pub fn respond(&self, pattern: &str, column: &str, value: &str) -> &Self {
        let row = row(&[(column, value)]);
        self.on(pattern, move |_| Ok(Some(row.clone())))
    }

    /// Queries containing `pattern` never complete.
    pub fn hang(&self, pattern: &str) {
        self.shared.hangs.lock().unwrap().push(pattern.to_string());
    }

    pub fn fail_acquire(&self, error: DbError) {
        *self.shared.acquire_error.lock().unwrap() = Some(error);
    }

    /// Report `n` extra connections as checked out.
    pub fn pin_in_use(&self, n: usize) {
        self.shared.pinned.store(n, Ordering::SeqCst);
    }

    pub fn queries(&self) -> Vec<String> {
        self.shared.queries.lock().unwrap().clone()
    }

    pub fn query_count(&self, pattern: &str) -> usize {
        self.queries().iter().filter(|sql| sql.contains(pattern)).count()
    }

    pub fn acquired(&self) -> usize {
        self.shared.acquired.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> usize {
        self.shared.released.load(Ordering::SeqCst)
    }

    pub fn disconnects(&self) -> usize {
        self.shared.disconnects.load(Ordering::SeqCst)
    }
}

pub struct MockConnection {
    shared: Arc<Shared>,
}

impl Connection for MockConnection {
    async fn select_row(&mut self, sql: &str) -> Result<Option<Row>, DbError> {
        self.shared.queries.lock().unwrap().push(sql.to_string());

        let hangs = self.shared.hangs.lock().unwrap().iter().any(|p| sql.contains(p.as_str()));
        if hangs {
            std::future::pending::<()>().await;
        }

        let responders = self.shared.responders.lock().unwrap();
        match responders.iter().find(|(pattern, _)| sql.contains(pattern.as_str())) {
            Some((_, responder)) => responder(sql),
            None => Ok(None),
        }
    }
}

impl ConnectionPool for MockPool {
    type Connection = MockConnection;

    async fn acquire(&self) -> Result<MockConnection, DbError> {
        if let Some(error) = self.shared.acquire_error.lock().unwrap().clone() {
            return Err(error);
        }

        self.shared.acquired.fetch_add(1, Ordering::SeqCst);
        self.shared.in_use.fetch_add(1, Ordering::SeqCst);
        Ok(MockConnection {
            shared: Arc::clone(&self.shared),
        })
    }

    fn release(&self, _conn: MockConnection) {
        self.shared.released.fetch_add(1, Ordering::SeqCst);
        self.shared.in_use.fetch_sub(1, Ordering::SeqCst);
    }

    fn in_use_count(&self) -> usize {
        self.shared.in_use.load(Ordering::SeqCst) + self.shared.pinned.load(Ordering::SeqCst)
    }

    fn disconnect(&self) {
        self.shared.disconnects.fetch_add(1, Ordering::SeqCst);
    }
}

pub fn row(columns: &[(&str, &str)]) -> Row {
    columns
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect::<HashMap<_, _>>()
}

/// Extract the `'X/Y'::pg_lsn` literal from a byte-lag query.
pub fn lsn_literal(sql: &str) -> Option<Lsn> {
    let start = sql.find('\'')? + 1;
    let end = start + sql[start..].find('\'')?;
    sql[start..end].parse().ok()
}

/// Replica answering byte-lag queries as if it had replayed up to `replayed`.
pub fn replica_at(pool: &MockPool, replayed: u64) {
    pool.on("pg_wal_lsn_diff", move |sql| {
        let location = lsn_literal(sql).ok_or_else(|| DbError::StatementInvalid(sql.to_string()))?;
        let diff = location.diff(Lsn::new(replayed));
        let diff = format!("{}.0", diff);
        Ok(Some(row(&[("diff", diff.as_str())])))
    });
}

/// Primary reporting `location` as its write position.
pub fn primary_at(pool: &MockPool, location: u64) {
    pool.respond("AS location", "location", &Lsn::new(location).to_string());
}

/// Memory readings set directly by the test.
#[derive(Default)]
pub struct FakeMemory {
    pub rss: AtomicU64,
    pub uss: AtomicU64,
    pub reference_uss: AtomicU64,
    /// Fragmentation in parts per million.
    pub fragmentation_ppm: AtomicU64,
}

impl FakeMemory {
    pub fn set_uss(&self, bytes: u64) {
        self.uss.store(bytes, Ordering::SeqCst);
    }

    pub fn set_fragmentation(&self, ratio: f64) {
        self.fragmentation_ppm
            .store((ratio * 1_000_000.0) as u64, Ordering::SeqCst);
    }
}

impl ProcessMemory for FakeMemory {
    fn rss_bytes(&self) -> u64 {
        self.rss.load(Ordering::SeqCst)
    }

    fn uss_bytes(&self, pid: Option<u32>) -> u64 {
        match pid {
            Some(_) => self.reference_uss.load(Ordering::SeqCst),
            None => self.uss.load(Ordering::SeqCst),
        }
    }

    fn heap_fragmentation(&self) -> f64 {
        self.fragmentation_ppm.load(Ordering::SeqCst) as f64 / 1_000_000.0
    }
}
