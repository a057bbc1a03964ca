//! tokio-postgres backed connection pool.
//!
//! # Responsibilities
//! - Hand out at most `size` connections to one server
//! - Reuse idle clients, connect lazily on demand
//! - Map driver errors onto `DbError` kinds
//! - Bound the startup handshake and every query by `query_timeout`
//!
//! # Design Decisions
//! - Slots are reserved with a CAS loop before connecting, so `size` is a hard cap
//! - `disconnect` bumps a generation counter; clients checked out before the
//!   disconnect are closed when they come back instead of being reused

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use tokio::time;
use tokio_postgres::{Client, Config, NoTls, SimpleQueryMessage};

use crate::load_balancing::pool::{Connection, ConnectionPool, DbError, Row};

/// Build a driver configuration for one server.
pub fn pg_config(
    host: &str,
    port: u16,
    database: &str,
    user: &str,
    password: Option<&str>,
    connect_timeout: Duration,
) -> Config {
    let mut config = Config::new();
    config
        .host(host)
        .port(port)
        .dbname(database)
        .user(user)
        .application_name("replica-watchdog")
        .connect_timeout(connect_timeout);

    if let Some(password) = password {
        config.password(password);
    }

    config
}

fn classify(error: tokio_postgres::Error) -> DbError {
    if let Some(db_error) = error.as_db_error() {
        DbError::StatementInvalid(format!("{}: {}", db_error.code().code(), db_error.message()))
    } else if error.is_closed() {
        DbError::ConnectionNotEstablished(error.to_string())
    } else {
        DbError::Postgres(error.to_string())
    }
}

fn timed_out(what: &str, after: Duration) -> DbError {
    DbError::ConnectionNotEstablished(format!("{} timed out after {:?}", what, after))
}

/// A client checked out of a `PgPool`.
pub struct PgConnection {
    client: Client,
    generation: u64,
    query_timeout: Duration,
}

impl Connection for PgConnection {
    async fn select_row(&mut self, sql: &str) -> Result<Option<Row>, DbError> {
        let messages = time::timeout(self.query_timeout, self.client.simple_query(sql))
            .await
            .map_err(|_| timed_out("query", self.query_timeout))?
            .map_err(classify)?;

        for message in messages {
            if let SimpleQueryMessage::Row(row) = message {
                let mut out = Row::new();
                for (idx, column) in row.columns().iter().enumerate() {
                    if let Some(value) = row.get(idx) {
                        out.insert(column.name().to_string(), value.to_string());
                    }
                }
                return Ok(Some(out));
            }
        }

        Ok(None)
    }
}

/// Connection pool for a single PostgreSQL server.
pub struct PgPool {
    config: Config,
    size: usize,
    query_timeout: Duration,
    idle: Mutex<Vec<Client>>,
    in_use: AtomicUsize,
    generation: AtomicU64,
}

impl PgPool {
    /// Create a pool. No connection is opened until the first `acquire`.
    ///
    /// `query_timeout` bounds both connection setup (TCP plus the startup
    /// handshake) and each query.
    pub fn new(config: Config, size: usize, query_timeout: Duration) -> Self {
        Self {
            config,
            size,
            query_timeout,
            idle: Mutex::new(Vec::with_capacity(size)),
            in_use: AtomicUsize::new(0),
            generation: AtomicU64::new(0),
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Number of idle clients ready for reuse.
    pub fn idle_count(&self) -> usize {
        self.idle.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    fn try_reserve(&self) -> bool {
        let mut prev = self.in_use.load(Ordering::Relaxed);
        loop {
            if prev >= self.size {
                return false;
            }
            match self.in_use.compare_exchange_weak(prev, prev + 1, Ordering::AcqRel, Ordering::Relaxed) {
                Ok(_) => return true,
                Err(x) => prev = x,
            }
        }
    }

    fn take_idle(&self) -> Option<Client> {
        let mut idle = self.idle.lock().unwrap_or_else(|e| e.into_inner());
        while let Some(client) = idle.pop() {
            if !client.is_closed() {
                return Some(client);
            }
        }
        None
    }

    async fn connect(&self) -> Result<Client, DbError> {
        let (client, connection) = time::timeout(self.query_timeout, self.config.connect(NoTls))
            .await
            .map_err(|_| timed_out("connection setup", self.query_timeout))?
            .map_err(|e| DbError::ConnectionNotEstablished(e.to_string()))?;

        tokio::spawn(async move {
            if let Err(e) = connection.await {
                tracing::warn!(error = %e, "PostgreSQL connection closed with error");
            }
        });

        Ok(client)
    }
}

impl ConnectionPool for PgPool {
    type Connection = PgConnection;

    async fn acquire(&self) -> Result<PgConnection, DbError> {
        if !self.try_reserve() {
            return Err(DbError::PoolExhausted { size: self.size });
        }

        let generation = self.generation.load(Ordering::Acquire);

        let client = match self.take_idle() {
            Some(client) => client,
            None => match self.connect().await {
                Ok(client) => client,
                Err(e) => {
                    self.in_use.fetch_sub(1, Ordering::AcqRel);
                    return Err(e);
                }
            },
        };

        Ok(PgConnection {
            client,
            generation,
            query_timeout: self.query_timeout,
        })
    }

    fn release(&self, conn: PgConnection) {
        self.in_use.fetch_sub(1, Ordering::AcqRel);

        let current = self.generation.load(Ordering::Acquire);
        if conn.generation != current || conn.client.is_closed() {
            return;
        }

        let mut idle = self.idle.lock().unwrap_or_else(|e| e.into_inner());
        if idle.len() < self.size {
            idle.push(conn.client);
        }
    }

    fn in_use_count(&self) -> usize {
        self.in_use.load(Ordering::Relaxed)
    }

    fn disconnect(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);

        let dropped = {
            let mut idle = self.idle.lock().unwrap_or_else(|e| e.into_inner());
            std::mem::take(&mut *idle)
        };

        tracing::debug!(closed = dropped.len(), "Disconnected idle pool connections");
    }
}
