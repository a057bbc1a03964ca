//! Connection pool surface used by replica health probes.
//!
//! # Responsibilities
//! - Define the narrow pool/connection interface a `Host` owns
//! - Classify database failures into connection-class and unexpected kinds
//! - Return every acquired connection to its pool
//!
//! # Design Decisions
//! - Release happens in `Drop`, so errors, panics and cancelled futures release too
//! - Rows are text maps; callers parse the columns they selected

use std::collections::HashMap;
use std::future::Future;

/// A single result row, column name to text value. NULL columns are absent.
pub type Row = HashMap<String, String>;

/// Error returned by the database access layer.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DbError {
    #[error("connection not established: {0}")]
    ConnectionNotEstablished(String),
    #[error("statement invalid: {0}")]
    StatementInvalid(String),
    #[error("postgres error: {0}")]
    Postgres(String),
    #[error("connection pool exhausted: {size} connections in use")]
    PoolExhausted { size: usize },
    #[error("{0}")]
    Unexpected(String),
}

impl DbError {
    /// Connection-class errors are expected while a replica is unreachable
    /// and are handled locally instead of propagated.
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            DbError::ConnectionNotEstablished(_) | DbError::StatementInvalid(_) | DbError::Postgres(_)
        )
    }
}

/// A checked-out database connection.
pub trait Connection: Send {
    /// Run `sql` and return its first row, if any.
    fn select_row(&mut self, sql: &str) -> impl Future<Output = Result<Option<Row>, DbError>> + Send;
}

/// A pool of connections to one database server.
pub trait ConnectionPool: Send + Sync {
    type Connection: Connection;

    /// Check out a connection.
    fn acquire(&self) -> impl Future<Output = Result<Self::Connection, DbError>> + Send;

    /// Return a connection previously handed out by `acquire`.
    fn release(&self, conn: Self::Connection);

    /// Number of connections currently checked out.
    fn in_use_count(&self) -> usize;

    /// Close every connection the pool holds.
    fn disconnect(&self);
}

/// A RAII guard that hands its connection back to the pool on drop.
pub struct Lease<'a, P: ConnectionPool> {
    pool: &'a P,
    conn: Option<P::Connection>,
}

impl<'a, P: ConnectionPool> Lease<'a, P> {
    /// Check out a connection from `pool`.
    pub async fn acquire(pool: &'a P) -> Result<Self, DbError> {
        let conn = pool.acquire().await?;
        Ok(Self {
            pool,
            conn: Some(conn),
        })
    }

    /// Run a query on the leased connection.
    pub async fn select_row(&mut self, sql: &str) -> Result<Option<Row>, DbError> {
        match self.conn.as_mut() {
            Some(conn) => conn.select_row(sql).await,
            None => Err(DbError::Unexpected("connection already released".to_string())),
        }
    }
}

impl<P: ConnectionPool> Drop for Lease<'_, P> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.release(conn);
        }
    }
}

/// Run `sql` on a pooled connection and return the first row.
///
/// The connection is released before this returns, whatever the outcome.
pub async fn query_first_row<P: ConnectionPool>(pool: &P, sql: &str) -> Result<Option<Row>, DbError> {
    let mut lease = Lease::acquire(pool).await?;
    lease.select_row(sql).await
}
