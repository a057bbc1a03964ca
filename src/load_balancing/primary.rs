//! Primary database write location lookup.

use crate::load_balancing::lsn::Lsn;
use crate::load_balancing::pool::{query_first_row, ConnectionPool, DbError};

/// Reports the current WAL write position of a cascading replica that
/// feeds WAL senders, or the insert position of a real primary.
const WRITE_LOCATION_SQL: &str = "SELECT CASE \
     WHEN pg_is_in_recovery() = true AND EXISTS (SELECT 1 FROM pg_stat_get_wal_senders()) \
     THEN pg_last_wal_replay_lsn()::text \
     WHEN pg_is_in_recovery() = false \
     THEN pg_current_wal_insert_lsn()::text \
     ELSE NULL \
     END AS location";

/// Handle on the primary database, used to measure replica byte lag.
pub struct Primary<P> {
    pool: P,
}

impl<P: ConnectionPool> Primary<P> {
    pub fn new(pool: P) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &P {
        &self.pool
    }

    /// Fetch the primary's current write location.
    ///
    /// A primary that cannot report a location is a misconfiguration, not a
    /// connectivity problem, so that case surfaces as `DbError::Unexpected`.
    pub async fn write_location(&self) -> Result<Lsn, DbError> {
        let row = query_first_row(&self.pool, WRITE_LOCATION_SQL).await?;

        let location = row
            .as_ref()
            .and_then(|r| r.get("location"))
            .ok_or_else(|| {
                DbError::Unexpected("failed to determine the write location of the primary database".to_string())
            })?;

        location
            .parse()
            .map_err(|e| DbError::Unexpected(format!("primary reported {}", e)))
    }
}
