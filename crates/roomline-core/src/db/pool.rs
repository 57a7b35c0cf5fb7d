//! Connection pool for a cache database.
//!
//! Uses `r2d2` with the `r2d2_sqlite` backend. Every connection the pool
//! opens is configured through [`configure_connection`], so pooled
//! connections carry the same pragmas as the migrating one.

use std::path::Path;
use std::time::Duration;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::Connection;

use super::configure_connection;

/// Pool of cache connections.
pub type ConnectionPool = Pool<SqliteConnectionManager>;

/// A connection checked out of a [`ConnectionPool`]; returned on drop.
pub type PooledConnection = r2d2::PooledConnection<SqliteConnectionManager>;

/// Applies the cache pragmas to every connection the pool opens.
#[derive(Debug)]
struct PragmaCustomizer {
    busy_timeout: Duration,
}

impl r2d2::CustomizeConnection<Connection, rusqlite::Error> for PragmaCustomizer {
    fn on_acquire(&self, conn: &mut Connection) -> Result<(), rusqlite::Error> {
        configure_connection(conn, self.busy_timeout)
    }
}

/// Build a pool over the database file at `path`.
///
/// `max_size` is clamped to at least one connection. Checkout waits up to
/// `busy_timeout` for a free connection.
///
/// # Errors
///
/// Returns an error if the initial connection cannot be opened or
/// configured.
pub fn open_pool(path: &Path, busy_timeout: Duration, max_size: usize) -> Result<ConnectionPool, r2d2::Error> {
    let max_size = u32::try_from(max_size.max(1)).unwrap_or(u32::MAX);
    Pool::builder()
        .max_size(max_size)
        .min_idle(Some(1))
        .connection_timeout(busy_timeout.max(Duration::from_millis(100)))
        .connection_customizer(Box::new(PragmaCustomizer { busy_timeout }))
        .build(SqliteConnectionManager::file(path))
}

#[cfg(test)]
mod tests {
    use super::open_pool;
    use crate::db::{DEFAULT_BUSY_TIMEOUT, open_cache};

    #[test]
    fn pooled_connections_carry_cache_pragmas() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("timeline.sqlite3");
        drop(open_cache(&path, DEFAULT_BUSY_TIMEOUT).expect("create cache"));

        let pool = open_pool(&path, DEFAULT_BUSY_TIMEOUT, 2).expect("pool");
        let conn = pool.get().expect("checkout");
        let foreign_keys: i64 = conn
            .pragma_query_value(None, "foreign_keys", |row| row.get(0))
            .expect("query foreign_keys");
        assert_eq!(foreign_keys, 1);
        let journal_mode: String = conn
            .pragma_query_value(None, "journal_mode", |row| row.get(0))
            .expect("query journal_mode");
        assert_eq!(journal_mode.to_ascii_lowercase(), "wal");
    }

    #[test]
    fn zero_size_is_clamped_to_one() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("timeline.sqlite3");
        drop(open_cache(&path, DEFAULT_BUSY_TIMEOUT).expect("create cache"));

        let pool = open_pool(&path, DEFAULT_BUSY_TIMEOUT, 0).expect("pool");
        assert_eq!(pool.max_size(), 1);
    }
}
