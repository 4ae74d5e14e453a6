//! Pooled `SQLite` handles for the dispatch store.
//!
//! Every handle the pool hands out has gone through [`DispatchPragmas`], so
//! cascade deletes and CHECK constraints hold no matter which handle a
//! repository call lands on.

use std::time::Duration;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::Connection;

use crate::errors::Result;

/// Pool of dispatch store connections.
pub type ConnectionPool = Pool<SqliteConnectionManager>;

/// One connection checked out of a [`ConnectionPool`].
pub type PooledConnection = r2d2::PooledConnection<SqliteConnectionManager>;

/// Pool sizing and lock behaviour.
#[derive(Clone, Debug)]
pub struct ConnectionConfig {
    /// Upper bound on open connections for file-backed stores.
    pub pool_size: u32,
    /// How long a statement waits on a locked database before failing.
    pub busy_timeout_ms: u32,
    /// How long `pool.get()` waits for a free connection.
    pub acquire_timeout: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            pool_size: 16,
            busy_timeout_ms: 30_000,
            acquire_timeout: Duration::from_secs(5),
        }
    }
}

/// Applied to each connection as the pool opens it.
#[derive(Debug)]
struct DispatchPragmas {
    busy_timeout_ms: u32,
}

impl DispatchPragmas {
    fn script(&self) -> String {
        format!(
            "PRAGMA foreign_keys = ON;\n\
             PRAGMA busy_timeout = {};\n\
             PRAGMA journal_mode = WAL;\n\
             PRAGMA synchronous = NORMAL;",
            self.busy_timeout_ms
        )
    }
}

impl r2d2::CustomizeConnection<Connection, rusqlite::Error> for DispatchPragmas {
    fn on_acquire(&self, conn: &mut Connection) -> std::result::Result<(), rusqlite::Error> {
        conn.execute_batch(&self.script())
    }
}

fn pool(manager: SqliteConnectionManager, max_size: u32, config: &ConnectionConfig) -> Result<ConnectionPool> {
    Ok(Pool::builder()
        .max_size(max_size.max(1))
        .connection_timeout(config.acquire_timeout)
        .connection_customizer(Box::new(DispatchPragmas {
            busy_timeout_ms: config.busy_timeout_ms,
        }))
        .build(manager)?)
}

/// A private in-memory database.
///
/// Each in-memory connection would be a separate empty database, so the pool
/// holds exactly one. Callers must release a connection before asking for
/// the next.
pub fn new_in_memory(config: &ConnectionConfig) -> Result<ConnectionPool> {
    pool(SqliteConnectionManager::memory(), 1, config)
}

/// A database file at `path`, created if missing.
pub fn new_file(path: &str, config: &ConnectionConfig) -> Result<ConnectionPool> {
    pool(SqliteConnectionManager::file(path), config.pool_size, config)
}

/// Pragmas in effect on a connection.
#[derive(Debug, PartialEq, Eq)]
pub struct PragmaState {
    /// `wal` for files, `memory` for in-memory databases.
    pub journal_mode: String,
    /// Whether foreign key enforcement is on.
    pub foreign_keys_enabled: bool,
    /// Lock wait, in milliseconds.
    pub busy_timeout_ms: i64,
}

/// Read back the pragmas that [`DispatchPragmas`] sets.
pub fn verify_pragmas(conn: &Connection) -> Result<PragmaState> {
    let read_int = |pragma: &str| -> rusqlite::Result<i64> {
        conn.query_row(&format!("PRAGMA {pragma}"), [], |row| row.get(0))
    };
    Ok(PragmaState {
        journal_mode: conn.query_row("PRAGMA journal_mode", [], |row| row.get(0))?,
        foreign_keys_enabled: read_int("foreign_keys")? == 1,
        busy_timeout_ms: read_int("busy_timeout")?,
    })
}
