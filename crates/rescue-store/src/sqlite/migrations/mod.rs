//! Versioned schema for the dispatch database.
//!
//! Each entry in `MIGRATIONS` is compiled in with [`include_str!`], applied at
//! most once in its own transaction, and recorded in `schema_version`. A
//! database stamped with a version this build does not know is refused
//! rather than written to.

use rusqlite::Connection;
use tracing::{debug, info};

use crate::errors::{Result, StoreError};

struct Migration {
    version: u32,
    description: &'static str,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    description: "Accounts, negotiation, trips, engaged drivers, notifications",
    sql: include_str!("v001_schema.sql"),
}];

const VERSION_TABLE: &str = "CREATE TABLE IF NOT EXISTS schema_version (
    version     INTEGER PRIMARY KEY,
    applied_at  TEXT    NOT NULL,
    description TEXT
);";

fn migration_error(context: &str, e: &rusqlite::Error) -> StoreError {
    StoreError::Migration {
        message: format!("{context}: {e}"),
    }
}

/// Bring the schema up to [`latest_version`]. Returns how many migrations ran.
pub fn run_migrations(conn: &Connection) -> Result<u32> {
    conn.execute_batch(VERSION_TABLE)
        .map_err(|e| migration_error("failed to create schema_version", &e))?;

    let current = current_version(conn)?;
    let latest = latest_version();
    if current > latest {
        return Err(StoreError::Migration {
            message: format!("database schema v{current} is newer than this build (v{latest})"),
        });
    }

    let mut applied = 0;
    for migration in MIGRATIONS.iter().filter(|m| m.version > current) {
        info!(
            version = migration.version,
            description = migration.description,
            "applying migration"
        );
        apply(conn, migration)?;
        applied += 1;
    }

    if applied == 0 {
        debug!(version = current, "schema up to date");
    } else {
        info!(from = current, to = latest, "schema migrated");
    }
    Ok(applied)
}

/// Highest applied version, or 0 for a fresh database.
pub fn current_version(conn: &Connection) -> Result<u32> {
    conn.query_row("SELECT COALESCE(MAX(version), 0) FROM schema_version", [], |row| {
        row.get(0)
    })
    .map_err(|e| migration_error("failed to read schema_version", &e))
}

/// Newest version this build knows about.
pub fn latest_version() -> u32 {
    MIGRATIONS.iter().map(|m| m.version).max().unwrap_or(0)
}

fn apply(conn: &Connection, migration: &Migration) -> Result<()> {
    let context = format!("migration v{} failed", migration.version);
    let fail = |e: rusqlite::Error| migration_error(&context, &e);

    let tx = conn.unchecked_transaction().map_err(fail)?;
    tx.execute_batch(migration.sql).map_err(fail)?;
    let _ = tx
        .execute(
            "INSERT INTO schema_version (version, applied_at, description)
             VALUES (?1, datetime('now'), ?2)",
            rusqlite::params![migration.version, migration.description],
        )
        .map_err(fail)?;
    tx.commit().map_err(fail)
}
