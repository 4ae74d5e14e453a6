//! Error types for the durable store.
//!
//! [`StoreError`] is returned by every repository and [`crate::DispatchStore`]
//! operation. Constraint violations raised by `SQLite` stay inside
//! [`StoreError::Sqlite`] until [`StoreError::is_constraint_violation`] or the
//! conversion into [`DispatchError`] classifies them.

use rescue_core::DispatchError;
use thiserror::Error;

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// `SQLite` database error.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Connection pool error.
    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    /// Schema migration failed.
    #[error("migration error: {message}")]
    Migration {
        /// Describes which migration failed and why.
        message: String,
    },

    /// A referenced row does not exist.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// Entity kind.
        entity: &'static str,
        /// Offending key.
        id: String,
    },

    /// A uniqueness or state precondition failed.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Stored data could not be interpreted.
    #[error("invalid operation: {0}")]
    InvalidOperation(String),
}

impl StoreError {
    /// Shorthand for a missing row.
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Whether this is a UNIQUE / PRIMARY KEY / CHECK violation.
    pub fn is_constraint_violation(&self) -> bool {
        match self {
            Self::Sqlite(rusqlite::Error::SqliteFailure(e, _)) => {
                e.code == rusqlite::ErrorCode::ConstraintViolation
                    && e.extended_code != rusqlite::ffi::SQLITE_CONSTRAINT_FOREIGNKEY
            }
            _ => false,
        }
    }

    /// Whether a foreign key points at a missing parent.
    pub fn is_foreign_key_violation(&self) -> bool {
        matches!(
            self,
            Self::Sqlite(rusqlite::Error::SqliteFailure(e, _))
                if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_FOREIGNKEY
        )
    }
}

impl From<StoreError> for DispatchError {
    fn from(err: StoreError) -> Self {
        if err.is_constraint_violation() {
            return Self::Conflict(constraint_message(&err));
        }
        if err.is_foreign_key_violation() {
            return Self::Validation("referenced account or request does not exist".into());
        }
        match err {
            StoreError::NotFound { entity, id } => Self::NotFound { entity, id },
            StoreError::Conflict(message) => Self::Conflict(message),
            other => Self::Persistence(other.to_string()),
        }
    }
}

fn constraint_message(err: &StoreError) -> String {
    match err {
        StoreError::Sqlite(rusqlite::Error::SqliteFailure(_, Some(msg))) => {
            format!("uniqueness violation: {msg}")
        }
        _ => "uniqueness violation".to_string(),
    }
}

/// Convenience type alias for store results.
pub type Result<T> = std::result::Result<T, StoreError>;
