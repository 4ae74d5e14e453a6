//! Error taxonomy for dispatch operations.
//!
//! [`DispatchError`] is what every negotiation and query operation returns.
//! Each variant maps to a stable wire code (sent inside `error` events) and an
//! HTTP status (used by the query surface). Failed sends to dead connections
//! are not represented here: they are recovered by deregistering the
//! connection and never reach the caller.

use serde_json::{Value, json};
use thiserror::Error;

use crate::identity::Role;

/// Malformed or semantically invalid input.
pub const VALIDATION_ERROR: &str = "VALIDATION_ERROR";
/// Authenticated, but the wrong role (or not the owning party).
pub const FORBIDDEN: &str = "FORBIDDEN";
/// Missing or invalid credential.
pub const UNAUTHENTICATED: &str = "UNAUTHENTICATED";
/// A referenced entity does not exist.
pub const NOT_FOUND: &str = "NOT_FOUND";
/// Duplicate response, illegal transition, or uniqueness violation.
pub const CONFLICT: &str = "CONFLICT";
/// The durable store failed.
pub const PERSISTENCE_ERROR: &str = "PERSISTENCE_ERROR";

/// Errors surfaced by dispatch operations.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// Bad payload shape or value.
    #[error("{0}")]
    Validation(String),

    /// The caller's role (or party membership) does not permit the action.
    #[error("{action} requires {}", required_text(.required))]
    RoleMismatch {
        /// What was attempted.
        action: String,
        /// Role that would have been allowed, if a single role applies.
        required: Option<Role>,
    },

    /// Missing or invalid credential.
    #[error("{0}")]
    Unauthenticated(String),

    /// Referenced entity absent.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// Entity kind (`trip request`, `trip`, ...).
        entity: &'static str,
        /// Offending key.
        id: String,
    },

    /// Duplicate or illegal state change.
    #[error("{0}")]
    Conflict(String),

    /// Durable store failure.
    #[error("persistence failure: {0}")]
    Persistence(String),
}

fn required_text(required: &Option<Role>) -> String {
    required.map_or_else(|| "a party to this trip".to_string(), |r| format!("{r} role"))
}

impl DispatchError {
    /// Shorthand for a role mismatch against a single required role.
    pub fn requires(action: impl Into<String>, role: Role) -> Self {
        Self::RoleMismatch {
            action: action.into(),
            required: Some(role),
        }
    }

    /// Shorthand for "only the parties of this trip may do that".
    pub fn not_a_party(action: impl Into<String>) -> Self {
        Self::RoleMismatch {
            action: action.into(),
            required: None,
        }
    }

    /// Shorthand for a missing entity.
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => VALIDATION_ERROR,
            Self::RoleMismatch { .. } => FORBIDDEN,
            Self::Unauthenticated(_) => UNAUTHENTICATED,
            Self::NotFound { .. } => NOT_FOUND,
            Self::Conflict(_) => CONFLICT,
            Self::Persistence(_) => PERSISTENCE_ERROR,
        }
    }

    /// HTTP status code for the query surface.
    pub fn http_status(&self) -> u16 {
        match self {
            Self::Validation(_) => 400,
            Self::Unauthenticated(_) => 401,
            Self::RoleMismatch { .. } => 403,
            Self::NotFound { .. } => 404,
            Self::Conflict(_) => 409,
            Self::Persistence(_) => 500,
        }
    }

    /// `{code, message}` body shared by the WebSocket and HTTP surfaces.
    pub fn to_error_body(&self) -> Value {
        json!({
            "code": self.code(),
            "message": self.to_string(),
        })
    }
}

/// Convenience type alias for dispatch results.
pub type Result<T> = std::result::Result<T, DispatchError>;

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn codes_and_statuses() {
        let cases = [
            (DispatchError::Validation("x".into()), VALIDATION_ERROR, 400),
            (DispatchError::requires("bid", Role::Driver), FORBIDDEN, 403),
            (DispatchError::Unauthenticated("x".into()), UNAUTHENTICATED, 401),
            (DispatchError::not_found("trip", 4), NOT_FOUND, 404),
            (DispatchError::Conflict("x".into()), CONFLICT, 409),
            (DispatchError::Persistence("x".into()), PERSISTENCE_ERROR, 500),
        ];
        for (err, code, status) in cases {
            assert_eq!(err.code(), code);
            assert_eq!(err.http_status(), status);
        }
    }

    #[test]
    fn role_mismatch_message_names_role() {
        let err = DispatchError::requires("decline", Role::Driver);
        assert_eq!(err.to_string(), "decline requires driver role");
        let err = DispatchError::not_a_party("trip-ended");
        assert_eq!(err.to_string(), "trip-ended requires a party to this trip");
    }

    #[test]
    fn not_found_message() {
        let err = DispatchError::not_found("trip request", 99);
        assert_eq!(err.to_string(), "trip request not found: 99");
        assert_matches!(err, DispatchError::NotFound { entity: "trip request", .. });
    }

    #[test]
    fn error_body_shape() {
        let body = DispatchError::Conflict("already responded".into()).to_error_body();
        assert_eq!(body["code"], "CONFLICT");
        assert_eq!(body["message"], "already responded");
    }
}
