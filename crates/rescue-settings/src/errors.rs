//! Settings error types.

use std::path::PathBuf;

use thiserror::Error;

/// Why settings could not be loaded.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// The settings file exists but could not be read.
    #[error("cannot read settings file {}: {source}", path.display())]
    Io {
        /// File that failed.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
    /// The settings file is not valid JSON, or a value has the wrong shape.
    #[error("malformed settings: {0}")]
    Json(#[from] serde_json::Error),
    /// The merged settings are inconsistent.
    #[error("invalid setting `{key}`: {reason}")]
    InvalidValue {
        /// Dotted camelCase key, as written in the settings file.
        key: &'static str,
        /// What is wrong with it.
        reason: String,
    },
}

/// Result type for settings operations.
pub type Result<T> = std::result::Result<T, SettingsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_error_names_the_file() {
        let err = SettingsError::Io {
            path: PathBuf::from("/etc/rescue/settings.json"),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        };
        let text = err.to_string();
        assert!(text.contains("/etc/rescue/settings.json"));
        assert!(text.contains("denied"));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn shape_errors_convert_from_serde() {
        let json_err = serde_json::from_str::<serde_json::Value>("{bad}").unwrap_err();
        let err: SettingsError = json_err.into();
        assert!(matches!(err, SettingsError::Json(_)));
        assert!(err.to_string().starts_with("malformed settings"));
    }

    #[test]
    fn invalid_value_names_the_key() {
        let err = SettingsError::InvalidValue {
            key: "server.outboundBuffer",
            reason: "must be at least 1".into(),
        };
        assert_eq!(
            err.to_string(),
            "invalid setting `server.outboundBuffer`: must be at least 1"
        );
    }
}
