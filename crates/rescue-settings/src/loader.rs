//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`RescueSettings::default()`]
//! 2. If the settings file exists, deep-merge its values over defaults
//! 3. Apply environment variable overrides (highest priority)
//! 4. Reject combinations the server cannot run with
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::errors::{Result, SettingsError};
use crate::types::RescueSettings;

/// Resolve the default settings file path (`~/.rapid-rescue/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home)
        .join(".rapid-rescue")
        .join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<RescueSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// If the file does not exist, returns defaults. If the file contains
/// invalid JSON, or the result fails [`validate`], returns an error.
pub fn load_settings_from_path(path: &Path) -> Result<RescueSettings> {
    let mut settings = load_file_layer(path)?;
    apply_env_overrides(&mut settings);
    validate(&settings)?;
    Ok(settings)
}

/// Defaults merged with the file, without env overrides.
pub fn load_file_layer(path: &Path) -> Result<RescueSettings> {
    let defaults = serde_json::to_value(RescueSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path).map_err(|source| SettingsError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    Ok(serde_json::from_value(merged)?)
}

/// Check cross-field constraints that serde cannot express.
pub fn validate(settings: &RescueSettings) -> Result<()> {
    let invalid = |key, reason: &str| {
        Err(SettingsError::InvalidValue {
            key,
            reason: reason.to_string(),
        })
    };
    let server = &settings.server;
    if server.heartbeat_timeout_secs < server.heartbeat_interval_secs {
        return invalid(
            "server.heartbeatTimeoutSecs",
            "must not be shorter than server.heartbeatIntervalSecs",
        );
    }
    if server.outbound_buffer == 0 {
        return invalid("server.outboundBuffer", "must be at least 1");
    }
    let radius = settings.location.default_radius_km;
    if !radius.is_finite() || radius <= 0.0 {
        return invalid("location.defaultRadiusKm", "must be a positive number of kilometers");
    }
    if settings.database.pool_size == 0 {
        return invalid("database.poolSize", "must be at least 1");
    }
    if settings.auth.jwt_secret.is_empty() {
        return invalid("auth.jwtSecret", "must not be empty");
    }
    Ok(())
}

/// Recursive deep merge of two JSON values.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = if let Some(target_val) = target_map.remove(&key) {
                    deep_merge(target_val, source_val)
                } else {
                    source_val
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply environment variable overrides to loaded settings.
///
/// Integers must parse and fall within range; invalid values are ignored
/// with a warning and the file/default value stays.
pub fn apply_env_overrides(settings: &mut RescueSettings) {
    apply_overrides_from(settings, |name| std::env::var(name).ok());
}

/// Apply overrides from an arbitrary variable source.
///
/// Separated from [`apply_env_overrides`] so tests never touch the process
/// environment.
pub fn apply_overrides_from(settings: &mut RescueSettings, lookup: impl Fn(&str) -> Option<String>) {
    let read = |name: &str| lookup(name).filter(|v| !v.is_empty());

    // ── Server ──────────────────────────────────────────────────────
    if let Some(v) = read("RESCUE_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = read("RESCUE_PORT").and_then(|v| ranged(&v, "RESCUE_PORT", parse_u16_range(&v, 1, 65535))) {
        settings.server.port = v;
    }
    if let Some(v) = read("RESCUE_MAX_CONNECTIONS")
        .and_then(|v| ranged(&v, "RESCUE_MAX_CONNECTIONS", parse_usize_range(&v, 1, 1_000_000)))
    {
        settings.server.max_connections = v;
    }
    if let Some(v) = read("RESCUE_HEARTBEAT_INTERVAL_SECS")
        .and_then(|v| ranged(&v, "RESCUE_HEARTBEAT_INTERVAL_SECS", parse_u64_range(&v, 1, 3600)))
    {
        settings.server.heartbeat_interval_secs = v;
    }
    if let Some(v) = read("RESCUE_HEARTBEAT_TIMEOUT_SECS")
        .and_then(|v| ranged(&v, "RESCUE_HEARTBEAT_TIMEOUT_SECS", parse_u64_range(&v, 1, 7200)))
    {
        settings.server.heartbeat_timeout_secs = v;
    }
    if let Some(v) = read("RESCUE_MAX_MESSAGE_SIZE").and_then(|v| {
        ranged(&v, "RESCUE_MAX_MESSAGE_SIZE", parse_usize_range(&v, 1024, 16 * 1024 * 1024))
    }) {
        settings.server.max_message_size = v;
    }

    // ── Location ────────────────────────────────────────────────────
    if let Some(v) = read("RESCUE_LOCATION_STALENESS_SECS")
        .and_then(|v| ranged(&v, "RESCUE_LOCATION_STALENESS_SECS", parse_u64_range(&v, 1, 86_400)))
    {
        settings.location.staleness_secs = v;
    }

    // ── Database ────────────────────────────────────────────────────
    if let Some(v) = read("RESCUE_DB_PATH") {
        settings.database.path = v;
    }
    if let Some(v) = read("RESCUE_DB_POOL_SIZE")
        .and_then(|v| ranged(&v, "RESCUE_DB_POOL_SIZE", parse_u32_range(&v, 1, 256)))
    {
        settings.database.pool_size = v;
    }

    // ── Auth ────────────────────────────────────────────────────────
    if let Some(v) = read("JWT_SECRET_KEY") {
        settings.auth.jwt_secret = v;
    }
    if let Some(v) = read("RESCUE_TOKEN_TTL_MINUTES")
        .and_then(|v| ranged(&v, "RESCUE_TOKEN_TTL_MINUTES", parse_u64_range(&v, 1, 525_600)))
    {
        settings.auth.token_ttl_minutes = v;
    }

    // ── Logging ─────────────────────────────────────────────────────
    if let Some(v) = read("RESCUE_LOG_LEVEL") {
        settings.logging.level = v;
    }
}

fn ranged<T>(raw: &str, key: &str, parsed: Option<T>) -> Option<T> {
    if parsed.is_none() {
        tracing::warn!(key, value = %raw, "invalid numeric env var, ignoring");
    }
    parsed
}

// ── Pure parsing functions (testable without env vars) ──────────────────────

/// Parse a string as a `u16` within a range.
pub fn parse_u16_range(val: &str, min: u16, max: u16) -> Option<u16> {
    let n: u16 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `u32` within a range.
pub fn parse_u32_range(val: &str, min: u32, max: u32) -> Option<u32> {
    let n: u32 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `u64` within a range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `usize` within a range.
pub fn parse_usize_range(val: &str, min: usize, max: usize) -> Option<usize> {
    let n: usize = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}
