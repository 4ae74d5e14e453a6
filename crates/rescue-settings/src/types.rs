//! Settings types with compiled defaults.
//!
//! All structs serialize as camelCase JSON so the settings file reads the same
//! way the rest of the deployment tooling writes it.

use serde::{Deserialize, Serialize};

/// Development-only signing secret. Deployments override it with
/// `JWT_SECRET_KEY` or `auth.jwtSecret`.
pub const DEV_JWT_SECRET: &str = "rapid-rescue-development-secret";

/// Root settings object.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RescueSettings {
    /// Listener and WebSocket transport.
    pub server: ServerSettings,
    /// Live driver location cache.
    pub location: LocationSettings,
    /// Durable store.
    pub database: DatabaseSettings,
    /// Credential validation.
    pub auth: AuthSettings,
    /// Log output.
    pub logging: LoggingSettings,
}

/// Listener and WebSocket transport settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Bind port.
    pub port: u16,
    /// Connections beyond this are refused.
    pub max_connections: usize,
    /// Seconds between server pings.
    pub heartbeat_interval_secs: u64,
    /// Seconds of silence before a client is dropped.
    pub heartbeat_timeout_secs: u64,
    /// Largest accepted inbound frame, in bytes.
    pub max_message_size: usize,
    /// Per-connection outbound queue depth.
    pub outbound_buffer: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 8000,
            max_connections: 10_000,
            heartbeat_interval_secs: 30,
            heartbeat_timeout_secs: 60,
            max_message_size: 64 * 1024,
            outbound_buffer: 1024,
        }
    }
}

/// Live location cache settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LocationSettings {
    /// A driver silent for longer than this is no longer active.
    pub staleness_secs: u64,
    /// Radius used by nearby queries that omit one.
    pub default_radius_km: f64,
}

impl Default for LocationSettings {
    fn default() -> Self {
        Self {
            staleness_secs: 300,
            default_radius_km: 5.0,
        }
    }
}

/// Durable store settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DatabaseSettings {
    /// `SQLite` file path. `~` expands to `$HOME`.
    pub path: String,
    /// Maximum pooled connections.
    pub pool_size: u32,
    /// `SQLite` busy timeout.
    pub busy_timeout_ms: u32,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            path: "~/.rapid-rescue/dispatch.db".into(),
            pool_size: 16,
            busy_timeout_ms: 30_000,
        }
    }
}

/// Credential settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AuthSettings {
    /// HS256 signing secret.
    pub jwt_secret: String,
    /// Lifetime of issued tokens.
    pub token_ttl_minutes: u64,
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            jwt_secret: DEV_JWT_SECRET.into(),
            token_ttl_minutes: 7200,
        }
    }
}

/// Log output settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default filter when `RUST_LOG` is unset.
    pub level: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".into(),
        }
    }
}

impl DatabaseSettings {
    /// The database path with a leading `~` expanded.
    pub fn resolved_path(&self) -> String {
        match self.path.strip_prefix("~/") {
            Some(rest) => {
                let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
                format!("{home}/{rest}")
            }
            None => self.path.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let s = RescueSettings::default();
        assert_eq!(s.server.port, 8000);
        assert_eq!(s.server.heartbeat_interval_secs, 30);
        assert_eq!(s.location.staleness_secs, 300);
        assert!((s.location.default_radius_km - 5.0).abs() < f64::EPSILON);
        assert_eq!(s.auth.token_ttl_minutes, 7200);
        assert_eq!(s.database.pool_size, 16);
    }

    #[test]
    fn serializes_camel_case() {
        let json = serde_json::to_value(RescueSettings::default()).unwrap();
        assert!(json["server"]["maxConnections"].is_number());
        assert!(json["location"]["stalenessSecs"].is_number());
        assert!(json["auth"]["jwtSecret"].is_string());
    }

    #[test]
    fn partial_json_fills_defaults() {
        let s: RescueSettings =
            serde_json::from_str(r#"{"server": {"port": 9100}}"#).unwrap();
        assert_eq!(s.server.port, 9100);
        assert_eq!(s.server.host, "0.0.0.0");
        assert_eq!(s.location.staleness_secs, 300);
    }

    #[test]
    fn absolute_db_path_is_unchanged() {
        let db = DatabaseSettings {
            path: "/var/lib/rescue.db".into(),
            ..DatabaseSettings::default()
        };
        assert_eq!(db.resolved_path(), "/var/lib/rescue.db");
    }

    #[test]
    fn tilde_db_path_expands() {
        let resolved = DatabaseSettings::default().resolved_path();
        assert!(!resolved.starts_with('~'));
        assert!(resolved.ends_with(".rapid-rescue/dispatch.db"));
    }
}
