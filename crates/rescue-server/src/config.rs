//! Server configuration.

use std::time::Duration;

use rescue_settings::RescueSettings;
use serde::{Deserialize, Serialize};

/// Configuration for the dispatch server.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind (default `"127.0.0.1"`).
    pub host: String,
    /// Port to bind (default `0` for auto-assign).
    pub port: u16,
    /// Maximum concurrent WebSocket connections.
    pub max_connections: usize,
    /// Seconds between server pings.
    pub heartbeat_interval_secs: u64,
    /// Seconds of client silence before disconnecting.
    pub heartbeat_timeout_secs: u64,
    /// Max WebSocket message size in bytes.
    pub max_message_size: usize,
    /// Per-connection outbound queue depth.
    pub outbound_buffer: usize,
    /// Seconds before a cached driver location goes stale.
    pub location_staleness_secs: u64,
    /// Radius for nearby queries that do not give one.
    pub default_radius_km: f64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            max_connections: 10_000,
            heartbeat_interval_secs: 30,
            heartbeat_timeout_secs: 60,
            max_message_size: 64 * 1024,
            outbound_buffer: 1024,
            location_staleness_secs: 300,
            default_radius_km: 5.0,
        }
    }
}

impl ServerConfig {
    /// Build from loaded settings.
    pub fn from_settings(settings: &RescueSettings) -> Self {
        Self {
            host: settings.server.host.clone(),
            port: settings.server.port,
            max_connections: settings.server.max_connections,
            heartbeat_interval_secs: settings.server.heartbeat_interval_secs,
            heartbeat_timeout_secs: settings.server.heartbeat_timeout_secs,
            max_message_size: settings.server.max_message_size,
            outbound_buffer: settings.server.outbound_buffer.max(1),
            location_staleness_secs: settings.location.staleness_secs,
            default_radius_km: settings.location.default_radius_km,
        }
    }

    /// Ping cadence.
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    /// Allowed client silence.
    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_secs(self.heartbeat_timeout_secs)
    }

    /// Location staleness window.
    pub fn location_staleness(&self) -> Duration {
        Duration::from_secs(self.location_staleness_secs)
    }
}
