//! `/health` endpoint.

use std::time::Instant;

use serde::Serialize;

/// Liveness message shared by `/` and `/health`.
pub const LIVENESS_MESSAGE: &str = "Rapid Rescue API is running";

/// Health check response body.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    /// Always `"ok"` when the server is running.
    pub status: &'static str,
    /// Human-readable liveness line.
    pub message: &'static str,
    /// Seconds since the server started.
    pub uptime_secs: u64,
    /// Open WebSocket connections.
    pub connections: usize,
    /// Connections bound to a user.
    pub bound_users: usize,
    /// Drivers with a fresh cached location.
    pub active_drivers: usize,
}

/// Build a health response from live counters.
pub fn health_check(
    start_time: Instant,
    connections: usize,
    bound_users: usize,
    active_drivers: usize,
) -> HealthResponse {
    HealthResponse {
        status: "ok",
        message: LIVENESS_MESSAGE,
        uptime_secs: start_time.elapsed().as_secs(),
        connections,
        bound_users,
        active_drivers,
    }
}
