//! Dispatch metrics: names, descriptions, and the Prometheus exporter.

use metrics::{Unit, describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::{BuildError, Matcher, PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Buckets for event handling and connection lifetime histograms, in seconds.
const LATENCY_BUCKETS: &[f64] = &[0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0];
const LIFETIME_BUCKETS: &[f64] = &[1.0, 10.0, 60.0, 300.0, 1800.0, 3600.0, 14_400.0];

fn builder() -> Result<PrometheusBuilder, BuildError> {
    PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Full(DISPATCH_EVENT_DURATION_SECONDS.into()),
            LATENCY_BUCKETS,
        )?
        .set_buckets_for_metric(
            Matcher::Full(WS_CONNECTION_DURATION_SECONDS.into()),
            LIFETIME_BUCKETS,
        )
}

/// Install the global Prometheus recorder and describe every dispatch metric.
///
/// Fails if a recorder is already installed.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    let handle = builder()?.install_recorder()?;
    describe_metrics();
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

/// Text exposition for `GET /metrics`.
pub fn render(handle: &PrometheusHandle) -> String {
    handle.render()
}

/// Register HELP text and units with the installed recorder.
fn describe_metrics() {
    describe_counter!(WS_CONNECTIONS_TOTAL, "WebSocket connections accepted");
    describe_counter!(WS_DISCONNECTIONS_TOTAL, "WebSocket connections closed");
    describe_gauge!(WS_CONNECTIONS_ACTIVE, "Open WebSocket connections");
    describe_histogram!(
        WS_CONNECTION_DURATION_SECONDS,
        Unit::Seconds,
        "WebSocket connection lifetime"
    );
    describe_counter!(WS_EVICTIONS_TOTAL, "Connections evicted after a failed delivery");
    describe_counter!(WS_SEND_DROPS_TOTAL, "Messages dropped on a full outbound queue");
    describe_counter!(DISPATCH_EVENTS_TOTAL, "Inbound negotiation events handled");
    describe_counter!(DISPATCH_EVENT_ERRORS_TOTAL, "Inbound events answered with an error");
    describe_histogram!(
        DISPATCH_EVENT_DURATION_SECONDS,
        Unit::Seconds,
        "Time spent handling one inbound event"
    );
    describe_counter!(
        NOTIFICATION_PERSIST_FAILURES_TOTAL,
        "Notifications delivered live but not persisted"
    );
    describe_counter!(LOCATION_UPDATES_TOTAL, "Driver location updates accepted");
    describe_counter!(LOCATION_STORE_FAILURES_TOTAL, "Durable driver location writes that failed");
    describe_gauge!(ACTIVE_DRIVER_LOCATIONS, "Drivers with a fresh cached location");
}

/// WebSocket connections opened total (counter).
pub const WS_CONNECTIONS_TOTAL: &str = "ws_connections_total";
/// WebSocket disconnections total (counter).
pub const WS_DISCONNECTIONS_TOTAL: &str = "ws_disconnections_total";
/// Active WebSocket connections (gauge).
pub const WS_CONNECTIONS_ACTIVE: &str = "ws_connections_active";
/// WebSocket connection lifetime (histogram).
pub const WS_CONNECTION_DURATION_SECONDS: &str = "ws_connection_duration_seconds";
/// Connections evicted after a failed delivery (counter).
pub const WS_EVICTIONS_TOTAL: &str = "ws_evictions_total";
/// Messages dropped on a full outbound queue (counter).
pub const WS_SEND_DROPS_TOTAL: &str = "ws_send_drops_total";
/// Inbound events handled (counter, labels: event).
pub const DISPATCH_EVENTS_TOTAL: &str = "dispatch_events_total";
/// Inbound events that failed (counter, labels: event, code).
pub const DISPATCH_EVENT_ERRORS_TOTAL: &str = "dispatch_event_errors_total";
/// Inbound event handling time (histogram, labels: event).
pub const DISPATCH_EVENT_DURATION_SECONDS: &str = "dispatch_event_duration_seconds";
/// Notifications that could not be persisted (counter).
pub const NOTIFICATION_PERSIST_FAILURES_TOTAL: &str = "notification_persist_failures_total";
/// Driver location updates accepted (counter).
pub const LOCATION_UPDATES_TOTAL: &str = "location_updates_total";
/// Durable location writes that failed (counter).
pub const LOCATION_STORE_FAILURES_TOTAL: &str = "location_store_failures_total";
/// Drivers with a fresh cached location (gauge).
pub const ACTIVE_DRIVER_LOCATIONS: &str = "active_driver_locations";
