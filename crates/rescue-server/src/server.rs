//! `RescueServer`: Axum HTTP + WebSocket server.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use metrics_exporter_prometheus::PrometheusHandle;
use rescue_core::{ConnectionId, DispatchError, Identity};
use rescue_store::DispatchStore;
use serde::Deserialize;
use serde_json::json;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

use crate::auth::Authenticator;
use crate::config::ServerConfig;
use crate::health::{self, HealthResponse, LIVENESS_MESSAGE};
use crate::http::extract::{INVALID_TOKEN_MESSAGE, bearer_token};
use crate::location::LocationCache;
use crate::negotiation::NegotiationRouter;
use crate::notifications::NotificationSink;
use crate::protocol::Envelope;
use crate::shutdown::ShutdownCoordinator;
use crate::websocket::registry::ConnectionRegistry;
use crate::websocket::session::run_ws_session;

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Negotiation router shared by WebSocket and HTTP.
    pub router: Arc<NegotiationRouter>,
    /// Durable store.
    pub store: Arc<DispatchStore>,
    /// Live connections.
    pub registry: Arc<ConnectionRegistry>,
    /// Live driver positions.
    pub locations: Arc<LocationCache>,
    /// Credential validation.
    pub authenticator: Arc<dyn Authenticator>,
    /// Shutdown coordinator.
    pub shutdown: Arc<ShutdownCoordinator>,
    /// Server configuration.
    pub config: Arc<ServerConfig>,
    /// Prometheus handle, when a recorder is installed.
    pub metrics: Option<PrometheusHandle>,
    /// When the server started.
    pub start_time: Instant,
}

/// The dispatch server.
pub struct RescueServer {
    state: AppState,
}

impl RescueServer {
    /// Wire a server around `store`. Notifications are persisted to the same
    /// store.
    pub fn new(
        config: ServerConfig,
        store: Arc<DispatchStore>,
        authenticator: Arc<dyn Authenticator>,
    ) -> Self {
        let locations = Arc::new(LocationCache::new(config.location_staleness()));
        let registry = Arc::new(ConnectionRegistry::new(Arc::clone(&locations)));
        let router = Arc::new(NegotiationRouter::new(
            Arc::clone(&store),
            Arc::clone(&registry),
            Arc::clone(&locations),
            Arc::clone(&store) as Arc<dyn NotificationSink>,
            config.default_radius_km,
        ));
        Self {
            state: AppState {
                router,
                store,
                registry,
                locations,
                authenticator,
                shutdown: Arc::new(ShutdownCoordinator::new()),
                config: Arc::new(config),
                metrics: None,
                start_time: Instant::now(),
            },
        }
    }

    /// Serve `/metrics` from `handle`.
    #[must_use]
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.state.metrics = Some(handle);
        self
    }

    /// Build the Axum router with all routes.
    pub fn router(&self) -> Router {
        Router::new()
            .route("/", get(root_handler))
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .route("/ws", get(ws_handler))
            .merge(crate::http::routes())
            .with_state(self.state.clone())
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
    }

    /// Bind the configured address and serve until shutdown.
    ///
    /// Returns the bound address (useful with port `0`) and the server task.
    pub async fn listen(&self) -> std::io::Result<(SocketAddr, JoinHandle<()>)> {
        let addr = format!("{}:{}", self.state.config.host, self.state.config.port);
        let listener = TcpListener::bind(&addr).await?;
        let local_addr = listener.local_addr()?;
        let app = self.router();
        let signal = self.state.shutdown.signalled();

        let handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app)
                .with_graceful_shutdown(signal)
                .await
            {
                error!(error = %e, "server terminated");
            }
        });
        info!(%local_addr, "dispatch server listening");
        Ok((local_addr, handle))
    }

    /// Shared handler state.
    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Get the shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.state.shutdown
    }

    /// Get the server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.state.config
    }
}

/// GET /
async fn root_handler() -> Json<serde_json::Value> {
    Json(json!({ "message": LIVENESS_MESSAGE }))
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(health::health_check(
        state.start_time,
        state.registry.connection_count(),
        state.registry.bound_user_count(),
        state.locations.query_active().len(),
    ))
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => crate::metrics::render(handle).into_response(),
        None => (StatusCode::NOT_FOUND, "metrics recorder not installed").into_response(),
    }
}

#[derive(Debug, Default, Deserialize)]
struct ConnectParams {
    token: Option<String>,
}

/// GET /ws: upgrade, authenticating with `?token=` or a bearer header.
async fn ws_handler(
    State(state): State<AppState>,
    Query(params): Query<ConnectParams>,
    headers: HeaderMap,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    if state.registry.connection_count() >= state.config.max_connections {
        warn!(
            max_connections = state.config.max_connections,
            "refusing connection, server at capacity"
        );
        return (StatusCode::SERVICE_UNAVAILABLE, "too many connections").into_response();
    }
    let ws = match ws {
        Ok(ws) => ws.max_message_size(state.config.max_message_size),
        Err(rejection) => return rejection.into_response(),
    };

    let token = params
        .token
        .filter(|t| !t.is_empty())
        .or_else(|| bearer_token(&headers).map(str::to_string));
    let identity: Option<Identity> = match token.map(|t| state.authenticator.authenticate(&t)) {
        None => None,
        Some(Ok(identity)) => Some(identity),
        Some(Err(e)) => {
            debug!(error = %e, "rejecting websocket credential");
            return ws.on_upgrade(reject_unauthenticated).into_response();
        }
    };

    ws.on_upgrade(move |socket| run_ws_session(socket, ConnectionId::new(), identity, state))
        .into_response()
}

/// Tell the client its credential was refused, then close. Nothing is
/// registered.
async fn reject_unauthenticated(mut socket: WebSocket) {
    let err = DispatchError::Unauthenticated(INVALID_TOKEN_MESSAGE.into());
    if let Ok(text) = Envelope::error(&err, None).encode() {
        let _ = socket.send(Message::Text(text.as_str().into())).await;
    }
    let _ = socket.send(Message::Close(None)).await;
}
