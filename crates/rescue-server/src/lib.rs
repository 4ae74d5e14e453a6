//! # rescue-server
//!
//! Real-time negotiation coordinator for ambulance dispatch.
//!
//! - `WebSocket` gateway: connection registry keyed by bound user, heartbeat,
//!   bounded per-connection outbound queues
//! - Negotiation router: trip requests, bids, counter-offers, acceptance,
//!   confirmation, cancellation, live trip positions, and completion
//! - Location cache with staleness filtering and radius queries
//! - Best-effort notification persistence
//! - Bearer-authenticated HTTP query surface, `/health`, and `/metrics`
//! - Graceful shutdown via `CancellationToken`

#![deny(unsafe_code)]

pub mod auth;
pub mod config;
pub mod health;
pub mod http;
pub mod location;
pub mod metrics;
pub mod negotiation;
pub mod notifications;
pub mod protocol;
pub mod server;
pub mod shutdown;
pub mod websocket;

pub use auth::{Authenticator, JwtAuthenticator};
pub use config::ServerConfig;
pub use server::{AppState, RescueServer};
pub use shutdown::ShutdownCoordinator;
