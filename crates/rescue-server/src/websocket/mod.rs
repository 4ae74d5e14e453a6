//! WebSocket connection management, heartbeat, and message dispatch.

pub mod connection;
pub mod registry;
pub mod session;
