//! WebSocket session lifecycle: handles a single connected client from
//! upgrade through disconnect.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use metrics::{counter, gauge, histogram};
use rescue_core::{ConnectionId, DispatchError, Identity};
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

use super::connection::{ClientConnection, SendOutcome};
use crate::metrics::{
    WS_CONNECTION_DURATION_SECONDS, WS_CONNECTIONS_ACTIVE, WS_CONNECTIONS_TOTAL,
    WS_DISCONNECTIONS_TOTAL,
};
use crate::negotiation::Caller;
use crate::protocol::{Envelope, Reply};
use crate::server::AppState;

/// Floor for the ping cadence; `tokio::time::interval` rejects zero.
const MIN_PING_INTERVAL: Duration = Duration::from_secs(1);

/// How long the writer gets to flush a close frame after the reader stops.
const CLOSE_GRACE: Duration = Duration::from_secs(1);

/// What an inbound frame means to the session.
#[derive(Debug, PartialEq)]
enum Inbound {
    /// A message for the router.
    Text(String),
    /// A binary frame that is not UTF-8.
    InvalidBinary(usize),
    /// Ping or Pong.
    Control,
    /// The client is going away.
    Close,
}

fn classify(msg: Message) -> Inbound {
    match msg {
        Message::Text(t) => Inbound::Text(t.as_str().to_owned()),
        Message::Binary(data) => match std::str::from_utf8(&data) {
            Ok(s) => Inbound::Text(s.to_string()),
            Err(_) => Inbound::InvalidBinary(data.len()),
        },
        Message::Ping(_) | Message::Pong(_) => Inbound::Control,
        Message::Close(_) => Inbound::Close,
    }
}

/// Run a WebSocket session for a connected client.
///
/// 1. Registers the connection (and binds it when `identity` is present)
/// 2. Sends the greeting from [`crate::negotiation::NegotiationRouter::welcome`]
/// 3. Dispatches inbound frames through the router, queueing direct replies
/// 4. Forwards queued messages, pings on the heartbeat interval, and drops
///    clients silent past the heartbeat timeout
/// 5. Unbinds on disconnect
#[instrument(skip_all, fields(connection_id = %connection_id))]
pub async fn run_ws_session(
    ws: WebSocket,
    connection_id: ConnectionId,
    identity: Option<Identity>,
    state: AppState,
) {
    let (mut ws_tx, mut ws_rx) = ws.split();

    let (send_tx, mut send_rx) = mpsc::channel::<Arc<String>>(state.config.outbound_buffer.max(1));
    let connection = Arc::new(ClientConnection::new(connection_id, send_tx));

    let connection_start = Instant::now();
    counter!(WS_CONNECTIONS_TOTAL).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).increment(1.0);

    state.registry.register(Arc::clone(&connection));
    if let Some(identity) = identity {
        state.registry.bind(&connection, identity);
    }
    let user = connection.participant().map(|p| p.to_string());
    info!(user = user.as_deref().unwrap_or("anonymous"), "client connected");

    let caller = Caller::connection(connection.id.clone(), connection.identity());
    for envelope in state.router.welcome(&caller) {
        queue(&connection, &Reply::Event(envelope));
    }

    let ping_every = state.config.heartbeat_interval().max(MIN_PING_INTERVAL);
    let silence_limit = state.config.heartbeat_timeout();
    let outbound_conn = Arc::clone(&connection);
    let close_signal = connection.close_signal();
    let mut outbound = tokio::spawn(async move {
        let mut ping_interval = tokio::time::interval(ping_every);
        // Skip the immediate first tick
        let _ = ping_interval.tick().await;

        loop {
            tokio::select! {
                msg = send_rx.recv() => {
                    match msg {
                        Some(text) => {
                            if ws_tx.send(Message::Text(text.as_str().into())).await.is_err() {
                                break;
                            }
                        }
                        None => break,
                    }
                }
                _ = ping_interval.tick() => {
                    if !outbound_conn.check_alive()
                        && outbound_conn.last_seen_elapsed() > silence_limit
                    {
                        warn!(silent_for = ?outbound_conn.last_seen_elapsed(), "client unresponsive, disconnecting");
                        let _ = ws_tx.send(Message::Close(None)).await;
                        break;
                    }
                    if ws_tx.send(Message::Ping(Vec::new().into())).await.is_err() {
                        break;
                    }
                }
                () = close_signal.cancelled() => {
                    let _ = ws_tx.send(Message::Close(None)).await;
                    break;
                }
            }
        }
        outbound_conn.close();
    });

    let close_signal = connection.close_signal();
    let shutdown = state.shutdown.token();
    loop {
        let frame = tokio::select! {
            () = close_signal.cancelled() => {
                debug!("connection closed by server");
                break;
            }
            () = shutdown.cancelled() => {
                debug!("server shutting down");
                connection.close();
                break;
            }
            frame = ws_rx.next() => frame,
        };
        let msg = match frame {
            Some(Ok(msg)) => msg,
            Some(Err(e)) => {
                debug!(error = %e, "websocket read failed");
                break;
            }
            None => break,
        };
        connection.mark_alive();

        let text = match classify(msg) {
            Inbound::Text(text) => text,
            Inbound::Control => continue,
            Inbound::Close => {
                info!("client sent close frame");
                break;
            }
            Inbound::InvalidBinary(len) => {
                info!(len, "received non-UTF8 binary frame");
                let err = DispatchError::Validation("binary frame is not valid UTF-8".into());
                queue(&connection, &Reply::Event(Envelope::error(&err, None)));
                continue;
            }
        };

        let caller = Caller::connection(connection.id.clone(), connection.identity());
        if let Some(reply) = state.router.handle(&caller, &text) {
            queue(&connection, &reply);
        }
    }

    // Clean up
    let released = state.registry.unbind(&connection.id);
    info!(
        user = user.as_deref().unwrap_or("anonymous"),
        still_current = released.is_some(),
        dropped = connection.drop_count(),
        "client disconnected"
    );
    counter!(WS_DISCONNECTIONS_TOTAL).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).decrement(1.0);
    histogram!(WS_CONNECTION_DURATION_SECONDS).record(connection_start.elapsed().as_secs_f64());

    connection.close();
    if tokio::time::timeout(CLOSE_GRACE, &mut outbound).await.is_err() {
        outbound.abort();
    }
}

/// Queue a direct reply on the sender's own connection.
fn queue(connection: &ClientConnection, reply: &Reply) {
    let message = match reply.encode() {
        Ok(message) => message,
        Err(e) => {
            warn!(event = reply.event_type(), error = %e, "failed to serialize reply");
            return;
        }
    };
    match connection.send(message) {
        SendOutcome::Sent => {}
        outcome => {
            warn!(?outcome, event = reply.event_type(), "failed to enqueue reply");
        }
    }
}
