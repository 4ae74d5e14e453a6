//! Connection registry: connection handles and the user bound to each.
//!
//! Users are addressed as [`Participant`]s. A user has at most one current
//! connection; binding a new one re-points the mapping and closes the old
//! one. Messages are encoded once, the target connections are snapshotted
//! under a read lock, and delivery happens outside the lock.

use std::collections::HashMap;
use std::sync::Arc;

use metrics::counter;
use parking_lot::RwLock;
use rescue_core::{ConnectionId, Identity, Participant, Role};
use tracing::{debug, info, warn};

use super::connection::{ClientConnection, SendOutcome};
use crate::location::LocationCache;
use crate::metrics::{WS_EVICTIONS_TOTAL, WS_SEND_DROPS_TOTAL};
use crate::protocol::Envelope;

#[derive(Default)]
struct RegistryState {
    connections: HashMap<ConnectionId, Arc<ClientConnection>>,
    users: HashMap<Participant, ConnectionId>,
}

/// Process-wide registry of live connections.
pub struct ConnectionRegistry {
    state: RwLock<RegistryState>,
    locations: Arc<LocationCache>,
}

impl ConnectionRegistry {
    /// Create an empty registry. Unbinding a driver drops their entry in
    /// `locations`.
    pub fn new(locations: Arc<LocationCache>) -> Self {
        Self {
            state: RwLock::new(RegistryState::default()),
            locations,
        }
    }

    /// Track a freshly accepted connection (not yet bound to a user).
    pub fn register(&self, connection: Arc<ClientConnection>) {
        let _ = self
            .state
            .write()
            .connections
            .insert(connection.id.clone(), connection);
    }

    /// Bind `connection` to `identity`, replacing any earlier binding of the
    /// same user. The superseded connection is dropped and told to close.
    pub fn bind(&self, connection: &Arc<ClientConnection>, identity: Identity) {
        let participant = identity.participant;
        connection.set_identity(identity);

        let superseded = {
            let mut state = self.state.write();
            let _ = state
                .connections
                .insert(connection.id.clone(), Arc::clone(connection));
            match state.users.insert(participant, connection.id.clone()) {
                Some(previous) if previous != connection.id => state.connections.remove(&previous),
                _ => None,
            }
        };

        if let Some(old) = superseded {
            info!(
                user = %participant,
                old_connection = %old.id,
                new_connection = %connection.id,
                "user reconnected, closing superseded connection"
            );
            old.close();
        }
        debug!(user = %participant, connection_id = %connection.id, "connection bound");
    }

    /// Remove a connection.
    ///
    /// Returns the bound user if this connection was still their current
    /// binding; in that case a driver's cached location is dropped too.
    pub fn unbind(&self, connection_id: &ConnectionId) -> Option<Participant> {
        let released = {
            let mut state = self.state.write();
            let removed = state.connections.remove(connection_id);
            let participant = removed.and_then(|c| c.participant()).or_else(|| {
                state
                    .users
                    .iter()
                    .find(|(_, id)| *id == connection_id)
                    .map(|(p, _)| *p)
            });
            match participant {
                Some(p) if state.users.get(&p) == Some(connection_id) => {
                    let _ = state.users.remove(&p);
                    Some(p)
                }
                _ => None,
            }
        };

        if let Some(driver_id) = released.and_then(Participant::as_driver) {
            if self.locations.remove(driver_id) {
                debug!(driver_id = %driver_id, "dropped cached location on disconnect");
            }
        }
        released
    }

    /// Deliver to a user's current connection.
    ///
    /// Returns `false` if the user has no live connection or the message
    /// could not be queued.
    pub fn send_to(&self, participant: Participant, envelope: &Envelope) -> bool {
        let target = {
            let state = self.state.read();
            state
                .users
                .get(&participant)
                .and_then(|id| state.connections.get(id))
                .cloned()
        };
        let Some(connection) = target else {
            debug!(user = %participant, event = %envelope.event_type, "user offline, message dropped");
            return false;
        };
        let Some(message) = encode(envelope) else {
            return false;
        };
        self.deliver(&connection, message, false)
    }

    /// Deliver to every connection. Any connection that fails to accept the
    /// message is evicted. Returns the number of successful deliveries.
    pub fn broadcast_all(&self, envelope: &Envelope) -> usize {
        let Some(message) = encode(envelope) else {
            return 0;
        };
        let targets: Vec<_> = self.state.read().connections.values().cloned().collect();
        let delivered = targets
            .iter()
            .filter(|c| self.deliver(c, Arc::clone(&message), true))
            .count();
        debug!(event = %envelope.event_type, recipients = targets.len(), delivered, "broadcast to all");
        delivered
    }

    /// Deliver to every bound connection whose role is `role`.
    pub fn broadcast_by_role(&self, role: Role, envelope: &Envelope) -> usize {
        let Some(message) = encode(envelope) else {
            return 0;
        };
        let targets: Vec<_> = {
            let state = self.state.read();
            state
                .users
                .iter()
                .filter(|(p, _)| p.role == role)
                .filter_map(|(_, id)| state.connections.get(id).cloned())
                .collect()
        };
        let delivered = targets
            .iter()
            .filter(|c| self.deliver(c, Arc::clone(&message), false))
            .count();
        debug!(event = %envelope.event_type, %role, recipients = targets.len(), delivered, "broadcast to role");
        delivered
    }

    /// Number of registered connections.
    pub fn connection_count(&self) -> usize {
        self.state.read().connections.len()
    }

    /// Number of users with a current connection.
    pub fn bound_user_count(&self) -> usize {
        self.state.read().users.len()
    }

    #[cfg(test)]
    fn is_online(&self, participant: Participant) -> bool {
        self.state.read().users.contains_key(&participant)
    }

    /// Look up a connection.
    pub fn connection(&self, connection_id: &ConnectionId) -> Option<Arc<ClientConnection>> {
        self.state.read().connections.get(connection_id).cloned()
    }

    fn deliver(&self, connection: &ClientConnection, message: Arc<String>, evict_on_drop: bool) -> bool {
        match connection.send(message) {
            SendOutcome::Sent => true,
            SendOutcome::Dropped => {
                counter!(WS_SEND_DROPS_TOTAL).increment(1);
                warn!(connection_id = %connection.id, "outbound queue full, message dropped");
                if evict_on_drop {
                    self.evict(connection);
                }
                false
            }
            SendOutcome::Closed => {
                self.evict(connection);
                false
            }
        }
    }

    fn evict(&self, connection: &ClientConnection) {
        counter!(WS_EVICTIONS_TOTAL).increment(1);
        warn!(connection_id = %connection.id, "evicting connection after failed delivery");
        let _ = self.unbind(&connection.id);
        connection.close();
    }
}

fn encode(envelope: &Envelope) -> Option<Arc<String>> {
    match envelope.encode() {
        Ok(message) => Some(message),
        Err(e) => {
            warn!(event = %envelope.event_type, error = %e, "failed to serialize event");
            None
        }
    }
}
