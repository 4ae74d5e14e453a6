//! Negotiation router: turns inbound events into store changes and
//! follow-up deliveries.
//!
//! Every operation is a method on [`NegotiationRouter`] taking the
//! [`Caller`], so the WebSocket dispatch and the HTTP handlers share the same
//! role checks, store transactions, and deliveries. The sender's identity
//! always comes from the bound credential; the counterpart rider is always
//! resolved from the stored trip request.

mod live;
mod trips;

pub use live::{DriverLocationView, NearbyDriverInfo};

use std::sync::Arc;
use std::time::Instant;

use metrics::{counter, histogram};
use rescue_core::{ConnectionId, DispatchError, Identity, RequestId, Result, Role, TripId};
use rescue_store::{DispatchStore, OngoingTripRow, TripRequestRow};
use serde_json::Value;
use tracing::{Span, debug, instrument, warn};

use crate::location::LocationCache;
use crate::metrics::{
    DISPATCH_EVENT_DURATION_SECONDS, DISPATCH_EVENT_ERRORS_TOTAL, DISPATCH_EVENTS_TOTAL,
};
use crate::notifications::NotificationSink;
use crate::protocol::{self, Envelope, InboundEvent, Reply, event_types as et};
use crate::websocket::registry::ConnectionRegistry;

/// Who is asking.
#[derive(Clone, Debug, Default)]
pub struct Caller {
    /// The WebSocket connection the event arrived on (none for HTTP).
    pub connection_id: Option<ConnectionId>,
    /// Identity from a validated credential (none for anonymous sockets).
    pub identity: Option<Identity>,
}

impl Caller {
    /// A WebSocket sender.
    pub fn connection(connection_id: ConnectionId, identity: Option<Identity>) -> Self {
        Self {
            connection_id: Some(connection_id),
            identity,
        }
    }

    /// An authenticated HTTP caller.
    pub fn http(identity: Identity) -> Self {
        Self {
            connection_id: None,
            identity: Some(identity),
        }
    }

    /// The caller's identity, provided they hold `role`.
    pub fn require(&self, action: &str, role: Role) -> Result<&Identity> {
        match &self.identity {
            Some(identity) if identity.role() == role => Ok(identity),
            _ => Err(DispatchError::requires(action, role)),
        }
    }

    /// The caller's identity, whatever the role.
    pub fn authenticated(&self, action: &str) -> Result<&Identity> {
        self.identity
            .as_ref()
            .ok_or_else(|| DispatchError::not_a_party(action))
    }
}

/// Interprets inbound events against the store, the registry, and the
/// location cache.
pub struct NegotiationRouter {
    store: Arc<DispatchStore>,
    registry: Arc<ConnectionRegistry>,
    locations: Arc<LocationCache>,
    notifications: Arc<dyn NotificationSink>,
    default_radius_km: f64,
}

impl NegotiationRouter {
    /// Create a router.
    pub fn new(
        store: Arc<DispatchStore>,
        registry: Arc<ConnectionRegistry>,
        locations: Arc<LocationCache>,
        notifications: Arc<dyn NotificationSink>,
        default_radius_km: f64,
    ) -> Self {
        Self {
            store,
            registry,
            locations,
            notifications,
            default_radius_km,
        }
    }

    /// The store this router writes to.
    pub fn store(&self) -> &DispatchStore {
        &self.store
    }

    /// Handle one inbound text frame.
    ///
    /// Returns the direct reply to the sender, if any. Failures become
    /// `error` replies; the connection stays open.
    #[instrument(skip_all, fields(connection_id, user, event))]
    pub fn handle(&self, caller: &Caller, text: &str) -> Option<Reply> {
        let span = Span::current();
        if let Some(id) = &caller.connection_id {
            let _ = span.record("connection_id", id.as_str());
        }
        if let Some(identity) = &caller.identity {
            let _ = span.record("user", tracing::field::display(identity.participant));
        }

        let decoded = match protocol::decode(text) {
            Ok(decoded) => decoded,
            Err(e) => {
                counter!(DISPATCH_EVENT_ERRORS_TOTAL, "event" => "malformed", "code" => e.code())
                    .increment(1);
                debug!(error = %e, "undecodable message");
                return Some(Envelope::error(&e, None).into());
            }
        };

        let label = decoded.metric_label().to_string();
        let _ = span.record("event", label.as_str());
        counter!(DISPATCH_EVENTS_TOTAL, "event" => label.clone()).increment(1);

        let start = Instant::now();
        let result = self.dispatch(caller, decoded.event);
        histogram!(DISPATCH_EVENT_DURATION_SECONDS, "event" => label.clone())
            .record(start.elapsed().as_secs_f64());

        match result {
            Ok(reply) => reply,
            Err(e) => {
                counter!(DISPATCH_EVENT_ERRORS_TOTAL, "event" => label, "code" => e.code())
                    .increment(1);
                if matches!(e, DispatchError::Persistence(_)) {
                    warn!(error = %e, "event failed");
                } else {
                    debug!(error = %e, "event rejected");
                }
                Some(Envelope::error(&e, Some(&decoded.event_type)).into())
            }
        }
    }

    fn dispatch(&self, caller: &Caller, event: InboundEvent) -> Result<Option<Reply>> {
        let reply = match event {
            InboundEvent::NewTripRequest(payload) => {
                let request = self.create_trip_request(caller, payload)?;
                Some(Envelope::new(et::TRIP_REQUEST_CREATED, to_value(&request)))
            }
            InboundEvent::Decline(r) => {
                let response = self.decline(caller, r.req_id)?;
                Some(Envelope::new(et::DECLINE_RECORDED, to_value(&response)))
            }
            InboundEvent::Bid { relay_as, payload } => {
                let _ = self.submit_bid(caller, relay_as, &payload)?;
                None
            }
            InboundEvent::RiderCounterOffer(payload) => {
                self.rider_counter_offer(caller, &payload)?;
                None
            }
            InboundEvent::DriverCounterOffer(payload) => {
                self.driver_counter_offer(caller, &payload)?;
                None
            }
            InboundEvent::RiderAcceptedBid(payload) => {
                let _ = self.accept_bid(caller, &payload)?;
                None
            }
            InboundEvent::TripConfirmed(payload) => {
                let _ = self.confirm_trip(caller, None, &payload)?;
                None
            }
            InboundEvent::TripCancelledByDriver(payload) => {
                let _ = self.cancel_by_driver(caller, &payload)?;
                None
            }
            InboundEvent::BidDecision { decision, payload } => {
                self.bid_decision(caller, decision, &payload)?;
                None
            }
            InboundEvent::TripLocationUpdate(position) => {
                let _ = self.trip_location_update(caller, &position)?;
                None
            }
            InboundEvent::TripEnded(r) => {
                let _ = self.end_trip(caller, r.trip_id)?;
                None
            }
            InboundEvent::DriverLocation { kind, coordinates } => {
                self.driver_location(caller, kind, coordinates)?
            }
            InboundEvent::NewClient => Some(self.client_registered(caller)),
            InboundEvent::Broadcast(payload) => {
                self.broadcast_message(caller, payload.message)?;
                None
            }
            InboundEvent::Ping { timestamp } => Some(protocol::pong(timestamp)),
            InboundEvent::Unrecognized(raw) => {
                debug!("echoing unrecognized event");
                return Ok(Some(Reply::Echo(raw)));
            }
        };
        Ok(reply.map(Reply::Event))
    }

    fn request(&self, req_id: RequestId) -> Result<TripRequestRow> {
        self.store
            .trip_request(req_id)?
            .ok_or_else(|| DispatchError::not_found("trip request", req_id))
    }

    /// A request owned by the rider `identity`.
    fn owned_request(
        &self,
        identity: &Identity,
        req_id: RequestId,
        action: &str,
    ) -> Result<TripRequestRow> {
        let request = self.request(req_id)?;
        if identity.participant.as_rider() == Some(request.rider_id) {
            Ok(request)
        } else {
            Err(DispatchError::not_a_party(action))
        }
    }

    fn trip(&self, trip_id: TripId) -> Result<OngoingTripRow> {
        self.store
            .trip(trip_id)?
            .ok_or_else(|| DispatchError::not_found("trip", trip_id))
    }
}

fn to_value<T: serde::Serialize>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or_else(|e| {
        warn!(error = %e, "failed to serialize payload");
        Value::Null
    })
}

fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}

fn validate_amount(field: &str, amount: f64) -> Result<f64> {
    if amount.is_finite() && amount > 0.0 {
        Ok(amount)
    } else {
        Err(DispatchError::Validation(format!(
            "{field} must be a positive number"
        )))
    }
}

#[cfg(test)]
mod tests;
