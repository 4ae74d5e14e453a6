//! Wire protocol: the `{"type", "data"}` envelope and typed inbound events.
//!
//! Inbound text is decoded once into an [`InboundEvent`], with one payload
//! struct per event type. Types the coordinator does not know become
//! [`InboundEvent::Unrecognized`] carrying the original envelope, which is
//! echoed back unchanged.

use std::sync::Arc;

use rescue_core::{DispatchError, DriverId, RequestId, TripId};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// Event type names used on the wire.
pub mod event_types {
    /// Rider creates a trip request.
    pub const NEW_TRIP_REQUEST: &str = "new-trip-request";
    /// Driver declines a request.
    pub const DECLINE: &str = "decline";
    /// Driver bids on a request.
    pub const BID_FROM_DRIVER: &str = "bid-from-driver";
    /// Driver bids on a request (alternate client spelling).
    pub const DRIVER_BID_OFFER: &str = "driver-bid-offer";
    /// Rider counters a driver's bid.
    pub const RIDER_COUNTER_OFFER: &str = "rider-counter-offer";
    /// Driver counters the rider.
    pub const DRIVER_COUNTER_OFFER: &str = "driver-counter-offer";
    /// Rider accepts a driver's bid.
    pub const RIDER_ACCEPTED_BID: &str = "rider-accepted-bid";
    /// Trip is confirmed and starts.
    pub const TRIP_CONFIRMED: &str = "trip-confirmed";
    /// Driver walks away from a request.
    pub const TRIP_CANCELLED_BY_DRIVER: &str = "trip-cancelled-by-driver";
    /// Bid accepted, relayed to both parties.
    pub const BID_ACCEPTED: &str = "bid-accepted";
    /// Bid rejected, relayed to both parties.
    pub const BID_REJECTED: &str = "bid-rejected";
    /// Live position of a party on an ongoing trip.
    pub const TRIP_LOCATION_UPDATE: &str = "trip-location-update";
    /// Trip completed.
    pub const TRIP_ENDED: &str = "trip-ended";
    /// Driver position broadcast.
    pub const DRIVER_LOCATION: &str = "driver-location";
    /// Driver position, acknowledged.
    pub const ADD_LOCATION: &str = "add-location";
    /// Driver position, acknowledged and followed by a nearby snapshot.
    pub const UPDATE_LOCATION: &str = "update-location";
    /// Client announces itself.
    pub const NEW_CLIENT: &str = "new-client";
    /// Free-form message to everyone.
    pub const BROADCAST: &str = "broadcast";
    /// Latency probe.
    pub const PING: &str = "ping";

    /// Sent once after accept.
    pub const CONNECTION_ESTABLISHED: &str = "connection_established";
    /// Active drivers snapshot for riders.
    pub const NEARBY_DRIVERS: &str = "nearby-drivers";
    /// Ack for `new-trip-request`.
    pub const TRIP_REQUEST_CREATED: &str = "trip-request-created";
    /// Ack for `decline`.
    pub const DECLINE_RECORDED: &str = "decline-recorded";
    /// Ack for `add-location` and `update-location`.
    pub const LOCATION_UPDATED: &str = "location_updated";
    /// Reply to `new-client`.
    pub const CLIENT_REGISTERED: &str = "client_registered";
    /// Fan-out of `broadcast`.
    pub const BROADCAST_MESSAGE: &str = "broadcast_message";
    /// A rider cancelled a pending request.
    pub const TRIP_REQUEST_CANCELLED: &str = "trip-request-cancelled";
    /// Reply to `ping`.
    pub const PONG: &str = "pong";
    /// Failure report.
    pub const ERROR: &str = "error";
}

use event_types as et;

/// The message envelope shared by every inbound and outbound event.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Event type.
    #[serde(rename = "type")]
    pub event_type: String,
    /// Type-specific payload.
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub data: Value,
}

impl Envelope {
    /// Build an envelope.
    pub fn new(event_type: impl Into<String>, data: Value) -> Self {
        Self {
            event_type: event_type.into(),
            data,
        }
    }

    /// `error` envelope for a failed operation.
    pub fn error(err: &DispatchError, event: Option<&str>) -> Self {
        let mut data = err.to_error_body();
        if let (Some(event), Value::Object(map)) = (event, &mut data) {
            let _ = map.insert("event".into(), Value::String(event.to_string()));
        }
        Self::new(et::ERROR, data)
    }

    /// Serialize for the outbound queue.
    pub fn encode(&self) -> serde_json::Result<Arc<String>> {
        serde_json::to_string(self).map(Arc::new)
    }
}

/// A direct reply to the sender of an inbound frame.
#[derive(Clone, Debug, PartialEq)]
pub enum Reply {
    /// A regular outbound event.
    Event(Envelope),
    /// An unrecognized inbound message, returned verbatim.
    Echo(Value),
}

impl Reply {
    /// Serialize for the outbound queue.
    pub fn encode(&self) -> serde_json::Result<Arc<String>> {
        match self {
            Self::Event(envelope) => envelope.encode(),
            Self::Echo(raw) => serde_json::to_string(raw).map(Arc::new),
        }
    }

    /// Event type of the reply.
    pub fn event_type(&self) -> Option<&str> {
        match self {
            Self::Event(envelope) => Some(&envelope.event_type),
            Self::Echo(raw) => raw.get("type").and_then(Value::as_str),
        }
    }
}

impl From<Envelope> for Reply {
    fn from(envelope: Envelope) -> Self {
        Self::Event(envelope)
    }
}

/// Coordinates that also accept `lat`/`lon`.
#[derive(Clone, Copy, Debug, PartialEq, Deserialize)]
pub struct Coordinates {
    /// Latitude in degrees.
    #[serde(alias = "lat")]
    pub latitude: f64,
    /// Longitude in degrees.
    #[serde(alias = "lon")]
    pub longitude: f64,
}

/// `new-trip-request` payload.
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct TripRequestPayload {
    /// Pickup descriptor.
    pub pickup_location: String,
    /// Destination descriptor.
    pub destination: String,
    /// Requested fare.
    pub fare: f64,
    /// Pickup latitude.
    #[serde(default, alias = "lat")]
    pub latitude: Option<f64>,
    /// Pickup longitude.
    #[serde(default, alias = "lon")]
    pub longitude: Option<f64>,
    /// Name shown to drivers; defaults to the credential's name.
    #[serde(default)]
    pub rider_name: Option<String>,
}

/// Payload that only names a request.
#[derive(Clone, Copy, Debug, PartialEq, Deserialize)]
pub struct RequestRef {
    /// Request ID.
    pub req_id: RequestId,
}

/// Bid payload.
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct BidPayload {
    /// Request bid on.
    pub req_id: RequestId,
    /// Offered amount.
    pub amount: f64,
    /// Vehicle description.
    #[serde(default)]
    pub vehicle: Option<String>,
    /// Estimated arrival.
    #[serde(default)]
    pub eta: Option<String>,
    /// Specialty or equipment.
    #[serde(default)]
    pub specialty: Option<String>,
    /// Rating shown to the rider.
    #[serde(default)]
    pub rating: Option<f64>,
}

/// `rider-counter-offer` payload.
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct RiderCounterOffer {
    /// Request under negotiation.
    pub req_id: RequestId,
    /// Driver being countered.
    pub driver_id: DriverId,
    /// Counter amount.
    pub amount: f64,
    /// Free text.
    #[serde(default)]
    pub message: Option<String>,
}

/// `driver-counter-offer` payload.
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct DriverCounterOffer {
    /// Request under negotiation.
    pub req_id: RequestId,
    /// Counter amount.
    pub amount: f64,
    /// Free text.
    #[serde(default)]
    pub message: Option<String>,
}

/// `rider-accepted-bid` payload.
#[derive(Clone, Copy, Debug, PartialEq, Deserialize)]
pub struct BidAcceptance {
    /// Request under negotiation.
    pub req_id: RequestId,
    /// Driver whose bid is accepted.
    pub driver_id: DriverId,
    /// Agreed amount, replacing the bid amount.
    #[serde(default)]
    pub amount: Option<f64>,
}

/// `trip-confirmed` payload.
#[derive(Clone, Copy, Debug, Default, PartialEq, Deserialize)]
pub struct TripConfirmation {
    /// Request being confirmed.
    pub req_id: RequestId,
    /// Agreed fare.
    #[serde(default)]
    pub fare: Option<f64>,
    /// Rider starting latitude.
    #[serde(default)]
    pub rider_latitude: Option<f64>,
    /// Rider starting longitude.
    #[serde(default)]
    pub rider_longitude: Option<f64>,
    /// Driver starting latitude.
    #[serde(default)]
    pub driver_latitude: Option<f64>,
    /// Driver starting longitude.
    #[serde(default)]
    pub driver_longitude: Option<f64>,
}

/// `trip-cancelled-by-driver` payload.
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct DriverCancellation {
    /// Request walked away from.
    pub req_id: RequestId,
    /// Free text.
    #[serde(default)]
    pub reason: Option<String>,
}

/// `bid-accepted` / `bid-rejected` payload.
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct BidDecision {
    /// Request under negotiation.
    pub req_id: RequestId,
    /// Driver concerned; required when the rider sends it.
    #[serde(default)]
    pub driver_id: Option<DriverId>,
    /// Amount concerned.
    #[serde(default)]
    pub amount: Option<f64>,
    /// Free text.
    #[serde(default)]
    pub message: Option<String>,
}

/// `trip-location-update` payload.
#[derive(Clone, Copy, Debug, PartialEq, Deserialize)]
pub struct TripPosition {
    /// Trip being tracked.
    pub trip_id: TripId,
    /// Latitude in degrees.
    #[serde(alias = "lat")]
    pub latitude: f64,
    /// Longitude in degrees.
    #[serde(alias = "lon")]
    pub longitude: f64,
}

/// Payload that only names a trip.
#[derive(Clone, Copy, Debug, PartialEq, Deserialize)]
pub struct TripRef {
    /// Trip ID.
    pub trip_id: TripId,
}

/// `broadcast` payload.
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct BroadcastPayload {
    /// Any JSON value.
    pub message: Value,
}

/// Which driver-location spelling was used.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LocationEventKind {
    /// `driver-location`: broadcast only.
    DriverLocation,
    /// `add-location`: broadcast and acknowledge.
    AddLocation,
    /// `update-location`: broadcast, acknowledge, and refresh riders' snapshot.
    UpdateLocation,
}

/// Whether a bid decision accepts or rejects.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Decision {
    /// `bid-accepted`.
    Accepted,
    /// `bid-rejected`.
    Rejected,
}

impl Decision {
    /// Wire name of the relayed event.
    pub const fn event_type(self) -> &'static str {
        match self {
            Self::Accepted => et::BID_ACCEPTED,
            Self::Rejected => et::BID_REJECTED,
        }
    }
}

/// A decoded inbound event.
#[derive(Clone, Debug, PartialEq)]
pub enum InboundEvent {
    /// Rider creates a request.
    NewTripRequest(TripRequestPayload),
    /// Driver declines.
    Decline(RequestRef),
    /// Driver bids; `relay_as` is the spelling the client used.
    Bid {
        /// Event name relayed to the rider.
        relay_as: &'static str,
        /// Bid contents.
        payload: BidPayload,
    },
    /// Rider counters a bid.
    RiderCounterOffer(RiderCounterOffer),
    /// Driver counters the rider.
    DriverCounterOffer(DriverCounterOffer),
    /// Rider accepts a bid.
    RiderAcceptedBid(BidAcceptance),
    /// Driver confirms the trip.
    TripConfirmed(TripConfirmation),
    /// Driver walks away.
    TripCancelledByDriver(DriverCancellation),
    /// Bid accepted/rejected notice.
    BidDecision {
        /// Accept or reject.
        decision: Decision,
        /// Decision details.
        payload: BidDecision,
    },
    /// Live position on a trip.
    TripLocationUpdate(TripPosition),
    /// Trip completed.
    TripEnded(TripRef),
    /// Driver position.
    DriverLocation {
        /// Which spelling was used.
        kind: LocationEventKind,
        /// Position.
        coordinates: Coordinates,
    },
    /// Client announcement.
    NewClient,
    /// Message to everyone.
    Broadcast(BroadcastPayload),
    /// Latency probe with the client's timestamp.
    Ping {
        /// Echoed back verbatim.
        timestamp: Value,
    },
    /// Unknown type; the original envelope.
    Unrecognized(Value),
}

/// An inbound event with the type name it arrived under.
#[derive(Clone, Debug, PartialEq)]
pub struct DecodedMessage {
    /// Type string as sent.
    pub event_type: String,
    /// Decoded event.
    pub event: InboundEvent,
}

impl DecodedMessage {
    /// Bounded label for metrics: unknown types share one bucket.
    pub fn metric_label(&self) -> &str {
        match self.event {
            InboundEvent::Unrecognized(_) => "unrecognized",
            _ => &self.event_type,
        }
    }
}

/// Decode one inbound text frame.
pub fn decode(text: &str) -> Result<DecodedMessage, DispatchError> {
    let raw: Value = serde_json::from_str(text)
        .map_err(|e| DispatchError::Validation(format!("malformed message: {e}")))?;
    let Some(event_type) = raw.get("type").and_then(Value::as_str).map(str::to_owned) else {
        return Err(DispatchError::Validation(
            "malformed message: missing string field `type`".into(),
        ));
    };
    let data = raw.get("data").cloned().unwrap_or(Value::Null);

    let event = match event_type.as_str() {
        et::NEW_TRIP_REQUEST => InboundEvent::NewTripRequest(payload(&event_type, data)?),
        et::DECLINE => InboundEvent::Decline(payload(&event_type, data)?),
        et::BID_FROM_DRIVER => InboundEvent::Bid {
            relay_as: et::BID_FROM_DRIVER,
            payload: payload(&event_type, data)?,
        },
        et::DRIVER_BID_OFFER => InboundEvent::Bid {
            relay_as: et::DRIVER_BID_OFFER,
            payload: payload(&event_type, data)?,
        },
        et::RIDER_COUNTER_OFFER => InboundEvent::RiderCounterOffer(payload(&event_type, data)?),
        et::DRIVER_COUNTER_OFFER => InboundEvent::DriverCounterOffer(payload(&event_type, data)?),
        et::RIDER_ACCEPTED_BID => InboundEvent::RiderAcceptedBid(payload(&event_type, data)?),
        et::TRIP_CONFIRMED => InboundEvent::TripConfirmed(payload(&event_type, data)?),
        et::TRIP_CANCELLED_BY_DRIVER => {
            InboundEvent::TripCancelledByDriver(payload(&event_type, data)?)
        }
        et::BID_ACCEPTED => InboundEvent::BidDecision {
            decision: Decision::Accepted,
            payload: payload(&event_type, data)?,
        },
        et::BID_REJECTED => InboundEvent::BidDecision {
            decision: Decision::Rejected,
            payload: payload(&event_type, data)?,
        },
        et::TRIP_LOCATION_UPDATE => InboundEvent::TripLocationUpdate(payload(&event_type, data)?),
        et::TRIP_ENDED => InboundEvent::TripEnded(payload(&event_type, data)?),
        et::DRIVER_LOCATION | et::ADD_LOCATION | et::UPDATE_LOCATION => {
            let kind = match event_type.as_str() {
                et::ADD_LOCATION => LocationEventKind::AddLocation,
                et::UPDATE_LOCATION => LocationEventKind::UpdateLocation,
                _ => LocationEventKind::DriverLocation,
            };
            InboundEvent::DriverLocation {
                kind,
                coordinates: payload(&event_type, data)?,
            }
        }
        et::NEW_CLIENT => InboundEvent::NewClient,
        et::BROADCAST => InboundEvent::Broadcast(payload(&event_type, data)?),
        et::PING => InboundEvent::Ping {
            timestamp: data
                .get("timestamp")
                .or_else(|| raw.get("timestamp"))
                .cloned()
                .unwrap_or(Value::Null),
        },
        _ => InboundEvent::Unrecognized(raw),
    };

    Ok(DecodedMessage { event_type, event })
}

fn payload<T: DeserializeOwned>(event_type: &str, data: Value) -> Result<T, DispatchError> {
    serde_json::from_value(data)
        .map_err(|e| DispatchError::Validation(format!("invalid {event_type} payload: {e}")))
}

/// `pong` reply echoing the client's timestamp.
pub fn pong(timestamp: Value) -> Envelope {
    Envelope::new(
        et::PONG,
        json!({
            "timestamp": timestamp,
            "server_time": chrono::Utc::now().to_rfc3339(),
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn decodes_trip_request_with_short_coordinates() {
        let msg = decode(
            r#"{"type":"new-trip-request","data":{"pickup_location":"A","destination":"B","fare":500,"lat":23.8,"lon":90.4}}"#,
        )
        .unwrap();
        assert_eq!(msg.event_type, "new-trip-request");
        assert_matches!(msg.event, InboundEvent::NewTripRequest(p) => {
            assert_eq!(p.latitude, Some(23.8));
            assert_eq!(p.longitude, Some(90.4));
            assert!((p.fare - 500.0).abs() < f64::EPSILON);
        });
    }

    #[test]
    fn bid_keeps_spelling_for_relay() {
        let msg = decode(r#"{"type":"driver-bid-offer","data":{"req_id":1,"amount":600}}"#).unwrap();
        assert_matches!(msg.event, InboundEvent::Bid { relay_as: "driver-bid-offer", payload } => {
            assert_eq!(payload.req_id, RequestId::new(1));
            assert!(payload.vehicle.is_none());
        });
    }

    #[test]
    fn location_spellings_map_to_kinds() {
        let msg = decode(r#"{"type":"update-location","data":{"latitude":1.0,"longitude":2.0}}"#).unwrap();
        assert_matches!(
            msg.event,
            InboundEvent::DriverLocation { kind: LocationEventKind::UpdateLocation, .. }
        );
    }

    #[test]
    fn ping_reads_timestamp_from_data_or_top_level() {
        let a = decode(r#"{"type":"ping","data":{"timestamp":123}}"#).unwrap();
        assert_matches!(a.event, InboundEvent::Ping { timestamp } if timestamp == json!(123));
        let b = decode(r#"{"type":"ping","timestamp":"t1"}"#).unwrap();
        assert_matches!(b.event, InboundEvent::Ping { timestamp } if timestamp == json!("t1"));
    }

    #[test]
    fn unknown_type_keeps_original_envelope() {
        let text = r#"{"type":"future-thing","data":{"x":1},"extra":true}"#;
        let msg = decode(text).unwrap();
        assert_eq!(msg.metric_label(), "unrecognized");
        assert_matches!(msg.event, InboundEvent::Unrecognized(v) => {
            assert_eq!(v, serde_json::from_str::<Value>(text).unwrap());
        });
    }

    #[test]
    fn undecodable_text_is_validation_error() {
        assert_matches!(decode("{not json"), Err(DispatchError::Validation(_)));
        assert_matches!(decode(r#"{"data":{}}"#), Err(DispatchError::Validation(_)));
        assert_matches!(decode(r#"{"type":5}"#), Err(DispatchError::Validation(_)));
    }

    #[test]
    fn missing_payload_field_names_the_event() {
        let err = decode(r#"{"type":"decline","data":{}}"#).unwrap_err();
        assert!(err.to_string().contains("invalid decline payload"));
        let err = decode(r#"{"type":"trip-ended"}"#).unwrap_err();
        assert!(err.to_string().contains("trip-ended"));
    }

    #[test]
    fn error_envelope_carries_code_and_event() {
        let env = Envelope::error(&DispatchError::Conflict("dup".into()), Some("decline"));
        let json: Value = serde_json::from_str(&env.encode().unwrap()).unwrap();
        assert_eq!(json["type"], "error");
        assert_eq!(json["data"]["code"], "CONFLICT");
        assert_eq!(json["data"]["message"], "dup");
        assert_eq!(json["data"]["event"], "decline");
    }

    #[test]
    fn echo_reply_is_verbatim() {
        let raw: Value = serde_json::from_str(r#"{"type":"custom","data":[1,2],"x":"y"}"#).unwrap();
        let reply = Reply::Echo(raw.clone());
        assert_eq!(reply.event_type(), Some("custom"));
        let back: Value = serde_json::from_str(&reply.encode().unwrap()).unwrap();
        assert_eq!(back, raw);
    }

    #[test]
    fn envelope_without_data_omits_field() {
        let env = Envelope::new("new-client", Value::Null);
        assert_eq!(&*env.encode().unwrap(), r#"{"type":"new-client"}"#);
    }
}
