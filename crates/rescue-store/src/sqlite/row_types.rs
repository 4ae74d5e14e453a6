//! Database row types for mapping between `SQLite` rows and Rust structs.
//!
//! Row types double as the JSON bodies of the query surface, so field names
//! follow the wire spelling (`req_id`, `driver_id`, ...). Insert-side structs
//! (`New*`) carry only what the caller decides; IDs, statuses, and timestamps
//! are assigned by the repositories.

use std::str::FromStr;

use rescue_core::status::{
    NotificationKind, NotificationStatus, ResponseStatus, TripRequestStatus, TripStatus,
};
use rescue_core::{DriverId, NotificationId, RequestId, ResponseId, RiderId, Role, TripId};
use serde::{Deserialize, Serialize};

/// Driver account from the `drivers` table.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DriverRow {
    /// Driver ID.
    pub driver_id: DriverId,
    /// Display name.
    pub name: String,
    /// Mobile number (unique).
    pub mobile: String,
    /// Email (unique).
    pub email: String,
    /// Average rating.
    pub ratings: f64,
    /// Whether the driver accepts new requests.
    pub is_available: bool,
    /// Creation timestamp.
    pub created_at: String,
}

/// Rider account from the `riders` table.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RiderRow {
    /// Rider ID.
    pub rider_id: RiderId,
    /// Display name.
    pub name: String,
    /// Mobile number (unique).
    pub mobile: String,
    /// Email (unique).
    pub email: String,
    /// Creation timestamp.
    pub created_at: String,
}

/// Durable driver location from `driver_locations`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DriverLocationRow {
    /// Driver ID.
    pub driver_id: DriverId,
    /// Latitude in degrees.
    pub latitude: f64,
    /// Longitude in degrees.
    pub longitude: f64,
    /// Last write timestamp.
    pub updated_at: String,
}

/// Trip request from `trip_requests`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TripRequestRow {
    /// Request ID.
    pub req_id: RequestId,
    /// Requesting rider.
    pub rider_id: RiderId,
    /// Pickup descriptor.
    pub pickup_location: String,
    /// Destination descriptor.
    pub destination: String,
    /// Requested fare.
    pub fare: f64,
    /// Pickup latitude.
    pub latitude: Option<f64>,
    /// Pickup longitude.
    pub longitude: Option<f64>,
    /// Lifecycle status.
    pub status: TripRequestStatus,
    /// Creation timestamp.
    pub created_at: String,
}

/// Driver response (bid or decline) from `driver_responses`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DriverResponseRow {
    /// Response ID.
    pub response_id: ResponseId,
    /// Request responded to.
    pub req_id: RequestId,
    /// Responding driver.
    pub driver_id: DriverId,
    /// Driver name at response time.
    pub driver_name: Option<String>,
    /// Driver mobile at response time.
    pub driver_mobile: Option<String>,
    /// Offered amount (absent for declines).
    pub amount: Option<f64>,
    /// Driver rating shown to the rider.
    pub rating: f64,
    /// Vehicle description.
    pub vehicle: Option<String>,
    /// Estimated arrival.
    pub eta: Option<String>,
    /// Medical specialty or equipment.
    pub specialty: Option<String>,
    /// Lifecycle status.
    pub status: ResponseStatus,
    /// Creation timestamp.
    pub created_at: String,
    /// Last change timestamp.
    pub updated_at: String,
}

/// Trip from `ongoing_trips`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OngoingTripRow {
    /// Trip ID.
    pub trip_id: TripId,
    /// Originating request.
    pub req_id: RequestId,
    /// Rider party.
    pub rider_id: RiderId,
    /// Driver party.
    pub driver_id: DriverId,
    /// Pickup descriptor.
    pub pickup_location: String,
    /// Destination descriptor.
    pub destination: String,
    /// Agreed fare.
    pub fare: f64,
    /// Lifecycle status.
    pub status: TripStatus,
    /// Start timestamp.
    pub start_time: String,
    /// End timestamp (terminal trips only).
    pub end_time: Option<String>,
    /// Live rider latitude.
    pub rider_latitude: Option<f64>,
    /// Live rider longitude.
    pub rider_longitude: Option<f64>,
    /// Live driver latitude.
    pub driver_latitude: Option<f64>,
    /// Live driver longitude.
    pub driver_longitude: Option<f64>,
}

/// Notification from `notifications`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NotificationRow {
    /// Notification ID.
    pub notification_id: NotificationId,
    /// Recipient account ID.
    pub recipient_id: i64,
    /// Recipient account kind.
    pub recipient_type: Role,
    /// Sender account ID.
    pub sender_id: i64,
    /// Sender account kind.
    pub sender_type: Role,
    /// What happened.
    pub notification_type: NotificationKind,
    /// Short headline.
    pub title: String,
    /// Body text.
    pub message: String,
    /// Related request.
    pub req_id: Option<RequestId>,
    /// Amount proposed by this event.
    pub bid_amount: Option<f64>,
    /// Amount being countered.
    pub original_amount: Option<f64>,
    /// Read state.
    pub status: NotificationStatus,
    /// Creation timestamp.
    pub created_at: String,
    /// Pickup descriptor of the related request.
    pub pickup_location: Option<String>,
    /// Destination descriptor of the related request.
    pub destination: Option<String>,
    /// Driver name, when a driver is involved.
    pub driver_name: Option<String>,
    /// Driver mobile, when a driver is involved.
    pub driver_mobile: Option<String>,
    /// Rider name, when a rider is involved.
    pub rider_name: Option<String>,
}

/// New driver account.
#[derive(Clone, Debug)]
pub struct NewDriver {
    /// Display name.
    pub name: String,
    /// Mobile number.
    pub mobile: String,
    /// Email.
    pub email: String,
    /// Starting rating.
    pub ratings: f64,
}

/// New rider account.
#[derive(Clone, Debug)]
pub struct NewRider {
    /// Display name.
    pub name: String,
    /// Mobile number.
    pub mobile: String,
    /// Email.
    pub email: String,
}

/// Partial profile update. `None` leaves a field unchanged.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct ProfileUpdate {
    /// New display name.
    pub name: Option<String>,
    /// New mobile number.
    pub mobile: Option<String>,
    /// New email.
    pub email: Option<String>,
}

/// New trip request.
#[derive(Clone, Debug)]
pub struct NewTripRequest {
    /// Requesting rider.
    pub rider_id: RiderId,
    /// Pickup descriptor.
    pub pickup_location: String,
    /// Destination descriptor.
    pub destination: String,
    /// Requested fare.
    pub fare: f64,
    /// Pickup latitude.
    pub latitude: Option<f64>,
    /// Pickup longitude.
    pub longitude: Option<f64>,
}

/// Bid contents submitted by a driver.
#[derive(Clone, Debug, Default)]
pub struct BidDetails {
    /// Driver name shown to the rider.
    pub driver_name: Option<String>,
    /// Driver mobile shown to the rider.
    pub driver_mobile: Option<String>,
    /// Offered amount.
    pub amount: f64,
    /// Rating shown to the rider (defaults to 4.5).
    pub rating: Option<f64>,
    /// Vehicle description.
    pub vehicle: Option<String>,
    /// Estimated arrival.
    pub eta: Option<String>,
    /// Specialty or equipment.
    pub specialty: Option<String>,
}

/// New notification to append.
#[derive(Clone, Debug, PartialEq)]
pub struct NewNotification {
    /// Recipient account ID.
    pub recipient_id: i64,
    /// Recipient account kind.
    pub recipient_type: Role,
    /// Sender account ID.
    pub sender_id: i64,
    /// Sender account kind.
    pub sender_type: Role,
    /// What happened.
    pub notification_type: NotificationKind,
    /// Short headline.
    pub title: String,
    /// Body text.
    pub message: String,
    /// Related request.
    pub req_id: Option<RequestId>,
    /// Amount proposed by this event.
    pub bid_amount: Option<f64>,
    /// Amount being countered.
    pub original_amount: Option<f64>,
    /// Pickup descriptor of the related request.
    pub pickup_location: Option<String>,
    /// Destination descriptor of the related request.
    pub destination: Option<String>,
    /// Driver name, when a driver is involved.
    pub driver_name: Option<String>,
    /// Driver mobile, when a driver is involved.
    pub driver_mobile: Option<String>,
    /// Rider name, when a rider is involved.
    pub rider_name: Option<String>,
}

/// Read a text column and parse it into one of the status enums.
pub(crate) fn text_column<T>(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr<Err = String>,
{
    let raw: String = row.get(idx)?;
    raw.parse().map_err(|e: String| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, e.into())
    })
}

/// Current time as stored in every timestamp column.
pub(crate) fn now() -> String {
    chrono::Utc::now().to_rfc3339()
}
