//! Durable notification records for cross-party negotiation events.
//!
//! Persistence is best-effort: a failed write is logged and counted, and the
//! live message is still delivered.

use metrics::counter;
use rescue_core::status::NotificationKind;
use rescue_core::{DriverId, NotificationId, Participant};
use rescue_store::{DispatchStore, NewNotification, StoreError, TripRequestRow};
use tracing::warn;

use crate::metrics::NOTIFICATION_PERSIST_FAILURES_TOTAL;

/// Durable append-only sink for notifications.
#[cfg_attr(test, mockall::automock)]
pub trait NotificationSink: Send + Sync {
    /// Append a notification, returning its ID.
    fn record(&self, notification: &NewNotification) -> Result<NotificationId, StoreError>;
}

impl NotificationSink for DispatchStore {
    fn record(&self, notification: &NewNotification) -> Result<NotificationId, StoreError> {
        self.record_notification(notification)
    }
}

/// Persist `notification`, logging instead of failing.
pub fn record_best_effort(
    sink: &dyn NotificationSink,
    notification: &NewNotification,
) -> Option<NotificationId> {
    match sink.record(notification) {
        Ok(id) => Some(id),
        Err(e) => {
            counter!(NOTIFICATION_PERSIST_FAILURES_TOTAL).increment(1);
            warn!(
                recipient = %Participant {
                    role: notification.recipient_type,
                    id: notification.recipient_id,
                },
                kind = %notification.notification_type,
                error = %e,
                "failed to persist notification"
            );
            None
        }
    }
}

fn base(
    recipient: Participant,
    sender: Participant,
    kind: NotificationKind,
    request: &TripRequestRow,
    title: &str,
    message: String,
) -> NewNotification {
    NewNotification {
        recipient_id: recipient.id,
        recipient_type: recipient.role,
        sender_id: sender.id,
        sender_type: sender.role,
        notification_type: kind,
        title: title.to_string(),
        message,
        req_id: Some(request.req_id),
        bid_amount: None,
        original_amount: None,
        pickup_location: Some(request.pickup_location.clone()),
        destination: Some(request.destination.clone()),
        driver_name: None,
        driver_mobile: None,
        rider_name: None,
    }
}

fn taka(amount: f64) -> String {
    if amount.fract().abs() < f64::EPSILON {
        format!("৳{amount:.0}")
    } else {
        format!("৳{amount:.2}")
    }
}

/// A driver bid on the rider's request.
pub fn bid_received(
    request: &TripRequestRow,
    driver_id: DriverId,
    driver_name: &str,
    driver_mobile: Option<&str>,
    amount: f64,
) -> NewNotification {
    let mut n = base(
        Participant::rider(request.rider_id),
        Participant::driver(driver_id),
        NotificationKind::Bid,
        request,
        "Driver Bid Received",
        format!("{driver_name} offered {} for your trip", taka(amount)),
    );
    n.bid_amount = Some(amount);
    n.original_amount = Some(request.fare);
    n.driver_name = Some(driver_name.to_string());
    n.driver_mobile = driver_mobile.map(str::to_string);
    n
}

/// The rider countered a driver's bid.
pub fn rider_counter_offer(
    request: &TripRequestRow,
    driver_id: DriverId,
    rider_name: &str,
    amount: f64,
    current_bid: Option<f64>,
) -> NewNotification {
    let mut n = base(
        Participant::driver(driver_id),
        Participant::rider(request.rider_id),
        NotificationKind::CounterOffer,
        request,
        "Rider Counter Offer",
        format!("{rider_name} offered {} for the trip", taka(amount)),
    );
    n.bid_amount = Some(amount);
    n.original_amount = current_bid;
    n.rider_name = Some(rider_name.to_string());
    n
}

/// The driver countered the rider.
pub fn driver_counter_offer(
    request: &TripRequestRow,
    driver_id: DriverId,
    driver_name: &str,
    amount: f64,
    current_bid: Option<f64>,
) -> NewNotification {
    let mut n = base(
        Participant::rider(request.rider_id),
        Participant::driver(driver_id),
        NotificationKind::CounterOffer,
        request,
        "Driver Counter Offer",
        format!("Driver offered {} for your trip", taka(amount)),
    );
    n.bid_amount = Some(amount);
    n.original_amount = current_bid;
    n.driver_name = Some(driver_name.to_string());
    n
}

/// The rider accepted a driver's bid.
pub fn rider_accepted_bid(
    request: &TripRequestRow,
    driver_id: DriverId,
    rider_name: &str,
    amount: f64,
) -> NewNotification {
    let mut n = base(
        Participant::driver(driver_id),
        Participant::rider(request.rider_id),
        NotificationKind::RiderAcceptedBid,
        request,
        "Rider Accepted Your Bid!",
        format!(
            "{rider_name} has accepted your bid of {}. You can now accept the trip or cancel.",
            taka(amount)
        ),
    );
    n.bid_amount = Some(amount);
    n.original_amount = Some(request.fare);
    n.rider_name = Some(rider_name.to_string());
    n
}
