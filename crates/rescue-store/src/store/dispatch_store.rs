//! Transactional dispatch operations over the repository layer.
//!
//! Precondition checks (request still pending, no earlier response, trip
//! still ongoing) run inside the same transaction as the write they guard.
//! Ownership checks are the caller's job: they depend on who is asking, and
//! the rows they inspect never change owner.

use std::collections::HashSet;

use rescue_core::status::{
    NotificationStatus, ResponseStatus, TripRequestStatus, TripStatus,
};
use rescue_core::{
    DriverId, NotificationId, Participant, RequestId, ResponseId, RiderId, Role, TripId,
};
use tracing::{debug, instrument};

use crate::errors::{Result, StoreError};
use crate::sqlite::connection::{self, ConnectionConfig, ConnectionPool, PooledConnection};
use crate::sqlite::migrations::run_migrations;
use crate::sqlite::repositories::{
    DriverLocationRepo, DriverRepo, DriverResponseRepo, EngagedDriverRepo, NotificationRepo,
    OngoingTripRepo, RiderRepo, TripRequestRepo, TripStartPositions,
};
use crate::sqlite::row_types::{
    BidDetails, DriverLocationRow, DriverResponseRow, DriverRow, NewDriver, NewNotification,
    NewRider, NewTripRequest, NotificationRow, OngoingTripRow, ProfileUpdate, RiderRow,
    TripRequestRow,
};

/// Result of a bid submission.
#[derive(Clone, Debug)]
pub struct BidOutcome {
    /// The stored bid.
    pub response: DriverResponseRow,
    /// The request bid on.
    pub request: TripRequestRow,
    /// Whether an earlier pending bid by the same driver was replaced.
    pub revised: bool,
}

/// Result of confirming a trip.
#[derive(Clone, Debug)]
pub struct Confirmation {
    /// The trip just started.
    pub trip: OngoingTripRow,
    /// The request, now `accepted`.
    pub request: TripRequestRow,
    /// The winning response, now `accepted`.
    pub response: DriverResponseRow,
    /// Drivers whose pending or accepted bids were rejected by this
    /// confirmation.
    pub rejected_drivers: Vec<DriverId>,
}

/// Parameters for [`DispatchStore::confirm_trip`].
#[derive(Clone, Copy, Debug)]
pub struct ConfirmTrip {
    /// Request being confirmed.
    pub req_id: RequestId,
    /// Driver who wins the request.
    pub driver_id: DriverId,
    /// Agreed fare. Falls back to the bid amount, then the requested fare.
    pub fare: Option<f64>,
    /// Starting coordinates.
    pub positions: TripStartPositions,
    /// Whether a still-pending bid may be accepted as part of confirming.
    pub promote_pending: bool,
}

/// Result of a rider cancelling their request.
#[derive(Clone, Debug)]
pub struct CancelledRequest {
    /// The request, now `cancelled`.
    pub request: TripRequestRow,
    /// Drivers whose pending or accepted bids were rejected.
    pub rejected_drivers: Vec<DriverId>,
    /// Drivers that had been engaged on the request.
    pub released_drivers: Vec<DriverId>,
}

/// Durable store for accounts, requests, bids, trips, and notifications.
pub struct DispatchStore {
    pool: ConnectionPool,
}

impl DispatchStore {
    /// Wrap an existing pool. The schema is assumed to be migrated.
    pub fn new(pool: ConnectionPool) -> Self {
        Self { pool }
    }

    /// Open (or create) a file-backed store and bring its schema up to date.
    pub fn open(path: &str, config: &ConnectionConfig) -> Result<Self> {
        let store = Self::new(connection::new_file(path, config)?);
        let applied = store.migrate()?;
        debug!(path, applied, "dispatch store opened");
        Ok(store)
    }

    /// A fresh in-memory store with the schema applied.
    pub fn open_in_memory() -> Result<Self> {
        let store = Self::new(connection::new_in_memory(&ConnectionConfig::default())?);
        let _ = store.migrate()?;
        Ok(store)
    }

    /// Apply pending migrations. Returns how many ran.
    pub fn migrate(&self) -> Result<u32> {
        let conn = self.conn()?;
        run_migrations(&conn)
    }

    fn conn(&self) -> Result<PooledConnection> {
        Ok(self.pool.get()?)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Accounts
    // ─────────────────────────────────────────────────────────────────────

    /// Create a driver account.
    pub fn create_driver(&self, new: &NewDriver) -> Result<DriverRow> {
        DriverRepo::create(&*self.conn()?, new)
    }

    /// Create a rider account.
    pub fn create_rider(&self, new: &NewRider) -> Result<RiderRow> {
        RiderRepo::create(&*self.conn()?, new)
    }

    /// Look up a driver.
    pub fn driver(&self, id: DriverId) -> Result<Option<DriverRow>> {
        DriverRepo::get(&*self.conn()?, id)
    }

    /// Look up a rider.
    pub fn rider(&self, id: RiderId) -> Result<Option<RiderRow>> {
        RiderRepo::get(&*self.conn()?, id)
    }

    /// Partially update a driver profile.
    pub fn update_driver_profile(&self, id: DriverId, update: &ProfileUpdate) -> Result<DriverRow> {
        DriverRepo::update_profile(&*self.conn()?, id, update)?
            .ok_or_else(|| StoreError::not_found("driver", id))
    }

    /// Partially update a rider profile.
    pub fn update_rider_profile(&self, id: RiderId, update: &ProfileUpdate) -> Result<RiderRow> {
        RiderRepo::update_profile(&*self.conn()?, id, update)?
            .ok_or_else(|| StoreError::not_found("rider", id))
    }

    /// Toggle whether a driver takes new requests.
    pub fn set_driver_available(&self, id: DriverId, available: bool) -> Result<DriverRow> {
        let conn = self.conn()?;
        if !DriverRepo::set_available(&conn, id, available)? {
            return Err(StoreError::not_found("driver", id));
        }
        DriverRepo::get(&conn, id)?.ok_or_else(|| StoreError::not_found("driver", id))
    }

    /// Drivers flagged available.
    pub fn available_drivers(&self) -> Result<Vec<DriverRow>> {
        DriverRepo::list_available(&*self.conn()?)
    }

    /// `(total, available)` driver counts.
    pub fn driver_counts(&self) -> Result<(i64, i64)> {
        DriverRepo::counts(&*self.conn()?)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Locations
    // ─────────────────────────────────────────────────────────────────────

    /// Persist a driver's latest position.
    pub fn record_driver_location(&self, id: DriverId, latitude: f64, longitude: f64) -> Result<()> {
        DriverLocationRepo::upsert(&*self.conn()?, id, latitude, longitude)
    }

    /// A driver's last persisted position.
    pub fn driver_location(&self, id: DriverId) -> Result<Option<DriverLocationRow>> {
        DriverLocationRepo::get(&*self.conn()?, id)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Trip requests
    // ─────────────────────────────────────────────────────────────────────

    /// Create a pending trip request.
    #[instrument(skip(self, new), fields(rider_id = %new.rider_id))]
    pub fn create_trip_request(&self, new: &NewTripRequest) -> Result<TripRequestRow> {
        TripRequestRepo::create(&*self.conn()?, new)
    }

    /// Look up a trip request.
    pub fn trip_request(&self, id: RequestId) -> Result<Option<TripRequestRow>> {
        TripRequestRepo::get(&*self.conn()?, id)
    }

    /// A rider's requests, newest first.
    pub fn rider_requests(
        &self,
        rider_id: RiderId,
        status: Option<TripRequestStatus>,
    ) -> Result<Vec<TripRequestRow>> {
        TripRequestRepo::list_for_rider(&*self.conn()?, rider_id, status)
    }

    /// Pending requests the driver has not answered yet.
    pub fn open_requests_for_driver(&self, driver_id: DriverId) -> Result<Vec<TripRequestRow>> {
        TripRequestRepo::list_open_for_driver(&*self.conn()?, driver_id)
    }

    /// Cancel a pending request, reject its pending bids, and release every
    /// driver engaged on it.
    #[instrument(skip(self))]
    pub fn cancel_trip_request(&self, req_id: RequestId) -> Result<CancelledRequest> {
        let conn = self.conn()?;
        let tx = conn.unchecked_transaction()?;

        let _ = pending_request(&tx, req_id)?;
        if !TripRequestRepo::transition(
            &tx,
            req_id,
            TripRequestStatus::Pending,
            TripRequestStatus::Cancelled,
        )? {
            return Err(not_pending(req_id));
        }
        let rejected_drivers = DriverResponseRepo::reject_open(&tx, req_id, None)?;
        let released_drivers = engaged_on(&tx, req_id)?;
        let _ = EngagedDriverRepo::release_request(&tx, req_id)?;
        let request = fetch_request(&tx, req_id)?;

        tx.commit()?;
        Ok(CancelledRequest {
            request,
            rejected_drivers,
            released_drivers,
        })
    }

    // ─────────────────────────────────────────────────────────────────────
    // Driver responses
    // ─────────────────────────────────────────────────────────────────────

    /// Record a decline. A driver answers each request at most once.
    #[instrument(skip(self, driver_name))]
    pub fn record_decline(
        &self,
        req_id: RequestId,
        driver_id: DriverId,
        driver_name: Option<&str>,
    ) -> Result<(TripRequestRow, DriverResponseRow)> {
        let conn = self.conn()?;
        let tx = conn.unchecked_transaction()?;

        let request = pending_request(&tx, req_id)?;
        if let Some(existing) = DriverResponseRepo::find(&tx, req_id, driver_id)? {
            return Err(StoreError::Conflict(format!(
                "driver {driver_id} already responded to trip request {req_id} ({})",
                existing.status
            )));
        }
        let response = DriverResponseRepo::insert_decline(&tx, req_id, driver_id, driver_name)?;

        tx.commit()?;
        Ok((request, response))
    }

    /// Submit a bid. A driver with a pending bid on the request replaces it;
    /// any other earlier response is a conflict.
    #[instrument(skip(self, bid), fields(amount = bid.amount))]
    pub fn submit_bid(
        &self,
        req_id: RequestId,
        driver_id: DriverId,
        bid: &BidDetails,
    ) -> Result<BidOutcome> {
        let conn = self.conn()?;
        let tx = conn.unchecked_transaction()?;

        let request = pending_request(&tx, req_id)?;
        let (response, revised) = match DriverResponseRepo::find(&tx, req_id, driver_id)? {
            None => (DriverResponseRepo::insert_bid(&tx, req_id, driver_id, bid)?, false),
            Some(existing) if existing.status == ResponseStatus::Pending => {
                let _ = DriverResponseRepo::revise_pending_bid(&tx, existing.response_id, bid)?;
                (fetch_response(&tx, existing.response_id)?, true)
            }
            Some(existing) => {
                return Err(StoreError::Conflict(format!(
                    "driver {driver_id} already responded to trip request {req_id} ({})",
                    existing.status
                )));
            }
        };

        tx.commit()?;
        Ok(BidOutcome {
            response,
            request,
            revised,
        })
    }

    /// The driver's pending bid on a request.
    pub fn pending_bid(&self, req_id: RequestId, driver_id: DriverId) -> Result<DriverResponseRow> {
        let conn = self.conn()?;
        let _ = pending_request(&conn, req_id)?;
        let response = find_response(&conn, req_id, driver_id)?;
        if response.status != ResponseStatus::Pending {
            return Err(StoreError::Conflict(format!(
                "bid by driver {driver_id} on trip request {req_id} is already {}",
                response.status
            )));
        }
        Ok(response)
    }

    /// The rider accepts a driver's bid, optionally at a different amount.
    ///
    /// Engages the driver. Accepting an already-accepted bid is a no-op that
    /// returns the stored row.
    #[instrument(skip(self))]
    pub fn accept_bid(
        &self,
        req_id: RequestId,
        driver_id: DriverId,
        amount: Option<f64>,
    ) -> Result<(TripRequestRow, DriverResponseRow)> {
        let conn = self.conn()?;
        let tx = conn.unchecked_transaction()?;

        let request = pending_request(&tx, req_id)?;
        let response = find_response(&tx, req_id, driver_id)?;
        match response.status {
            ResponseStatus::Pending => {
                let _ = DriverResponseRepo::resolve_pending(
                    &tx,
                    response.response_id,
                    ResponseStatus::Accepted,
                    amount,
                )?;
            }
            ResponseStatus::Accepted => {}
            other => {
                return Err(StoreError::Conflict(format!(
                    "bid by driver {driver_id} on trip request {req_id} is already {other}"
                )));
            }
        }
        let _ = EngagedDriverRepo::engage(&tx, req_id, driver_id)?;
        let response = fetch_response(&tx, response.response_id)?;

        tx.commit()?;
        Ok((request, response))
    }

    /// Start the trip for a request.
    ///
    /// In one transaction: the request must still be pending with no trip in
    /// progress, the winning bid must be accepted (or pending when
    /// `promote_pending` is set), the trip row is inserted, the request moves
    /// to `accepted`, every other pending or accepted bid is rejected and its
    /// driver released, and the winner is engaged.
    #[instrument(skip(self, confirm), fields(req_id = %confirm.req_id, driver_id = %confirm.driver_id))]
    pub fn confirm_trip(&self, confirm: &ConfirmTrip) -> Result<Confirmation> {
        let ConfirmTrip {
            req_id,
            driver_id,
            fare,
            positions,
            promote_pending,
        } = *confirm;

        let conn = self.conn()?;
        let tx = conn.unchecked_transaction()?;

        let request = pending_request(&tx, req_id)?;
        if let Some(trip) = OngoingTripRepo::active_for_request(&tx, req_id)? {
            return Err(StoreError::Conflict(format!(
                "trip request {req_id} already has trip {} in progress",
                trip.trip_id
            )));
        }
        let response = find_response(&tx, req_id, driver_id)?;
        match response.status {
            ResponseStatus::Accepted => {}
            ResponseStatus::Pending if promote_pending => {
                let _ = DriverResponseRepo::resolve_pending(
                    &tx,
                    response.response_id,
                    ResponseStatus::Accepted,
                    fare,
                )?;
            }
            ResponseStatus::Pending => {
                return Err(StoreError::Conflict(format!(
                    "bid by driver {driver_id} on trip request {req_id} has not been accepted"
                )));
            }
            other => {
                return Err(StoreError::Conflict(format!(
                    "bid by driver {driver_id} on trip request {req_id} is already {other}"
                )));
            }
        }

        let fare = fare.or(response.amount).unwrap_or(request.fare);
        let trip = OngoingTripRepo::start(&tx, &request, driver_id, fare, positions)?;
        if !TripRequestRepo::transition(
            &tx,
            req_id,
            TripRequestStatus::Pending,
            TripRequestStatus::Accepted,
        )? {
            return Err(not_pending(req_id));
        }
        let rejected_drivers = DriverResponseRepo::reject_open(&tx, req_id, Some(driver_id))?;
        for loser in &rejected_drivers {
            let _ = EngagedDriverRepo::release(&tx, req_id, *loser)?;
        }
        let _ = EngagedDriverRepo::engage(&tx, req_id, driver_id)?;
        let request = fetch_request(&tx, req_id)?;
        let response = fetch_response(&tx, response.response_id)?;

        tx.commit()?;
        debug!(trip_id = %trip.trip_id, rejected = rejected_drivers.len(), "trip confirmed");
        Ok(Confirmation {
            trip,
            request,
            response,
            rejected_drivers,
        })
    }

    /// Responses on a request, oldest first.
    pub fn responses(
        &self,
        req_id: RequestId,
        driver_id: Option<DriverId>,
        status: Option<ResponseStatus>,
    ) -> Result<Vec<DriverResponseRow>> {
        DriverResponseRepo::list_for_request(&*self.conn()?, req_id, driver_id, status)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Trips
    // ─────────────────────────────────────────────────────────────────────

    /// Look up a trip.
    pub fn trip(&self, id: TripId) -> Result<Option<OngoingTripRow>> {
        OngoingTripRepo::get(&*self.conn()?, id)
    }

    /// Trips where `party` is the rider or the driver.
    pub fn trips_for(
        &self,
        party: Participant,
        status: Option<TripStatus>,
    ) -> Result<Vec<OngoingTripRow>> {
        OngoingTripRepo::list_for_party(&*self.conn()?, party, status)
    }

    /// Complete an ongoing trip and release its driver.
    #[instrument(skip(self))]
    pub fn end_trip(&self, trip_id: TripId) -> Result<OngoingTripRow> {
        self.finish_trip(trip_id, TripStatus::Completed)
    }

    /// The driver walks away from a request they won or were negotiating.
    ///
    /// Cancels the trip in progress (if this driver holds it), rejects the
    /// driver's open bid so it cannot be confirmed later, and releases the
    /// driver's engagement. Returns the cancelled trip, if there was one.
    #[instrument(skip(self))]
    pub fn cancel_by_driver(
        &self,
        req_id: RequestId,
        driver_id: DriverId,
    ) -> Result<(TripRequestRow, Option<OngoingTripRow>)> {
        let conn = self.conn()?;
        let tx = conn.unchecked_transaction()?;

        let request = fetch_request(&tx, req_id)?;
        let _ = find_response(&tx, req_id, driver_id)?;
        let cancelled = match OngoingTripRepo::active_for_request(&tx, req_id)? {
            Some(trip) if trip.driver_id == driver_id => {
                let _ = OngoingTripRepo::finish(&tx, trip.trip_id, TripStatus::Cancelled)?;
                Some(fetch_trip(&tx, trip.trip_id)?)
            }
            _ => None,
        };
        let _ = DriverResponseRepo::reject_driver(&tx, req_id, driver_id)?;
        let _ = EngagedDriverRepo::release(&tx, req_id, driver_id)?;

        tx.commit()?;
        Ok((request, cancelled))
    }

    /// Record a party's live position on an ongoing trip.
    pub fn update_trip_position(
        &self,
        trip_id: TripId,
        role: Role,
        latitude: f64,
        longitude: f64,
    ) -> Result<OngoingTripRow> {
        let conn = self.conn()?;
        let tx = conn.unchecked_transaction()?;

        let trip = fetch_trip(&tx, trip_id)?;
        if !OngoingTripRepo::update_position(&tx, trip_id, role, latitude, longitude)? {
            return Err(StoreError::Conflict(format!(
                "trip {trip_id} is already {}",
                trip.status
            )));
        }
        let trip = fetch_trip(&tx, trip_id)?;

        tx.commit()?;
        Ok(trip)
    }

    fn finish_trip(&self, trip_id: TripId, to: TripStatus) -> Result<OngoingTripRow> {
        let conn = self.conn()?;
        let tx = conn.unchecked_transaction()?;

        let trip = fetch_trip(&tx, trip_id)?;
        if !OngoingTripRepo::finish(&tx, trip_id, to)? {
            return Err(StoreError::Conflict(format!(
                "trip {trip_id} is already {}",
                trip.status
            )));
        }
        let _ = EngagedDriverRepo::release(&tx, trip.req_id, trip.driver_id)?;
        let trip = fetch_trip(&tx, trip_id)?;

        tx.commit()?;
        Ok(trip)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Engagement
    // ─────────────────────────────────────────────────────────────────────

    /// Drivers engaged on any request.
    pub fn engaged_drivers(&self) -> Result<HashSet<DriverId>> {
        Ok(EngagedDriverRepo::engaged_drivers(&*self.conn()?)?
            .into_iter()
            .collect())
    }

    // ─────────────────────────────────────────────────────────────────────
    // Notifications
    // ─────────────────────────────────────────────────────────────────────

    /// Append an unread notification.
    pub fn record_notification(&self, new: &NewNotification) -> Result<NotificationId> {
        NotificationRepo::insert(&*self.conn()?, new)
    }

    /// A recipient's notifications, newest first.
    pub fn notifications(
        &self,
        recipient: Participant,
        status: Option<NotificationStatus>,
    ) -> Result<Vec<NotificationRow>> {
        NotificationRepo::list_for_recipient(&*self.conn()?, recipient, status)
    }

    /// Count a recipient's notifications in `status`.
    pub fn count_notifications(
        &self,
        recipient: Participant,
        status: NotificationStatus,
    ) -> Result<i64> {
        NotificationRepo::count_for_recipient(&*self.conn()?, recipient, status)
    }

    /// Change the status of one of the recipient's notifications.
    pub fn set_notification_status(
        &self,
        id: NotificationId,
        recipient: Participant,
        status: NotificationStatus,
    ) -> Result<NotificationRow> {
        NotificationRepo::set_status(&*self.conn()?, id, recipient, status)
    }
}

fn not_pending(req_id: RequestId) -> StoreError {
    StoreError::Conflict(format!("trip request {req_id} is no longer pending"))
}

fn fetch_request(conn: &rusqlite::Connection, req_id: RequestId) -> Result<TripRequestRow> {
    TripRequestRepo::get(conn, req_id)?.ok_or_else(|| StoreError::not_found("trip request", req_id))
}

fn pending_request(conn: &rusqlite::Connection, req_id: RequestId) -> Result<TripRequestRow> {
    let request = fetch_request(conn, req_id)?;
    if request.status.is_open() {
        Ok(request)
    } else {
        Err(not_pending(req_id))
    }
}

fn find_response(
    conn: &rusqlite::Connection,
    req_id: RequestId,
    driver_id: DriverId,
) -> Result<DriverResponseRow> {
    DriverResponseRepo::find(conn, req_id, driver_id)?.ok_or_else(|| {
        StoreError::not_found("driver response", format!("request {req_id}, driver {driver_id}"))
    })
}

fn fetch_response(conn: &rusqlite::Connection, id: ResponseId) -> Result<DriverResponseRow> {
    DriverResponseRepo::get(conn, id)?.ok_or_else(|| StoreError::not_found("driver response", id))
}

fn fetch_trip(conn: &rusqlite::Connection, id: TripId) -> Result<OngoingTripRow> {
    OngoingTripRepo::get(conn, id)?.ok_or_else(|| StoreError::not_found("trip", id))
}

fn engaged_on(conn: &rusqlite::Connection, req_id: RequestId) -> Result<Vec<DriverId>> {
    let mut stmt = conn.prepare("SELECT driver_id FROM engaged_drivers WHERE req_id = ?1")?;
    let rows = stmt
        .query_map([req_id.get()], |row| row.get::<_, i64>(0).map(DriverId::new))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

#[cfg(test)]
#[allow(unused_results)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn setup() -> DispatchStore {
        DispatchStore::open_in_memory().unwrap()
    }

    fn driver(store: &DispatchStore, n: u32) -> DriverId {
        store
            .create_driver(&NewDriver {
                name: format!("Driver {n}"),
                mobile: format!("0170000{n:04}"),
                email: format!("driver{n}@example.com"),
                ratings: 4.8,
            })
            .unwrap()
            .driver_id
    }

    fn rider(store: &DispatchStore, n: u32) -> RiderId {
        store
            .create_rider(&NewRider {
                name: format!("Rider {n}"),
                mobile: format!("0180000{n:04}"),
                email: format!("rider{n}@example.com"),
            })
            .unwrap()
            .rider_id
    }

    fn request(store: &DispatchStore, rider_id: RiderId) -> RequestId {
        store
            .create_trip_request(&NewTripRequest {
                rider_id,
                pickup_location: "Dhanmondi 27".into(),
                destination: "Square Hospital".into(),
                fare: 500.0,
                latitude: Some(23.75),
                longitude: Some(90.37),
            })
            .unwrap()
            .req_id
    }

    fn bid(amount: f64) -> BidDetails {
        BidDetails {
            amount,
            ..BidDetails::default()
        }
    }

    fn confirm(req_id: RequestId, driver_id: DriverId, promote_pending: bool) -> ConfirmTrip {
        ConfirmTrip {
            req_id,
            driver_id,
            fare: None,
            positions: TripStartPositions::default(),
            promote_pending,
        }
    }

    // ── Responses ─────────────────────────────────────────────────────

    #[test]
    fn decline_twice_conflicts() {
        let store = setup();
        let req = request(&store, rider(&store, 1));
        let d = driver(&store, 1);
        store.record_decline(req, d, Some("Driver 1")).unwrap();
        let err = store.record_decline(req, d, None).unwrap_err();
        assert_matches!(err, StoreError::Conflict(msg) if msg.contains("already responded"));
    }

    #[test]
    fn decline_unknown_request_is_not_found() {
        let store = setup();
        let d = driver(&store, 1);
        let err = store.record_decline(RequestId::new(42), d, None).unwrap_err();
        assert_matches!(err, StoreError::NotFound { entity: "trip request", .. });
    }

    #[test]
    fn rebid_replaces_pending_bid() {
        let store = setup();
        let req = request(&store, rider(&store, 1));
        let d = driver(&store, 1);
        let first = store.submit_bid(req, d, &bid(600.0)).unwrap();
        assert!(!first.revised);
        let second = store.submit_bid(req, d, &bid(550.0)).unwrap();
        assert!(second.revised);
        assert_eq!(second.response.response_id, first.response.response_id);
        assert_eq!(second.response.amount, Some(550.0));
        assert_eq!(store.responses(req, None, None).unwrap().len(), 1);
    }

    #[test]
    fn bid_after_decline_conflicts() {
        let store = setup();
        let req = request(&store, rider(&store, 1));
        let d = driver(&store, 1);
        store.record_decline(req, d, None).unwrap();
        let err = store.submit_bid(req, d, &bid(600.0)).unwrap_err();
        assert_matches!(err, StoreError::Conflict(_));
    }

    #[test]
    fn accept_bid_engages_driver_and_is_idempotent() {
        let store = setup();
        let req = request(&store, rider(&store, 1));
        let d = driver(&store, 1);
        store.submit_bid(req, d, &bid(600.0)).unwrap();
        let (_, response) = store.accept_bid(req, d, Some(580.0)).unwrap();
        assert_eq!(response.status, ResponseStatus::Accepted);
        assert_eq!(response.amount, Some(580.0));
        assert!(store.engaged_drivers().unwrap().contains(&d));

        let (_, again) = store.accept_bid(req, d, None).unwrap();
        assert_eq!(again.amount, Some(580.0));
    }

    #[test]
    fn accept_without_bid_is_not_found() {
        let store = setup();
        let req = request(&store, rider(&store, 1));
        let d = driver(&store, 1);
        let err = store.accept_bid(req, d, None).unwrap_err();
        assert_matches!(err, StoreError::NotFound { entity: "driver response", .. });
    }

    #[test]
    fn pending_bid_rejects_resolved_bids() {
        let store = setup();
        let req = request(&store, rider(&store, 1));
        let d = driver(&store, 1);
        store.submit_bid(req, d, &bid(600.0)).unwrap();
        assert!(store.pending_bid(req, d).is_ok());
        store.accept_bid(req, d, None).unwrap();
        assert_matches!(store.pending_bid(req, d), Err(StoreError::Conflict(_)));
    }

    // ── Confirmation ──────────────────────────────────────────────────

    #[test]
    fn confirm_requires_accepted_bid_unless_promoting() {
        let store = setup();
        let req = request(&store, rider(&store, 1));
        let d = driver(&store, 1);
        store.submit_bid(req, d, &bid(600.0)).unwrap();

        let err = store.confirm_trip(&confirm(req, d, false)).unwrap_err();
        assert_matches!(err, StoreError::Conflict(msg) if msg.contains("not been accepted"));

        let done = store.confirm_trip(&confirm(req, d, true)).unwrap();
        assert_eq!(done.response.status, ResponseStatus::Accepted);
        assert!((done.trip.fare - 600.0).abs() < f64::EPSILON);
    }

    #[test]
    fn confirm_rejects_losers_and_accepts_request() {
        let store = setup();
        let req = request(&store, rider(&store, 1));
        let winner = driver(&store, 1);
        let loser = driver(&store, 2);
        let decliner = driver(&store, 3);
        store.submit_bid(req, winner, &bid(600.0)).unwrap();
        store.submit_bid(req, loser, &bid(650.0)).unwrap();
        store.record_decline(req, decliner, None).unwrap();
        store.accept_bid(req, winner, None).unwrap();

        let done = store
            .confirm_trip(&ConfirmTrip {
                fare: Some(620.0),
                ..confirm(req, winner, false)
            })
            .unwrap();
        assert_eq!(done.rejected_drivers, vec![loser]);
        assert_eq!(done.request.status, TripRequestStatus::Accepted);
        assert_eq!(done.trip.status, TripStatus::Ongoing);
        assert!((done.trip.fare - 620.0).abs() < f64::EPSILON);

        let declined = store.responses(req, Some(decliner), None).unwrap();
        assert_eq!(declined[0].status, ResponseStatus::Declined);
    }

    #[test]
    fn confirm_rejects_and_releases_accepted_losers() {
        let store = setup();
        let req = request(&store, rider(&store, 1));
        let winner = driver(&store, 1);
        let loser = driver(&store, 2);
        store.submit_bid(req, winner, &bid(600.0)).unwrap();
        store.submit_bid(req, loser, &bid(580.0)).unwrap();
        store.accept_bid(req, winner, None).unwrap();
        store.accept_bid(req, loser, None).unwrap();

        let done = store.confirm_trip(&confirm(req, winner, false)).unwrap();
        assert_eq!(done.rejected_drivers, vec![loser]);
        let losing = store.responses(req, Some(loser), None).unwrap();
        assert_eq!(losing[0].status, ResponseStatus::Rejected);
        assert_eq!(store.engaged_drivers().unwrap(), HashSet::from([winner]));

        store.end_trip(done.trip.trip_id).unwrap();
        assert!(store.engaged_drivers().unwrap().is_empty());
    }

    #[test]
    fn second_confirmation_conflicts() {
        let store = setup();
        let req = request(&store, rider(&store, 1));
        let a = driver(&store, 1);
        let b = driver(&store, 2);
        store.submit_bid(req, a, &bid(600.0)).unwrap();
        store.submit_bid(req, b, &bid(610.0)).unwrap();
        store.confirm_trip(&confirm(req, a, true)).unwrap();
        let err = store.confirm_trip(&confirm(req, b, true)).unwrap_err();
        assert_matches!(err, StoreError::Conflict(_));
        assert_eq!(store.trips_for(Participant::driver(b), None).unwrap().len(), 0);
    }

    #[test]
    fn failed_confirmation_leaves_no_partial_state() {
        let store = setup();
        let req = request(&store, rider(&store, 1));
        let a = driver(&store, 1);
        let b = driver(&store, 2);
        store.submit_bid(req, a, &bid(600.0)).unwrap();
        store.submit_bid(req, b, &bid(610.0)).unwrap();
        assert!(store.confirm_trip(&confirm(req, a, false)).is_err());
        let pending = store
            .responses(req, None, Some(ResponseStatus::Pending))
            .unwrap();
        assert_eq!(pending.len(), 2);
        assert!(store.trips_for(Participant::driver(a), None).unwrap().is_empty());
    }

    // ── Trips ─────────────────────────────────────────────────────────

    #[test]
    fn end_trip_completes_and_releases() {
        let store = setup();
        let req = request(&store, rider(&store, 1));
        let d = driver(&store, 1);
        store.submit_bid(req, d, &bid(600.0)).unwrap();
        let trip = store.confirm_trip(&confirm(req, d, true)).unwrap().trip;

        let ended = store.end_trip(trip.trip_id).unwrap();
        assert_eq!(ended.status, TripStatus::Completed);
        assert!(ended.end_time.is_some());
        assert!(store.engaged_drivers().unwrap().is_empty());

        let err = store.end_trip(trip.trip_id).unwrap_err();
        assert_matches!(err, StoreError::Conflict(msg) if msg.contains("completed"));
    }

    #[test]
    fn driver_cancel_cancels_own_trip() {
        let store = setup();
        let req = request(&store, rider(&store, 1));
        let d = driver(&store, 1);
        store.submit_bid(req, d, &bid(600.0)).unwrap();
        store.confirm_trip(&confirm(req, d, true)).unwrap();

        let (_, cancelled) = store.cancel_by_driver(req, d).unwrap();
        assert_eq!(cancelled.unwrap().status, TripStatus::Cancelled);
        assert!(store.engaged_drivers().unwrap().is_empty());
    }

    #[test]
    fn driver_cancel_withdraws_accepted_bid() {
        let store = setup();
        let req = request(&store, rider(&store, 1));
        let d = driver(&store, 1);
        store.submit_bid(req, d, &bid(600.0)).unwrap();
        store.accept_bid(req, d, None).unwrap();

        let (request, cancelled) = store.cancel_by_driver(req, d).unwrap();
        assert!(cancelled.is_none());
        assert_eq!(request.status, TripRequestStatus::Pending);
        assert_eq!(
            store.responses(req, Some(d), None).unwrap()[0].status,
            ResponseStatus::Rejected
        );
        assert!(store.engaged_drivers().unwrap().is_empty());
        assert_matches!(
            store.confirm_trip(&confirm(req, d, false)),
            Err(StoreError::Conflict(msg)) if msg.contains("rejected")
        );
    }

    #[test]
    fn driver_cancel_without_response_is_not_found() {
        let store = setup();
        let req = request(&store, rider(&store, 1));
        let d = driver(&store, 1);
        assert_matches!(
            store.cancel_by_driver(req, d),
            Err(StoreError::NotFound { .. })
        );
    }

    #[test]
    fn position_updates_stop_after_trip_ends() {
        let store = setup();
        let req = request(&store, rider(&store, 1));
        let d = driver(&store, 1);
        store.submit_bid(req, d, &bid(600.0)).unwrap();
        let trip = store.confirm_trip(&confirm(req, d, true)).unwrap().trip;

        let moved = store
            .update_trip_position(trip.trip_id, Role::Driver, 23.76, 90.38)
            .unwrap();
        assert_eq!(moved.driver_latitude, Some(23.76));

        store.end_trip(trip.trip_id).unwrap();
        assert_matches!(
            store.update_trip_position(trip.trip_id, Role::Driver, 23.77, 90.39),
            Err(StoreError::Conflict(_))
        );
    }

    // ── Requests ──────────────────────────────────────────────────────

    #[test]
    fn rider_cancel_rejects_bids_and_releases_drivers() {
        let store = setup();
        let req = request(&store, rider(&store, 1));
        let a = driver(&store, 1);
        let b = driver(&store, 2);
        store.submit_bid(req, a, &bid(600.0)).unwrap();
        store.submit_bid(req, b, &bid(610.0)).unwrap();
        store.accept_bid(req, a, None).unwrap();

        let mut cancelled = store.cancel_trip_request(req).unwrap();
        assert_eq!(cancelled.request.status, TripRequestStatus::Cancelled);
        cancelled.rejected_drivers.sort();
        assert_eq!(cancelled.rejected_drivers, vec![a, b]);
        assert_eq!(cancelled.released_drivers, vec![a]);
        assert!(store.engaged_drivers().unwrap().is_empty());

        assert_matches!(store.cancel_trip_request(req), Err(StoreError::Conflict(_)));
        assert_matches!(
            store.submit_bid(req, b, &bid(500.0)),
            Err(StoreError::Conflict(_))
        );
    }

    // ── Accounts & notifications ──────────────────────────────────────

    #[test]
    fn availability_toggle_for_unknown_driver() {
        let store = setup();
        assert_matches!(
            store.set_driver_available(DriverId::new(9), false),
            Err(StoreError::NotFound { entity: "driver", .. })
        );
        let d = driver(&store, 1);
        assert!(!store.set_driver_available(d, false).unwrap().is_available);
        assert_eq!(store.driver_counts().unwrap(), (1, 0));
    }

    #[test]
    fn duplicate_driver_mobile_is_constraint_violation() {
        let store = setup();
        driver(&store, 1);
        let err = store
            .create_driver(&NewDriver {
                name: "Other".into(),
                mobile: "01700000001".into(),
                email: "other@example.com".into(),
                ratings: 4.0,
            })
            .unwrap_err();
        assert!(err.is_constraint_violation());
    }

    #[test]
    fn notifications_roundtrip_through_store() {
        let store = setup();
        let r = rider(&store, 1);
        let recipient = Participant::rider(r);
        let id = store
            .record_notification(&NewNotification {
                recipient_id: r.get(),
                recipient_type: Role::Rider,
                sender_id: 1,
                sender_type: Role::Driver,
                notification_type: rescue_core::status::NotificationKind::Bid,
                title: "Driver Bid Received".into(),
                message: "600".into(),
                req_id: None,
                bid_amount: Some(600.0),
                original_amount: None,
                pickup_location: None,
                destination: None,
                driver_name: None,
                driver_mobile: None,
                rider_name: None,
            })
            .unwrap();
        assert_eq!(store.count_notifications(recipient, NotificationStatus::Unread).unwrap(), 1);
        store
            .set_notification_status(id, recipient, NotificationStatus::Read)
            .unwrap();
        assert_eq!(store.count_notifications(recipient, NotificationStatus::Unread).unwrap(), 0);
        assert_eq!(store.notifications(recipient, None).unwrap().len(), 1);
    }
}
