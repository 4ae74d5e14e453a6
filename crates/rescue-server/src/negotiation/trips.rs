//! Trip request lifecycle: requests, bids, counter-offers, acceptance,
//! confirmation, cancellation, live trip positions, and completion.

use rescue_core::geo::GeoPoint;
use rescue_core::status::ResponseStatus;
use rescue_core::{
    DispatchError, DriverId, Identity, Participant, RequestId, Result, RiderId, Role, TripId,
};
use rescue_store::{
    BidDetails, BidOutcome, CancelledRequest, ConfirmTrip, Confirmation, DriverResponseRow,
    NewTripRequest, OngoingTripRow, TripRequestRow, TripStartPositions,
};
use serde_json::json;
use tracing::info;

use super::{Caller, NegotiationRouter, now_rfc3339, validate_amount};
use crate::notifications::{self, record_best_effort};
use crate::protocol::{
    BidAcceptance, BidDecision, BidPayload, Decision, DriverCancellation, DriverCounterOffer,
    Envelope, RiderCounterOffer, TripConfirmation, TripPosition, TripRequestPayload,
    event_types as et,
};

const REJECTED_FOR_CONFIRMATION: &str = "Another driver was confirmed for this trip";
const REJECTED_FOR_CANCELLATION: &str = "The rider cancelled this trip request";

impl NegotiationRouter {
    /// A rider opens a trip request; every connected driver hears about it.
    pub fn create_trip_request(
        &self,
        caller: &Caller,
        payload: TripRequestPayload,
    ) -> Result<TripRequestRow> {
        let identity = caller.require(et::NEW_TRIP_REQUEST, Role::Rider)?;
        let rider_id = rider_of(identity);

        if payload.pickup_location.trim().is_empty() || payload.destination.trim().is_empty() {
            return Err(DispatchError::Validation(
                "pickup_location and destination are required".into(),
            ));
        }
        let fare = validate_amount("fare", payload.fare)?;
        let point = match (payload.latitude, payload.longitude) {
            (Some(lat), Some(lon)) => Some(GeoPoint::new(lat, lon)?),
            (None, None) => None,
            _ => {
                return Err(DispatchError::Validation(
                    "latitude and longitude must be given together".into(),
                ));
            }
        };

        let request = self.store.create_trip_request(&NewTripRequest {
            rider_id,
            pickup_location: payload.pickup_location,
            destination: payload.destination,
            fare,
            latitude: point.map(|p| p.latitude),
            longitude: point.map(|p| p.longitude),
        })?;

        let rider_name = payload
            .rider_name
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| identity.name.clone());
        let delivered = self.registry.broadcast_by_role(
            Role::Driver,
            &Envelope::new(
                et::NEW_TRIP_REQUEST,
                json!({
                    "req_id": request.req_id,
                    "rider_id": request.rider_id,
                    "rider_name": rider_name,
                    "pickup_location": request.pickup_location,
                    "destination": request.destination,
                    "fare": request.fare,
                    "latitude": request.latitude,
                    "longitude": request.longitude,
                    "timestamp": request.created_at,
                    "status": request.status,
                }),
            ),
        );
        info!(req_id = %request.req_id, rider_id = %rider_id, drivers = delivered, "trip request created");
        Ok(request)
    }

    /// A driver declines a request. A driver answers each request once.
    pub fn decline(&self, caller: &Caller, req_id: RequestId) -> Result<DriverResponseRow> {
        let identity = caller.require(et::DECLINE, Role::Driver)?;
        let driver_id = driver_of(identity);
        let (_, response) = self
            .store
            .record_decline(req_id, driver_id, Some(&identity.name))?;
        info!(req_id = %req_id, driver_id = %driver_id, "decline recorded");
        Ok(response)
    }

    /// A driver bids (or revises a pending bid). The rider receives the bid
    /// under `relay_as`.
    pub fn submit_bid(
        &self,
        caller: &Caller,
        relay_as: &str,
        payload: &BidPayload,
    ) -> Result<BidOutcome> {
        let identity = caller.require(relay_as, Role::Driver)?;
        let driver_id = driver_of(identity);
        let amount = validate_amount("amount", payload.amount)?;

        let profile = self.store.driver(driver_id)?;
        let driver_name = profile
            .as_ref()
            .map_or_else(|| identity.name.clone(), |p| p.name.clone());
        let driver_mobile = profile
            .as_ref()
            .map(|p| p.mobile.clone())
            .or_else(|| identity.mobile.clone());
        let rating = payload.rating.or_else(|| profile.as_ref().map(|p| p.ratings));

        let outcome = self.store.submit_bid(
            payload.req_id,
            driver_id,
            &BidDetails {
                driver_name: Some(driver_name.clone()),
                driver_mobile: driver_mobile.clone(),
                amount,
                rating,
                vehicle: payload.vehicle.clone(),
                eta: payload.eta.clone(),
                specialty: payload.specialty.clone(),
            },
        )?;

        let notification_id = record_best_effort(
            self.notifications.as_ref(),
            &notifications::bid_received(
                &outcome.request,
                driver_id,
                &driver_name,
                driver_mobile.as_deref(),
                amount,
            ),
        );
        let response = &outcome.response;
        let _ = self.registry.send_to(
            Participant::rider(outcome.request.rider_id),
            &Envelope::new(
                relay_as,
                json!({
                    "req_id": response.req_id,
                    "response_id": response.response_id,
                    "driver_id": driver_id,
                    "driver_name": driver_name,
                    "driver_mobile": driver_mobile,
                    "amount": amount,
                    "rating": response.rating,
                    "vehicle": response.vehicle,
                    "eta": response.eta,
                    "specialty": response.specialty,
                    "status": response.status,
                    "revised": outcome.revised,
                    "notification_id": notification_id,
                    "timestamp": now_rfc3339(),
                }),
            ),
        );
        info!(
            req_id = %payload.req_id,
            driver_id = %driver_id,
            amount,
            revised = outcome.revised,
            "bid submitted"
        );
        Ok(outcome)
    }

    /// The rider proposes a different amount to a bidding driver.
    pub fn rider_counter_offer(&self, caller: &Caller, payload: &RiderCounterOffer) -> Result<()> {
        let identity = caller.require(et::RIDER_COUNTER_OFFER, Role::Rider)?;
        let amount = validate_amount("amount", payload.amount)?;
        let request = self.owned_request(identity, payload.req_id, et::RIDER_COUNTER_OFFER)?;
        let bid = self.store.pending_bid(payload.req_id, payload.driver_id)?;

        let notification_id = record_best_effort(
            self.notifications.as_ref(),
            &notifications::rider_counter_offer(
                &request,
                payload.driver_id,
                &identity.name,
                amount,
                bid.amount,
            ),
        );
        let _ = self.registry.send_to(
            Participant::driver(payload.driver_id),
            &Envelope::new(
                et::RIDER_COUNTER_OFFER,
                json!({
                    "req_id": request.req_id,
                    "rider_id": request.rider_id,
                    "rider_name": identity.name,
                    "driver_id": payload.driver_id,
                    "amount": amount,
                    "original_amount": bid.amount,
                    "message": payload.message,
                    "pickup_location": request.pickup_location,
                    "destination": request.destination,
                    "notification_id": notification_id,
                    "timestamp": now_rfc3339(),
                }),
            ),
        );
        Ok(())
    }

    /// A bidding driver proposes a different amount to the rider.
    pub fn driver_counter_offer(
        &self,
        caller: &Caller,
        payload: &DriverCounterOffer,
    ) -> Result<()> {
        let identity = caller.require(et::DRIVER_COUNTER_OFFER, Role::Driver)?;
        let driver_id = driver_of(identity);
        let amount = validate_amount("amount", payload.amount)?;
        let bid = self.store.pending_bid(payload.req_id, driver_id)?;
        let request = self.request(payload.req_id)?;
        let driver_name = bid.driver_name.clone().unwrap_or_else(|| identity.name.clone());

        let notification_id = record_best_effort(
            self.notifications.as_ref(),
            &notifications::driver_counter_offer(
                &request,
                driver_id,
                &driver_name,
                amount,
                bid.amount,
            ),
        );
        let _ = self.registry.send_to(
            Participant::rider(request.rider_id),
            &Envelope::new(
                et::DRIVER_COUNTER_OFFER,
                json!({
                    "req_id": request.req_id,
                    "driver_id": driver_id,
                    "driver_name": driver_name,
                    "amount": amount,
                    "original_amount": bid.amount,
                    "message": payload.message,
                    "notification_id": notification_id,
                    "timestamp": now_rfc3339(),
                }),
            ),
        );
        Ok(())
    }

    /// The rider accepts a driver's bid; the driver becomes engaged.
    pub fn accept_bid(&self, caller: &Caller, payload: &BidAcceptance) -> Result<DriverResponseRow> {
        let identity = caller.require(et::RIDER_ACCEPTED_BID, Role::Rider)?;
        let amount = payload
            .amount
            .map(|a| validate_amount("amount", a))
            .transpose()?;
        let _ = self.owned_request(identity, payload.req_id, et::RIDER_ACCEPTED_BID)?;
        let (request, response) =
            self.store
                .accept_bid(payload.req_id, payload.driver_id, amount)?;
        let agreed = response.amount.unwrap_or(request.fare);

        let notification_id = record_best_effort(
            self.notifications.as_ref(),
            &notifications::rider_accepted_bid(
                &request,
                payload.driver_id,
                &identity.name,
                agreed,
            ),
        );
        let _ = self.registry.send_to(
            Participant::driver(payload.driver_id),
            &Envelope::new(
                et::RIDER_ACCEPTED_BID,
                json!({
                    "req_id": request.req_id,
                    "rider_id": request.rider_id,
                    "rider_name": identity.name,
                    "driver_id": payload.driver_id,
                    "amount": agreed,
                    "pickup_location": request.pickup_location,
                    "destination": request.destination,
                    "status": response.status,
                    "notification_id": notification_id,
                    "timestamp": now_rfc3339(),
                }),
            ),
        );
        info!(req_id = %request.req_id, driver_id = %payload.driver_id, amount = agreed, "bid accepted by rider");
        Ok(response)
    }

    /// Start the trip for a request.
    ///
    /// A driver confirms their own accepted bid. The owning rider may confirm
    /// on a driver's behalf (`driver_id` required), which also promotes a
    /// still-pending bid. Losing bidders are told their bid was rejected.
    pub fn confirm_trip(
        &self,
        caller: &Caller,
        driver_id: Option<DriverId>,
        payload: &TripConfirmation,
    ) -> Result<Confirmation> {
        let identity = caller.authenticated(et::TRIP_CONFIRMED)?;
        let (driver_id, promote_pending) = match identity.role() {
            Role::Driver => {
                let me = driver_of(identity);
                if driver_id.is_some_and(|d| d != me) {
                    return Err(DispatchError::not_a_party(et::TRIP_CONFIRMED));
                }
                (me, false)
            }
            Role::Rider => {
                let _ = self.owned_request(identity, payload.req_id, et::TRIP_CONFIRMED)?;
                let driver_id = driver_id.ok_or_else(|| {
                    DispatchError::Validation("driver_id is required".into())
                })?;
                (driver_id, true)
            }
        };
        let fare = payload
            .fare
            .map(|f| validate_amount("fare", f))
            .transpose()?;

        let confirmation = self.store.confirm_trip(&ConfirmTrip {
            req_id: payload.req_id,
            driver_id,
            fare,
            positions: TripStartPositions {
                rider_latitude: payload.rider_latitude,
                rider_longitude: payload.rider_longitude,
                driver_latitude: payload.driver_latitude,
                driver_longitude: payload.driver_longitude,
            },
            promote_pending,
        })?;

        let trip = &confirmation.trip;
        let response = &confirmation.response;
        let envelope = Envelope::new(
            et::TRIP_CONFIRMED,
            json!({
                "trip_id": trip.trip_id,
                "req_id": trip.req_id,
                "rider_id": trip.rider_id,
                "driver_id": trip.driver_id,
                "driver_name": response.driver_name,
                "driver_mobile": response.driver_mobile,
                "vehicle": response.vehicle,
                "pickup_location": trip.pickup_location,
                "destination": trip.destination,
                "fare": trip.fare,
                "status": trip.status,
                "start_time": trip.start_time,
                "confirmed_by": identity.role(),
            }),
        );
        let _ = self.registry.send_to(Participant::rider(trip.rider_id), &envelope);
        let _ = self.registry.send_to(Participant::driver(trip.driver_id), &envelope);
        self.notify_rejected(
            trip.req_id,
            &confirmation.rejected_drivers,
            REJECTED_FOR_CONFIRMATION,
        );

        info!(
            trip_id = %trip.trip_id,
            req_id = %trip.req_id,
            driver_id = %trip.driver_id,
            fare = trip.fare,
            rejected = confirmation.rejected_drivers.len(),
            "trip confirmed"
        );
        Ok(confirmation)
    }

    /// A driver walks away from a request they bid on or won.
    pub fn cancel_by_driver(
        &self,
        caller: &Caller,
        payload: &DriverCancellation,
    ) -> Result<Option<OngoingTripRow>> {
        let identity = caller.require(et::TRIP_CANCELLED_BY_DRIVER, Role::Driver)?;
        let driver_id = driver_of(identity);
        let (request, cancelled) = self.store.cancel_by_driver(payload.req_id, driver_id)?;

        let _ = self.registry.send_to(
            Participant::rider(request.rider_id),
            &Envelope::new(
                et::TRIP_CANCELLED_BY_DRIVER,
                json!({
                    "req_id": request.req_id,
                    "driver_id": driver_id,
                    "driver_name": identity.name,
                    "reason": payload.reason,
                    "trip_id": cancelled.as_ref().map(|t| t.trip_id),
                    "trip_status": cancelled.as_ref().map(|t| t.status),
                    "timestamp": now_rfc3339(),
                }),
            ),
        );
        info!(req_id = %request.req_id, driver_id = %driver_id, trip_cancelled = cancelled.is_some(), "driver cancelled");
        Ok(cancelled)
    }

    /// Relay a bid accepted/rejected notice to both parties.
    pub fn bid_decision(
        &self,
        caller: &Caller,
        decision: Decision,
        payload: &BidDecision,
    ) -> Result<()> {
        let action = decision.event_type();
        let identity = caller.authenticated(action)?;
        let request = self.request(payload.req_id)?;
        let driver_id = match identity.role() {
            Role::Driver => {
                let me = driver_of(identity);
                if self.store.responses(request.req_id, Some(me), None)?.is_empty() {
                    return Err(DispatchError::not_a_party(action));
                }
                me
            }
            Role::Rider => {
                if identity.participant.as_rider() != Some(request.rider_id) {
                    return Err(DispatchError::not_a_party(action));
                }
                payload
                    .driver_id
                    .ok_or_else(|| DispatchError::Validation("driver_id is required".into()))?
            }
        };

        let envelope = Envelope::new(
            action,
            json!({
                "req_id": request.req_id,
                "rider_id": request.rider_id,
                "driver_id": driver_id,
                "amount": payload.amount,
                "message": payload.message,
                "from_role": identity.role(),
                "timestamp": now_rfc3339(),
            }),
        );
        let _ = self.registry.send_to(Participant::rider(request.rider_id), &envelope);
        let _ = self.registry.send_to(Participant::driver(driver_id), &envelope);
        Ok(())
    }

    /// A party reports their live position; the other party receives it.
    pub fn trip_location_update(
        &self,
        caller: &Caller,
        position: &TripPosition,
    ) -> Result<OngoingTripRow> {
        let identity = caller.authenticated(et::TRIP_LOCATION_UPDATE)?;
        let point = GeoPoint::new(position.latitude, position.longitude)?;
        let trip = self.trip(position.trip_id)?;
        let counterpart = counterpart(identity, &trip)
            .ok_or_else(|| DispatchError::not_a_party(et::TRIP_LOCATION_UPDATE))?;

        let trip = self.store.update_trip_position(
            trip.trip_id,
            identity.role(),
            point.latitude,
            point.longitude,
        )?;
        let _ = self.registry.send_to(
            counterpart,
            &Envelope::new(
                et::TRIP_LOCATION_UPDATE,
                json!({
                    "trip_id": trip.trip_id,
                    "req_id": trip.req_id,
                    "role": identity.role(),
                    "user_id": identity.participant.id,
                    "latitude": point.latitude,
                    "longitude": point.longitude,
                    "timestamp": now_rfc3339(),
                }),
            ),
        );
        Ok(trip)
    }

    /// Either party completes the trip; both are told.
    pub fn end_trip(&self, caller: &Caller, trip_id: TripId) -> Result<OngoingTripRow> {
        let identity = caller.authenticated(et::TRIP_ENDED)?;
        let trip = self.trip(trip_id)?;
        if counterpart(identity, &trip).is_none() {
            return Err(DispatchError::not_a_party(et::TRIP_ENDED));
        }
        let trip = self.store.end_trip(trip_id)?;

        let envelope = Envelope::new(
            et::TRIP_ENDED,
            json!({
                "trip_id": trip.trip_id,
                "req_id": trip.req_id,
                "rider_id": trip.rider_id,
                "driver_id": trip.driver_id,
                "fare": trip.fare,
                "status": trip.status,
                "start_time": trip.start_time,
                "end_time": trip.end_time,
                "ended_by": identity.role(),
            }),
        );
        let _ = self.registry.send_to(Participant::rider(trip.rider_id), &envelope);
        let _ = self.registry.send_to(Participant::driver(trip.driver_id), &envelope);
        info!(trip_id = %trip.trip_id, ended_by = %identity.role(), "trip ended");
        Ok(trip)
    }

    /// The owning rider withdraws a pending request.
    pub fn cancel_trip_request(&self, caller: &Caller, req_id: RequestId) -> Result<CancelledRequest> {
        const ACTION: &str = "cancel trip request";
        let identity = caller.require(ACTION, Role::Rider)?;
        let _ = self.owned_request(identity, req_id, ACTION)?;
        let cancelled = self.store.cancel_trip_request(req_id)?;

        let _ = self.registry.broadcast_by_role(
            Role::Driver,
            &Envelope::new(
                et::TRIP_REQUEST_CANCELLED,
                json!({
                    "req_id": cancelled.request.req_id,
                    "rider_id": cancelled.request.rider_id,
                    "status": cancelled.request.status,
                    "timestamp": now_rfc3339(),
                }),
            ),
        );
        self.notify_rejected(req_id, &cancelled.rejected_drivers, REJECTED_FOR_CANCELLATION);
        info!(
            req_id = %req_id,
            rejected = cancelled.rejected_drivers.len(),
            released = cancelled.released_drivers.len(),
            "trip request cancelled"
        );
        Ok(cancelled)
    }

    fn notify_rejected(&self, req_id: RequestId, drivers: &[DriverId], reason: &str) {
        for driver_id in drivers {
            let _ = self.registry.send_to(
                Participant::driver(*driver_id),
                &Envelope::new(
                    et::BID_REJECTED,
                    json!({
                        "req_id": req_id,
                        "driver_id": driver_id,
                        "status": ResponseStatus::Rejected,
                        "reason": reason,
                        "timestamp": now_rfc3339(),
                    }),
                ),
            );
        }
    }
}

fn driver_of(identity: &Identity) -> DriverId {
    DriverId::new(identity.participant.id)
}

fn rider_of(identity: &Identity) -> RiderId {
    RiderId::new(identity.participant.id)
}

/// The other party of `trip`, if `identity` is one of its parties.
fn counterpart(identity: &Identity, trip: &OngoingTripRow) -> Option<Participant> {
    let me = identity.participant;
    if me == Participant::rider(trip.rider_id) {
        Some(Participant::driver(trip.driver_id))
    } else if me == Participant::driver(trip.driver_id) {
        Some(Participant::rider(trip.rider_id))
    } else {
        None
    }
}
