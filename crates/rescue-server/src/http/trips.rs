//! Trip request, bid, and trip routes. Mutations go through the
//! negotiation router so connected clients see the same deliveries as for
//! the equivalent WebSocket events.

use axum::Json;
use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use rescue_core::status::{ResponseStatus, TripRequestStatus, TripStatus};
use rescue_core::{DispatchError, DriverId, RequestId, RiderId, Role, TripId};
use rescue_store::{DriverResponseRow, OngoingTripRow, TripRequestRow};
use serde::Deserialize;
use serde_json::{Value, json};

use super::error::ApiResult;
use super::extract::AuthUser;
use crate::protocol::{BidPayload, TripConfirmation, TripRequestPayload, event_types as et};
use crate::server::AppState;

#[derive(Debug, Default, Deserialize)]
pub(super) struct RequestFilter {
    status: Option<TripRequestStatus>,
}

#[derive(Debug, Deserialize)]
pub(super) struct ResponseFilter {
    req_id: RequestId,
    status: Option<ResponseStatus>,
}

#[derive(Debug, Default, Deserialize)]
pub(super) struct TripFilter {
    status: Option<TripStatus>,
}

#[derive(Debug, Deserialize)]
pub(super) struct StartTrip {
    req_id: RequestId,
    driver_id: DriverId,
    fare: Option<f64>,
}

/// POST /trip-requests
pub(super) async fn create_request(
    State(state): State<AppState>,
    user: AuthUser,
    body: Result<Json<TripRequestPayload>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<TripRequestRow>)> {
    let Json(payload) = body?;
    let request = state.router.create_trip_request(&user.caller(), payload)?;
    Ok((StatusCode::CREATED, Json(request)))
}

/// GET /trip-requests
///
/// Riders see their own requests; drivers see pending requests they have
/// not answered.
pub(super) async fn list_requests(
    State(state): State<AppState>,
    AuthUser(identity): AuthUser,
    filter: Result<Query<RequestFilter>, QueryRejection>,
) -> ApiResult<Json<Vec<TripRequestRow>>> {
    let Query(filter) = filter?;
    let id = identity.participant.id;
    let rows = match identity.role() {
        Role::Rider => state.store.rider_requests(RiderId::new(id), filter.status)?,
        Role::Driver => state.store.open_requests_for_driver(DriverId::new(id))?,
    };
    Ok(Json(rows))
}

/// POST /trip-requests/{id}/decline
pub(super) async fn decline_request(
    State(state): State<AppState>,
    user: AuthUser,
    req_id: Result<Path<RequestId>, PathRejection>,
) -> ApiResult<(StatusCode, Json<DriverResponseRow>)> {
    let Path(req_id) = req_id?;
    let response = state.router.decline(&user.caller(), req_id)?;
    Ok((StatusCode::CREATED, Json(response)))
}

/// POST /trip-requests/{id}/cancel
pub(super) async fn cancel_request(
    State(state): State<AppState>,
    user: AuthUser,
    req_id: Result<Path<RequestId>, PathRejection>,
) -> ApiResult<Json<Value>> {
    let Path(req_id) = req_id?;
    let cancelled = state.router.cancel_trip_request(&user.caller(), req_id)?;
    Ok(Json(json!({
        "request": cancelled.request,
        "rejected_drivers": cancelled.rejected_drivers,
        "released_drivers": cancelled.released_drivers,
    })))
}

/// POST /driver-responses
pub(super) async fn submit_bid(
    State(state): State<AppState>,
    user: AuthUser,
    body: Result<Json<BidPayload>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<DriverResponseRow>)> {
    let Json(payload) = body?;
    let outcome = state
        .router
        .submit_bid(&user.caller(), et::BID_FROM_DRIVER, &payload)?;
    let status = if outcome.revised {
        StatusCode::OK
    } else {
        StatusCode::CREATED
    };
    Ok((status, Json(outcome.response)))
}

/// GET /driver-responses
///
/// The owning rider sees every response; a driver sees only their own.
pub(super) async fn list_responses(
    State(state): State<AppState>,
    AuthUser(identity): AuthUser,
    filter: Result<Query<ResponseFilter>, QueryRejection>,
) -> ApiResult<Json<Vec<DriverResponseRow>>> {
    let Query(filter) = filter?;
    let request = state
        .store
        .trip_request(filter.req_id)?
        .ok_or_else(|| DispatchError::not_found("trip request", filter.req_id))?;
    let driver = match identity.role() {
        Role::Driver => identity.participant.as_driver(),
        Role::Rider if identity.participant.as_rider() == Some(request.rider_id) => None,
        Role::Rider => return Err(DispatchError::not_a_party("list driver responses").into()),
    };
    Ok(Json(state.store.responses(filter.req_id, driver, filter.status)?))
}

/// POST /ongoing-trips
pub(super) async fn start_trip(
    State(state): State<AppState>,
    user: AuthUser,
    body: Result<Json<StartTrip>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<OngoingTripRow>)> {
    let Json(body) = body?;
    let confirmation = state.router.confirm_trip(
        &user.caller(),
        Some(body.driver_id),
        &TripConfirmation {
            req_id: body.req_id,
            fare: body.fare,
            ..TripConfirmation::default()
        },
    )?;
    Ok((StatusCode::CREATED, Json(confirmation.trip)))
}

/// GET /ongoing-trips
pub(super) async fn list_trips(
    State(state): State<AppState>,
    AuthUser(identity): AuthUser,
    filter: Result<Query<TripFilter>, QueryRejection>,
) -> ApiResult<Json<Vec<OngoingTripRow>>> {
    let Query(filter) = filter?;
    Ok(Json(state.store.trips_for(identity.participant, filter.status)?))
}

/// PUT /ongoing-trips/{id}/end
pub(super) async fn end_trip(
    State(state): State<AppState>,
    user: AuthUser,
    trip_id: Result<Path<TripId>, PathRejection>,
) -> ApiResult<Json<OngoingTripRow>> {
    let Path(trip_id) = trip_id?;
    Ok(Json(state.router.end_trip(&user.caller(), trip_id)?))
}
