//! Driver presence and profile routes.

use axum::Json;
use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use rescue_core::{DispatchError, DriverId, Participant, RiderId, Role};
use rescue_store::{DriverRow, ProfileUpdate, RiderRow};
use serde::Deserialize;
use serde_json::{Value, json};

use super::error::ApiResult;
use super::extract::AuthUser;
use crate::negotiation::DriverLocationView;
use crate::server::AppState;

#[derive(Debug, Deserialize)]
pub(super) struct NearbyQuery {
    #[serde(alias = "lat")]
    latitude: f64,
    #[serde(alias = "lon")]
    longitude: f64,
    radius_km: Option<f64>,
}

#[derive(Debug, Deserialize)]
pub(super) struct Availability {
    is_available: bool,
}

/// GET /nearby
pub(super) async fn nearby(
    State(state): State<AppState>,
    _user: AuthUser,
    query: Result<Query<NearbyQuery>, QueryRejection>,
) -> ApiResult<Json<Value>> {
    let Query(q) = query?;
    let drivers = state.router.nearby_drivers(q.latitude, q.longitude, q.radius_km)?;
    Ok(Json(json!({
        "count": drivers.len(),
        "radius_km": q.radius_km.unwrap_or(state.config.default_radius_km),
        "drivers": drivers,
    })))
}

/// GET /driver-location/{driver_id}
pub(super) async fn driver_location(
    State(state): State<AppState>,
    _user: AuthUser,
    driver_id: Result<Path<DriverId>, PathRejection>,
) -> ApiResult<Json<DriverLocationView>> {
    let Path(driver_id) = driver_id?;
    Ok(Json(state.router.locate_driver(driver_id)?))
}

/// GET /drivers/count
pub(super) async fn driver_count(
    State(state): State<AppState>,
    _user: AuthUser,
) -> ApiResult<Json<Value>> {
    let (total, available) = state.store.driver_counts()?;
    Ok(Json(json!({ "total": total, "available": available })))
}

/// GET /drivers/available
pub(super) async fn available_drivers(
    State(state): State<AppState>,
    _user: AuthUser,
) -> ApiResult<Json<Vec<DriverRow>>> {
    Ok(Json(state.store.available_drivers()?))
}

/// PUT /drivers/availability
pub(super) async fn set_availability(
    State(state): State<AppState>,
    AuthUser(identity): AuthUser,
    body: Result<Json<Availability>, JsonRejection>,
) -> ApiResult<Json<DriverRow>> {
    let Json(body) = body?;
    let driver_id = identity
        .participant
        .as_driver()
        .ok_or_else(|| DispatchError::requires("set availability", Role::Driver))?;
    Ok(Json(state.store.set_driver_available(driver_id, body.is_available)?))
}

/// GET /profile/driver/{id}
pub(super) async fn driver_profile(
    State(state): State<AppState>,
    _user: AuthUser,
    id: Result<Path<DriverId>, PathRejection>,
) -> ApiResult<Json<DriverRow>> {
    let Path(id) = id?;
    let row = state
        .store
        .driver(id)?
        .ok_or_else(|| DispatchError::not_found("driver", id))?;
    Ok(Json(row))
}

/// PUT /profile/driver/{id}
pub(super) async fn update_driver_profile(
    State(state): State<AppState>,
    AuthUser(identity): AuthUser,
    id: Result<Path<DriverId>, PathRejection>,
    body: Result<Json<ProfileUpdate>, JsonRejection>,
) -> ApiResult<Json<DriverRow>> {
    let (Path(id), Json(update)) = (id?, body?);
    if identity.participant != Participant::driver(id) {
        return Err(DispatchError::not_a_party("update driver profile").into());
    }
    validate_update(&update)?;
    Ok(Json(state.store.update_driver_profile(id, &update)?))
}

/// GET /profile/rider/{id}
pub(super) async fn rider_profile(
    State(state): State<AppState>,
    _user: AuthUser,
    id: Result<Path<RiderId>, PathRejection>,
) -> ApiResult<Json<RiderRow>> {
    let Path(id) = id?;
    let row = state
        .store
        .rider(id)?
        .ok_or_else(|| DispatchError::not_found("rider", id))?;
    Ok(Json(row))
}

/// PUT /profile/rider/{id}
pub(super) async fn update_rider_profile(
    State(state): State<AppState>,
    AuthUser(identity): AuthUser,
    id: Result<Path<RiderId>, PathRejection>,
    body: Result<Json<ProfileUpdate>, JsonRejection>,
) -> ApiResult<Json<RiderRow>> {
    let (Path(id), Json(update)) = (id?, body?);
    if identity.participant != Participant::rider(id) {
        return Err(DispatchError::not_a_party("update rider profile").into());
    }
    validate_update(&update)?;
    Ok(Json(state.store.update_rider_profile(id, &update)?))
}

fn validate_update(update: &ProfileUpdate) -> Result<(), DispatchError> {
    let fields = [
        ("name", &update.name),
        ("mobile", &update.mobile),
        ("email", &update.email),
    ];
    for (field, value) in fields {
        if value.as_deref().is_some_and(|v| v.trim().is_empty()) {
            return Err(DispatchError::Validation(format!("{field} must not be empty")));
        }
    }
    Ok(())
}
