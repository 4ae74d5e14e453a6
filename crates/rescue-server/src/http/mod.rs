//! Bearer-authenticated JSON query surface.

pub mod error;
pub mod extract;

mod accounts;
mod notifications;
mod trips;

use axum::Router;
use axum::routing::{get, post, put};

use crate::server::AppState;

/// Routes for accounts, trips, and notifications.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/nearby", get(accounts::nearby))
        .route("/driver-location/{driver_id}", get(accounts::driver_location))
        .route("/drivers/count", get(accounts::driver_count))
        .route("/drivers/available", get(accounts::available_drivers))
        .route("/drivers/availability", put(accounts::set_availability))
        .route(
            "/profile/driver/{id}",
            get(accounts::driver_profile).put(accounts::update_driver_profile),
        )
        .route(
            "/profile/rider/{id}",
            get(accounts::rider_profile).put(accounts::update_rider_profile),
        )
        .route(
            "/trip-requests",
            post(trips::create_request).get(trips::list_requests),
        )
        .route("/trip-requests/{id}/decline", post(trips::decline_request))
        .route("/trip-requests/{id}/cancel", post(trips::cancel_request))
        .route(
            "/driver-responses",
            post(trips::submit_bid).get(trips::list_responses),
        )
        .route(
            "/ongoing-trips",
            post(trips::start_trip).get(trips::list_trips),
        )
        .route("/ongoing-trips/{id}/end", put(trips::end_trip))
        .route("/notifications", get(notifications::list))
        .route("/notifications/count", get(notifications::count))
        .route("/notifications/{id}/status", put(notifications::set_status))
}
