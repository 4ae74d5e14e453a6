//! Notification inbox routes.

use axum::Json;
use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use rescue_core::NotificationId;
use rescue_core::status::NotificationStatus;
use rescue_store::NotificationRow;
use serde::Deserialize;
use serde_json::{Value, json};

use super::error::ApiResult;
use super::extract::AuthUser;
use crate::server::AppState;

#[derive(Debug, Default, Deserialize)]
pub(super) struct StatusFilter {
    status: Option<NotificationStatus>,
}

#[derive(Debug, Deserialize)]
pub(super) struct StatusChange {
    status: NotificationStatus,
}

/// GET /notifications
pub(super) async fn list(
    State(state): State<AppState>,
    AuthUser(identity): AuthUser,
    filter: Result<Query<StatusFilter>, QueryRejection>,
) -> ApiResult<Json<Vec<NotificationRow>>> {
    let Query(filter) = filter?;
    Ok(Json(state.store.notifications(identity.participant, filter.status)?))
}

/// GET /notifications/count (unread unless `status` says otherwise)
pub(super) async fn count(
    State(state): State<AppState>,
    AuthUser(identity): AuthUser,
    filter: Result<Query<StatusFilter>, QueryRejection>,
) -> ApiResult<Json<Value>> {
    let Query(filter) = filter?;
    let status = filter.status.unwrap_or(NotificationStatus::Unread);
    let count = state.store.count_notifications(identity.participant, status)?;
    Ok(Json(json!({ "count": count, "status": status })))
}

/// PUT /notifications/{id}/status
pub(super) async fn set_status(
    State(state): State<AppState>,
    AuthUser(identity): AuthUser,
    id: Result<Path<NotificationId>, PathRejection>,
    body: Result<Json<StatusChange>, JsonRejection>,
) -> ApiResult<Json<NotificationRow>> {
    let (Path(id), Json(body)) = (id?, body?);
    Ok(Json(state.store.set_notification_status(
        id,
        identity.participant,
        body.status,
    )?))
}
