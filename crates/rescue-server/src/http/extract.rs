//! Request extractors.

use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use axum::http::HeaderMap;
use rescue_core::{DispatchError, Identity};
use tracing::debug;

use super::error::ApiError;
use crate::negotiation::Caller;
use crate::server::AppState;

/// Message sent when a presented credential does not validate.
pub const INVALID_TOKEN_MESSAGE: &str = "Invalid authentication token";

/// The bearer token in an `Authorization` header, if any.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}

/// The authenticated caller of an HTTP route.
#[derive(Clone, Debug)]
pub struct AuthUser(pub Identity);

impl AuthUser {
    /// The caller as seen by the negotiation router.
    pub fn caller(&self) -> Caller {
        Caller::http(self.0.clone())
    }
}

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = bearer_token(&parts.headers).ok_or_else(|| {
            ApiError(DispatchError::Unauthenticated("missing bearer token".into()))
        })?;
        state.authenticator.authenticate(token).map(AuthUser).map_err(|e| {
            debug!(error = %e, "rejected credential");
            ApiError(DispatchError::Unauthenticated(INVALID_TOKEN_MESSAGE.into()))
        })
    }
}
