use axum::{
    extract::{FromRequestParts, Request, State},
    http::request::Parts,
    middleware::Next,
    response::Response,
};
use service_core::error::AppError;
use tracing::{debug, error};

use crate::models::PermissionSet;
use crate::services::{AccessTokenDetails, AuthError};
use crate::AppState;

/// State handed to `permission_gate`: the shared app state plus the
/// permissions a route accepts.
#[derive(Clone)]
pub struct GateState {
    pub state: AppState,
    pub required: PermissionSet,
}

impl GateState {
    pub fn new(state: &AppState, required: &[&str]) -> Self {
        Self {
            state: state.clone(),
            required: required.iter().copied().collect(),
        }
    }
}

fn rejection(err: AuthError) -> AppError {
    if err.is_internal() {
        error!(error = %err, "Permission check failed");
    } else {
        debug!(reason = %err, "Request rejected by permission gate");
    }
    err.into()
}

/// Let the request through when its access token carries at least one of
/// the required permissions. The request reaches the handler unmodified.
pub async fn permission_gate(
    State(gate): State<GateState>,
    req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let details = gate
        .state
        .tokens
        .extract_access_claims(req.headers())
        .await
        .map_err(rejection)?;

    if !details.permissions.intersects(&gate.required) {
        return Err(rejection(AuthError::PermissionDenied));
    }

    Ok(next.run(req).await)
}

/// Extractor for handlers that need the caller's identity.
pub struct AuthMember(pub AccessTokenDetails);

#[axum::async_trait]
impl FromRequestParts<AppState> for AuthMember {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let details = state
            .tokens
            .extract_access_claims(&parts.headers)
            .await
            .map_err(rejection)?;
        Ok(AuthMember(details))
    }
}
