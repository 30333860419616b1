use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use service_core::error::AppError;
use tracing::{debug, info};
use uuid::Uuid;

use crate::{
    dtos::{
        auth::{CredentialsRequest, ForgotPasswordRequest, LoginRequest, RefreshRequest, TokenResponse},
        MessageResponse,
    },
    middleware::AuthMember,
    models::{permission, NewNotification, NotificationType},
    services::{MemberStore, NotificationStore},
    utils::{Password, ValidatedJson},
    AppState,
};

/// Login with username and password
#[utoipa::path(
    post,
    path = "/api/v1/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Login successful", body = TokenResponse),
        (status = 401, description = "Invalid credentials", body = ErrorResponse),
        (status = 422, description = "Validation error", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    tag = "Authentication"
)]
pub async fn login(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<LoginRequest>,
) -> Result<impl IntoResponse, AppError> {
    let pair = state
        .auth
        .login(&req.username, &Password::new(req.password))
        .await?;
    Ok((StatusCode::OK, Json(TokenResponse::from(pair))))
}

/// Exchange a refresh token for a new token pair
#[utoipa::path(
    post,
    path = "/api/v1/refresh",
    request_body = RefreshRequest,
    responses(
        (status = 201, description = "New token pair issued", body = TokenResponse),
        (status = 401, description = "Invalid or consumed refresh token", body = ErrorResponse),
        (status = 403, description = "Refresh token expired", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    tag = "Authentication"
)]
pub async fn refresh(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<RefreshRequest>,
) -> Result<impl IntoResponse, AppError> {
    let pair = state.auth.refresh(&req.refresh_token).await?;
    Ok((StatusCode::CREATED, Json(TokenResponse::from(pair))))
}

/// Revoke the caller's access and refresh tokens
#[utoipa::path(
    post,
    path = "/api/v1/logout",
    responses(
        (status = 202, description = "Logged out", body = MessageResponse),
        (status = 401, description = "Invalid or already revoked session", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    tag = "Authentication",
    security(("bearer_auth" = []))
)]
pub async fn logout(
    State(state): State<AppState>,
    AuthMember(details): AuthMember,
) -> Result<impl IntoResponse, AppError> {
    state.auth.logout(&details).await?;
    Ok((StatusCode::ACCEPTED, Json(MessageResponse::new("Logged out"))))
}

/// Request a password reset email
///
/// Always answers 202 so callers cannot tell whether the email is known.
#[utoipa::path(
    post,
    path = "/api/v1/forgot_password",
    request_body = ForgotPasswordRequest,
    responses(
        (status = 202, description = "Request accepted", body = MessageResponse),
        (status = 422, description = "Validation error", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    tag = "Authentication"
)]
pub async fn forgot_password(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<ForgotPasswordRequest>,
) -> Result<impl IntoResponse, AppError> {
    match state.store.find_member_by_email(&req.email).await? {
        Some(member) if member.is_active() => {
            let notification = NewNotification::due_now(
                NotificationType::ForgotPassword,
                None,
                member.member_uuid,
            );
            let created = state.store.create_notification(&notification).await?;
            info!(
                notification_id = created.notification_id,
                member_uuid = %member.member_uuid,
                "Forgot password notification enqueued"
            );
        }
        _ => debug!("Forgot password request for an unknown or inactive email"),
    }

    Ok((
        StatusCode::ACCEPTED,
        Json(MessageResponse::new(
            "If the email belongs to a member, a reset link is on its way",
        )),
    ))
}

/// Set credentials with a single-use reset token
#[utoipa::path(
    post,
    path = "/api/v1/reset_credentials",
    request_body = CredentialsRequest,
    responses(
        (status = 200, description = "Credentials updated", body = MessageResponse),
        (status = 400, description = "No username stored or provided", body = ErrorResponse),
        (status = 401, description = "Invalid token", body = ErrorResponse),
        (status = 403, description = "Token expired", body = ErrorResponse),
        (status = 409, description = "Username taken", body = ErrorResponse)
    ),
    tag = "Authentication",
    security(("bearer_auth" = []))
)]
pub async fn reset_credentials(
    State(state): State<AppState>,
    AuthMember(details): AuthMember,
    ValidatedJson(req): ValidatedJson<CredentialsRequest>,
) -> Result<impl IntoResponse, AppError> {
    set_credentials(&state, details.member_uuid, req).await?;

    if details.permissions.contains(permission::RESET_CREDENTIALS) {
        state.tokens.revoke(&details.access_uuid).await?;
    }

    Ok((StatusCode::OK, Json(MessageResponse::new("Credentials updated"))))
}

/// Change the logged-in member's credentials
#[utoipa::path(
    post,
    path = "/api/v1/change_password",
    request_body = CredentialsRequest,
    responses(
        (status = 200, description = "Credentials updated", body = MessageResponse),
        (status = 401, description = "Invalid token", body = ErrorResponse),
        (status = 409, description = "Username taken", body = ErrorResponse)
    ),
    tag = "Authentication",
    security(("bearer_auth" = []))
)]
pub async fn change_password(
    State(state): State<AppState>,
    AuthMember(details): AuthMember,
    ValidatedJson(req): ValidatedJson<CredentialsRequest>,
) -> Result<impl IntoResponse, AppError> {
    set_credentials(&state, details.member_uuid, req).await?;
    Ok((StatusCode::OK, Json(MessageResponse::new("Credentials updated"))))
}

async fn set_credentials(
    state: &AppState,
    member_uuid: Uuid,
    req: CredentialsRequest,
) -> Result<(), AppError> {
    let username = match req.username {
        Some(username) => username,
        None => state
            .store
            .find_credentials(member_uuid)
            .await?
            .map(|c| c.username)
            .ok_or_else(|| AppError::BadRequest(anyhow::anyhow!("Username is required")))?,
    };

    state
        .auth
        .set_credentials(member_uuid, &username, &Password::new(req.password))
        .await
}
