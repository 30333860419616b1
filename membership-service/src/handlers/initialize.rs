use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use service_core::error::AppError;
use tracing::{debug, info};

use crate::{
    dtos::members::InitializeRequest,
    handlers::members::DEFAULT_LANGUAGE,
    models::{Member, MemberResponse, MemberType, NewNotification, NotificationType},
    services::MemberStore,
    utils::ValidatedJson,
    AppState,
};

/// Create the first administrator
///
/// Only allowed while no member exists. The new admin receives a
/// registration email to set their credentials.
#[utoipa::path(
    post,
    path = "/api/v1/initialize",
    request_body = InitializeRequest,
    responses(
        (status = 201, description = "First admin created", body = MemberResponse),
        (status = 401, description = "Already initialized", body = ErrorResponse),
        (status = 422, description = "Validation error", body = ErrorResponse)
    ),
    tag = "Members"
)]
pub async fn initialize(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<InitializeRequest>,
) -> Result<impl IntoResponse, AppError> {
    let member = Member::new(
        req.first_name,
        req.last_name,
        req.email,
        MemberType::Admin,
        req.language.unwrap_or_else(|| DEFAULT_LANGUAGE.to_string()),
    );
    // The first admin authors their own registration.
    let registration = NewNotification::due_now(
        NotificationType::MemberRegistration,
        Some(member.member_uuid),
        member.member_uuid,
    );

    let Some(created) = state
        .store
        .create_first_member_with_registration(&member, &registration)
        .await?
    else {
        debug!("Initialization refused: members already exist");
        return Err(AppError::Unauthorized(anyhow::anyhow!(
            "The app is already initialized"
        )));
    };

    info!(
        member_uuid = %member.member_uuid,
        notification_id = created.notification_id,
        "App initialized"
    );
    Ok((StatusCode::CREATED, Json(MemberResponse::from(member))))
}

/// Whether the app has been initialized
#[utoipa::path(
    get,
    path = "/api/v1/initialize",
    responses(
        (status = 200, description = "At least one member exists"),
        (status = 204, description = "No member yet; initialization is open")
    ),
    tag = "Members"
)]
pub async fn is_initialized(State(state): State<AppState>) -> Result<StatusCode, AppError> {
    if state.store.has_members().await? {
        Ok(StatusCode::OK)
    } else {
        info!("The app has no member");
        Ok(StatusCode::NO_CONTENT)
    }
}
