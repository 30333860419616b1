use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use service_core::error::AppError;
use tracing::info;
use uuid::Uuid;

use crate::{
    dtos::{
        members::{CreateMemberRequest, MemberTypeRequest, UpdateMemberRequest},
        MessageResponse,
    },
    middleware::AuthMember,
    models::{
        permission, Member, MemberResponse, MemberType, NewNotification, NotificationType,
    },
    services::{AccessTokenDetails, AuthError, MemberStore, NotificationStore},
    utils::ValidatedJson,
    AppState,
};

pub(crate) const DEFAULT_LANGUAGE: &str = "cat";

impl From<MemberTypeRequest> for MemberType {
    fn from(value: MemberTypeRequest) -> Self {
        match value {
            MemberTypeRequest::Member => MemberType::Member,
            MemberTypeRequest::Admin => MemberType::Admin,
        }
    }
}

fn can_access(details: &AccessTokenDetails, member_uuid: Uuid) -> bool {
    details.member_uuid == member_uuid || details.permissions.contains(permission::ADMIN)
}

/// List all members
#[utoipa::path(
    get,
    path = "/api/v1/members",
    responses(
        (status = 200, description = "Members", body = Vec<MemberResponse>),
        (status = 401, description = "Not an admin", body = ErrorResponse)
    ),
    tag = "Members",
    security(("bearer_auth" = []))
)]
pub async fn list_members(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    let members: Vec<MemberResponse> = state
        .store
        .list_members()
        .await?
        .into_iter()
        .map(MemberResponse::from)
        .collect();
    Ok(Json(members))
}

/// Create a member and send them a registration email
#[utoipa::path(
    post,
    path = "/api/v1/members",
    request_body = CreateMemberRequest,
    responses(
        (status = 201, description = "Member created", body = MemberResponse),
        (status = 401, description = "Not an admin", body = ErrorResponse),
        (status = 409, description = "Email already used", body = ErrorResponse),
        (status = 422, description = "Validation error", body = ErrorResponse)
    ),
    tag = "Members",
    security(("bearer_auth" = []))
)]
pub async fn create_member(
    State(state): State<AppState>,
    AuthMember(author): AuthMember,
    ValidatedJson(req): ValidatedJson<CreateMemberRequest>,
) -> Result<impl IntoResponse, AppError> {
    if state.store.find_member_by_email(&req.email).await?.is_some() {
        return Err(AppError::Conflict(anyhow::anyhow!("Email already used")));
    }

    let member = Member::new(
        req.first_name,
        req.last_name,
        req.email,
        req.member_type.into(),
        req.language.unwrap_or_else(|| DEFAULT_LANGUAGE.to_string()),
    );
    let registration = NewNotification::due_now(
        NotificationType::MemberRegistration,
        Some(author.member_uuid),
        member.member_uuid,
    );
    let created = state
        .store
        .create_member_with_registration(&member, &registration)
        .await?;

    info!(
        member_uuid = %member.member_uuid,
        author_uuid = %author.member_uuid,
        notification_id = created.notification_id,
        "Member created"
    );
    Ok((StatusCode::CREATED, Json(MemberResponse::from(member))))
}

/// Get a member
///
/// Members can read their own record; admins can read anyone's.
#[utoipa::path(
    get,
    path = "/api/v1/members/{member_uuid}",
    params(("member_uuid" = Uuid, Path, description = "Member id")),
    responses(
        (status = 200, description = "Member", body = MemberResponse),
        (status = 401, description = "Not allowed", body = ErrorResponse),
        (status = 404, description = "Member not found", body = ErrorResponse)
    ),
    tag = "Members",
    security(("bearer_auth" = []))
)]
pub async fn get_member(
    State(state): State<AppState>,
    AuthMember(details): AuthMember,
    Path(member_uuid): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    if !can_access(&details, member_uuid) {
        return Err(AuthError::PermissionDenied.into());
    }

    let member = state
        .store
        .find_member(member_uuid)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Member not found")))?;
    Ok(Json(MemberResponse::from(member)))
}

/// Update a member
///
/// Only admins may change a member's type.
#[utoipa::path(
    put,
    path = "/api/v1/members/{member_uuid}",
    params(("member_uuid" = Uuid, Path, description = "Member id")),
    request_body = UpdateMemberRequest,
    responses(
        (status = 200, description = "Member updated", body = MemberResponse),
        (status = 401, description = "Not allowed", body = ErrorResponse),
        (status = 404, description = "Member not found", body = ErrorResponse),
        (status = 409, description = "Email already used", body = ErrorResponse)
    ),
    tag = "Members",
    security(("bearer_auth" = []))
)]
pub async fn update_member(
    State(state): State<AppState>,
    AuthMember(details): AuthMember,
    Path(member_uuid): Path<Uuid>,
    ValidatedJson(req): ValidatedJson<UpdateMemberRequest>,
) -> Result<impl IntoResponse, AppError> {
    if !can_access(&details, member_uuid) {
        return Err(AuthError::PermissionDenied.into());
    }
    if req.member_type.is_some() && !details.permissions.contains(permission::ADMIN) {
        return Err(AuthError::PermissionDenied.into());
    }

    let mut member = state
        .store
        .find_member(member_uuid)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Member not found")))?;

    if let Some(email) = req.email {
        if !email.eq_ignore_ascii_case(&member.email) {
            if state.store.find_member_by_email(&email).await?.is_some() {
                return Err(AppError::Conflict(anyhow::anyhow!("Email already used")));
            }
            member.email = email;
        }
    }
    if let Some(first_name) = req.first_name {
        member.first_name = first_name;
    }
    if let Some(last_name) = req.last_name {
        member.last_name = last_name;
    }
    if let Some(language) = req.language {
        member.language = language;
    }
    if let Some(subscribed) = req.subscribed {
        member.subscribed = subscribed;
    }
    if let Some(member_type) = req.member_type {
        member.member_type_code = MemberType::from(member_type).as_str().to_string();
    }

    state.store.update_member(&member).await?;
    info!(member_uuid = %member_uuid, "Member updated");
    Ok(Json(MemberResponse::from(member)))
}

/// Delete a member
///
/// The member is marked deleted and can no longer log in. Admins cannot
/// delete themselves.
#[utoipa::path(
    delete,
    path = "/api/v1/members/{member_uuid}",
    params(("member_uuid" = Uuid, Path, description = "Member id")),
    responses(
        (status = 200, description = "Member deleted", body = MessageResponse),
        (status = 401, description = "Not an admin", body = ErrorResponse),
        (status = 404, description = "Member not found", body = ErrorResponse),
        (status = 409, description = "Admins cannot delete themselves", body = ErrorResponse)
    ),
    tag = "Members",
    security(("bearer_auth" = []))
)]
pub async fn delete_member(
    State(state): State<AppState>,
    AuthMember(details): AuthMember,
    Path(member_uuid): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    if details.member_uuid == member_uuid {
        return Err(AppError::Conflict(anyhow::anyhow!(
            "Admins cannot delete themselves"
        )));
    }

    state.store.delete_member(member_uuid).await?;

    info!(
        member_uuid = %member_uuid,
        author_uuid = %details.member_uuid,
        "Member deleted"
    );
    Ok(Json(MessageResponse::new("Member deleted")))
}

/// Send the registration email again
#[utoipa::path(
    get,
    path = "/api/v1/members/{member_uuid}/registration",
    params(("member_uuid" = Uuid, Path, description = "Member id")),
    responses(
        (status = 200, description = "Registration email enqueued", body = MessageResponse),
        (status = 401, description = "Not an admin", body = ErrorResponse),
        (status = 404, description = "Member not found", body = ErrorResponse)
    ),
    tag = "Members",
    security(("bearer_auth" = []))
)]
pub async fn resend_registration(
    State(state): State<AppState>,
    AuthMember(author): AuthMember,
    Path(member_uuid): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    state
        .store
        .find_member(member_uuid)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Member not found")))?;

    let created = state
        .store
        .create_notification(&NewNotification::due_now(
            NotificationType::MemberRegistration,
            Some(author.member_uuid),
            member_uuid,
        ))
        .await?;

    info!(
        member_uuid = %member_uuid,
        author_uuid = %author.member_uuid,
        notification_id = created.notification_id,
        "Registration email enqueued"
    );
    Ok(Json(MessageResponse::new("Registration email enqueued")))
}
