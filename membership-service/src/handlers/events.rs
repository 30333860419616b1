use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use chrono::Utc;
use service_core::error::AppError;
use tracing::info;
use uuid::Uuid;

use crate::{
    dtos::{
        events::{
            EventParticipantResponse, EventRequest, ParticipationRequest, ParticipationResponse,
            PresenceRequest,
        },
        MessageResponse,
    },
    middleware::AuthMember,
    models::{Event, EventResponse, Participation},
    services::{EventStore, MemberStore},
    utils::ValidatedJson,
    AppState,
};

fn check_dates(req: &EventRequest) -> Result<(), AppError> {
    if req.end_date < req.start_date {
        return Err(AppError::BadRequest(anyhow::anyhow!(
            "Event cannot end before it starts"
        )));
    }
    Ok(())
}

async fn load_event(state: &AppState, event_uuid: Uuid) -> Result<Event, AppError> {
    state
        .store
        .find_event(event_uuid)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Event not found")))
}

/// List upcoming events
#[utoipa::path(
    get,
    path = "/api/v1/events",
    responses(
        (status = 200, description = "Upcoming events, soonest first", body = Vec<EventResponse>)
    ),
    tag = "Events"
)]
pub async fn list_events(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    let events: Vec<EventResponse> = state
        .store
        .list_upcoming_events(Utc::now())
        .await?
        .into_iter()
        .map(EventResponse::from)
        .collect();
    Ok(Json(events))
}

/// Get an event
#[utoipa::path(
    get,
    path = "/api/v1/events/{event_uuid}",
    params(("event_uuid" = Uuid, Path, description = "Event id")),
    responses(
        (status = 200, description = "Event", body = EventResponse),
        (status = 404, description = "Event not found", body = ErrorResponse)
    ),
    tag = "Events"
)]
pub async fn get_event(
    State(state): State<AppState>,
    Path(event_uuid): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let event = load_event(&state, event_uuid).await?;
    Ok(Json(EventResponse::from(event)))
}

/// Create an event
#[utoipa::path(
    post,
    path = "/api/v1/events",
    request_body = EventRequest,
    responses(
        (status = 201, description = "Event created", body = EventResponse),
        (status = 400, description = "Event ends before it starts", body = ErrorResponse),
        (status = 401, description = "Not an admin", body = ErrorResponse)
    ),
    tag = "Events",
    security(("bearer_auth" = []))
)]
pub async fn create_event(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<EventRequest>,
) -> Result<impl IntoResponse, AppError> {
    check_dates(&req)?;

    let event = Event::new(
        req.name,
        req.description,
        req.location_name,
        req.start_date,
        req.end_date,
    );
    state.store.insert_event(&event).await?;

    info!(event_uuid = %event.event_uuid, "Event created");
    Ok((StatusCode::CREATED, Json(EventResponse::from(event))))
}

/// Replace an event's fields
#[utoipa::path(
    put,
    path = "/api/v1/events/{event_uuid}",
    params(("event_uuid" = Uuid, Path, description = "Event id")),
    request_body = EventRequest,
    responses(
        (status = 200, description = "Event updated", body = EventResponse),
        (status = 400, description = "Event ends before it starts", body = ErrorResponse),
        (status = 401, description = "Not an admin", body = ErrorResponse),
        (status = 404, description = "Event not found", body = ErrorResponse)
    ),
    tag = "Events",
    security(("bearer_auth" = []))
)]
pub async fn update_event(
    State(state): State<AppState>,
    Path(event_uuid): Path<Uuid>,
    ValidatedJson(req): ValidatedJson<EventRequest>,
) -> Result<impl IntoResponse, AppError> {
    check_dates(&req)?;

    let mut event = load_event(&state, event_uuid).await?;
    event.name = req.name;
    event.description = req.description;
    event.location_name = req.location_name;
    event.start_utc = req.start_date;
    event.end_utc = req.end_date;
    state.store.update_event(&event).await?;

    info!(event_uuid = %event_uuid, "Event updated");
    Ok(Json(EventResponse::from(event)))
}

/// Delete an event
#[utoipa::path(
    delete,
    path = "/api/v1/events/{event_uuid}",
    params(("event_uuid" = Uuid, Path, description = "Event id")),
    responses(
        (status = 200, description = "Event deleted", body = MessageResponse),
        (status = 401, description = "Not an admin", body = ErrorResponse),
        (status = 404, description = "Event not found", body = ErrorResponse)
    ),
    tag = "Events",
    security(("bearer_auth" = []))
)]
pub async fn delete_event(
    State(state): State<AppState>,
    Path(event_uuid): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    state.store.delete_event(event_uuid).await?;
    info!(event_uuid = %event_uuid, "Event deleted");
    Ok(Json(MessageResponse::new("Event deleted")))
}

/// Answer whether the caller takes part in an event
#[utoipa::path(
    post,
    path = "/api/v1/members/events/{event_uuid}",
    params(("event_uuid" = Uuid, Path, description = "Event id")),
    request_body = ParticipationRequest,
    responses(
        (status = 200, description = "Answer recorded", body = ParticipationResponse),
        (status = 401, description = "Invalid token", body = ErrorResponse),
        (status = 403, description = "Token expired", body = ErrorResponse),
        (status = 404, description = "Event not found", body = ErrorResponse)
    ),
    tag = "Events",
    security(("bearer_auth" = []))
)]
pub async fn participate(
    State(state): State<AppState>,
    AuthMember(details): AuthMember,
    Path(event_uuid): Path<Uuid>,
    ValidatedJson(req): ValidatedJson<ParticipationRequest>,
) -> Result<impl IntoResponse, AppError> {
    load_event(&state, event_uuid).await?;

    let participation =
        Participation::answered(event_uuid, details.member_uuid, req.answer.as_str());
    state.store.upsert_participation(&participation).await?;

    let stored = state
        .store
        .find_participation(event_uuid, details.member_uuid)
        .await?
        .unwrap_or(participation);

    info!(
        event_uuid = %event_uuid,
        member_uuid = %details.member_uuid,
        answer = %stored.answer,
        "Participation recorded"
    );
    Ok((StatusCode::OK, Json(ParticipationResponse::from(stored))))
}

/// List every member with their answer and presence for an event
#[utoipa::path(
    get,
    path = "/api/v1/events/{event_uuid}/members",
    params(("event_uuid" = Uuid, Path, description = "Event id")),
    responses(
        (status = 200, description = "Participation list", body = Vec<EventParticipantResponse>),
        (status = 401, description = "Not an admin", body = ErrorResponse),
        (status = 404, description = "Event not found", body = ErrorResponse)
    ),
    tag = "Events",
    security(("bearer_auth" = []))
)]
pub async fn list_participants(
    State(state): State<AppState>,
    Path(event_uuid): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    load_event(&state, event_uuid).await?;

    let mut participations = state.store.list_participations(event_uuid).await?;
    let participants: Vec<EventParticipantResponse> = state
        .store
        .list_members()
        .await?
        .into_iter()
        .map(|member| {
            let recorded = participations
                .iter()
                .position(|p| p.member_uuid == member.member_uuid)
                .map(|i| participations.swap_remove(i));
            let (answer, presence) = recorded
                .map(|p| (p.answer, p.presence))
                .unwrap_or_default();
            EventParticipantResponse {
                member_uuid: member.member_uuid,
                first_name: member.first_name,
                last_name: member.last_name,
                member_type: member.member_type_code,
                answer,
                presence,
            }
        })
        .collect();

    Ok(Json(participants))
}

/// Record whether a member attended an event
#[utoipa::path(
    post,
    path = "/api/v1/events/{event_uuid}/members/{member_uuid}",
    params(
        ("event_uuid" = Uuid, Path, description = "Event id"),
        ("member_uuid" = Uuid, Path, description = "Member id")
    ),
    request_body = PresenceRequest,
    responses(
        (status = 201, description = "Presence recorded", body = ParticipationResponse),
        (status = 401, description = "Not an admin", body = ErrorResponse),
        (status = 404, description = "Event or member not found", body = ErrorResponse),
        (status = 422, description = "Validation error", body = ErrorResponse)
    ),
    tag = "Events",
    security(("bearer_auth" = []))
)]
pub async fn record_presence(
    State(state): State<AppState>,
    Path((event_uuid, member_uuid)): Path<(Uuid, Uuid)>,
    ValidatedJson(req): ValidatedJson<PresenceRequest>,
) -> Result<impl IntoResponse, AppError> {
    load_event(&state, event_uuid).await?;
    state
        .store
        .find_member(member_uuid)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Member not found")))?;

    let participation = state
        .store
        .upsert_presence(event_uuid, member_uuid, req.presence.as_str())
        .await?;

    info!(
        event_uuid = %event_uuid,
        member_uuid = %member_uuid,
        presence = req.presence.as_str(),
        "Presence recorded"
    );
    Ok((
        StatusCode::CREATED,
        Json(ParticipationResponse::from(participation)),
    ))
}
