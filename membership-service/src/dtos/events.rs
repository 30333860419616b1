use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::models::Participation;

/// Event fields; `PUT` replaces all of them.
#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct EventRequest {
    #[validate(length(min = 1, max = 200, message = "Name is required"))]
    #[schema(example = "Diada de Sant Jordi")]
    pub name: String,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    #[schema(example = "Plaça de la Vila")]
    pub location_name: String,

    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, ToSchema, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum ParticipationAnswer {
    Yes,
    No,
    Maybe,
}

impl ParticipationAnswer {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParticipationAnswer::Yes => "yes",
            ParticipationAnswer::No => "no",
            ParticipationAnswer::Maybe => "maybe",
        }
    }
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct ParticipationRequest {
    pub answer: ParticipationAnswer,
}

/// Presence recorded by an admin; the empty string clears it.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, ToSchema, PartialEq)]
pub enum PresenceAnswer {
    #[serde(rename = "yes")]
    Yes,
    #[serde(rename = "no")]
    No,
    #[serde(rename = "")]
    Unknown,
}

impl PresenceAnswer {
    pub fn as_str(&self) -> &'static str {
        match self {
            PresenceAnswer::Yes => "yes",
            PresenceAnswer::No => "no",
            PresenceAnswer::Unknown => "",
        }
    }
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct PresenceRequest {
    pub presence: PresenceAnswer,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ParticipationResponse {
    pub event_uuid: Uuid,
    pub member_uuid: Uuid,
    pub answer: String,
    pub presence: String,
}

impl From<Participation> for ParticipationResponse {
    fn from(participation: Participation) -> Self {
        Self {
            event_uuid: participation.event_uuid,
            member_uuid: participation.member_uuid,
            answer: participation.answer,
            presence: participation.presence,
        }
    }
}

/// One row of an event's participation list: every live member, with
/// empty strings where nothing was recorded.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct EventParticipantResponse {
    pub member_uuid: Uuid,
    pub first_name: String,
    pub last_name: String,
    #[serde(rename = "type")]
    pub member_type: String,
    pub answer: String,
    pub presence: String,
}
