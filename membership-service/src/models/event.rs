//! Event model - association events and member participation answers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct Event {
    pub event_uuid: Uuid,
    pub name: String,
    pub description: String,
    pub location_name: String,
    pub start_utc: DateTime<Utc>,
    pub end_utc: DateTime<Utc>,
    pub created_utc: DateTime<Utc>,
}

impl Event {
    pub fn new(
        name: String,
        description: String,
        location_name: String,
        start_utc: DateTime<Utc>,
        end_utc: DateTime<Utc>,
    ) -> Self {
        Self {
            event_uuid: Uuid::new_v4(),
            name,
            description,
            location_name,
            start_utc,
            end_utc,
            created_utc: Utc::now(),
        }
    }

    pub fn has_started(&self, now: DateTime<Utc>) -> bool {
        self.start_utc < now
    }
}

/// A member's answer for an event ("yes", "no", "maybe") and the presence
/// an admin recorded on the day ("yes", "no" or empty).
#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct Participation {
    pub event_uuid: Uuid,
    pub member_uuid: Uuid,
    pub answer: String,
    pub presence: String,
    pub updated_utc: DateTime<Utc>,
}

impl Participation {
    pub fn answered(event_uuid: Uuid, member_uuid: Uuid, answer: &str) -> Self {
        Self {
            event_uuid,
            member_uuid,
            answer: answer.to_string(),
            presence: String::new(),
            updated_utc: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct EventResponse {
    pub uuid: Uuid,
    pub name: String,
    pub description: String,
    pub location_name: String,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
}

impl From<Event> for EventResponse {
    fn from(event: Event) -> Self {
        Self {
            uuid: event.event_uuid,
            name: event.name,
            description: event.description,
            location_name: event.location_name,
            start_date: event.start_utc,
            end_date: event.end_utc,
        }
    }
}
