//! Notification model - deferred outbound emails processed by the scheduler.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationType {
    MemberRegistration,
    UpcomingEvent,
    SummaryEvent,
    ForgotPassword,
}

impl NotificationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationType::MemberRegistration => "member_registration",
            NotificationType::UpcomingEvent => "upcoming_event",
            NotificationType::SummaryEvent => "summary_event",
            NotificationType::ForgotPassword => "forgot_password",
        }
    }

    pub fn parse(code: &str) -> Option<Self> {
        match code {
            "member_registration" => Some(NotificationType::MemberRegistration),
            "upcoming_event" => Some(NotificationType::UpcomingEvent),
            "summary_event" => Some(NotificationType::SummaryEvent),
            "forgot_password" => Some(NotificationType::ForgotPassword),
            _ => None,
        }
    }
}

/// Delivery status. Every status other than `NotDelivered` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    NotDelivered,
    Success,
    Failure,
    PartialFailure,
    TooLate,
    InProgress,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryStatus::NotDelivered => "not_delivered",
            DeliveryStatus::Success => "success",
            DeliveryStatus::Failure => "failure",
            DeliveryStatus::PartialFailure => "partial_failure",
            DeliveryStatus::TooLate => "too_late",
            DeliveryStatus::InProgress => "in_progress",
        }
    }

    pub fn parse(code: &str) -> Option<Self> {
        match code {
            "not_delivered" => Some(DeliveryStatus::NotDelivered),
            "success" => Some(DeliveryStatus::Success),
            "failure" => Some(DeliveryStatus::Failure),
            "partial_failure" => Some(DeliveryStatus::PartialFailure),
            "too_late" => Some(DeliveryStatus::TooLate),
            "in_progress" => Some(DeliveryStatus::InProgress),
            _ => None,
        }
    }

    /// Outcome of a fan-out send: nothing failed, everything failed, or a mix.
    pub fn from_failures(failures: usize, attempted: usize) -> Self {
        if failures == 0 {
            DeliveryStatus::Success
        } else if failures >= attempted {
            DeliveryStatus::Failure
        } else {
            DeliveryStatus::PartialFailure
        }
    }
}

#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct Notification {
    pub notification_id: i64,
    pub notification_type_code: String,
    pub author_uuid: Option<Uuid>,
    pub object_uuid: Uuid,
    pub send_utc: DateTime<Utc>,
    pub delivery_status_code: String,
    pub created_utc: DateTime<Utc>,
}

impl Notification {
    pub fn notification_type(&self) -> Option<NotificationType> {
        NotificationType::parse(&self.notification_type_code)
    }

    pub fn delivery_status(&self) -> Option<DeliveryStatus> {
        DeliveryStatus::parse(&self.delivery_status_code)
    }
}

/// Values needed to enqueue a notification; the store assigns the id.
#[derive(Debug, Clone)]
pub struct NewNotification {
    pub notification_type: NotificationType,
    pub author_uuid: Option<Uuid>,
    pub object_uuid: Uuid,
    pub send_utc: DateTime<Utc>,
}

impl NewNotification {
    pub fn due_now(
        notification_type: NotificationType,
        author_uuid: Option<Uuid>,
        object_uuid: Uuid,
    ) -> Self {
        Self {
            notification_type,
            author_uuid,
            object_uuid,
            send_utc: Utc::now(),
        }
    }
}
