//! Persistence seams consumed by the auth core, the scheduler and handlers.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use service_core::error::AppError;
use uuid::Uuid;

use crate::models::{
    Credentials, DeliveryStatus, Event, Member, NewNotification, Notification, NotificationType,
    Participation,
};

#[async_trait]
pub trait MemberStore: Send + Sync {
    /// Deleted members are never returned.
    async fn find_member(&self, member_uuid: Uuid) -> Result<Option<Member>, AppError>;
    async fn find_member_by_email(&self, email: &str) -> Result<Option<Member>, AppError>;
    async fn list_members(&self) -> Result<Vec<Member>, AppError>;
    /// Whether any member row exists, deleted ones included.
    async fn has_members(&self) -> Result<bool, AppError>;
    /// Fails with `Conflict` when a live member already uses the email.
    async fn insert_member(&self, member: &Member) -> Result<(), AppError>;
    /// Insert `member` and enqueue `registration` atomically.
    async fn create_member_with_registration(
        &self,
        member: &Member,
        registration: &NewNotification,
    ) -> Result<Notification, AppError>;
    /// Same as `create_member_with_registration`, but only while the store
    /// holds no member at all. Returns `None` once initialized.
    async fn create_first_member_with_registration(
        &self,
        member: &Member,
        registration: &NewNotification,
    ) -> Result<Option<Notification>, AppError>;
    /// Fails with `Conflict` when a live member already uses the email.
    async fn update_member(&self, member: &Member) -> Result<(), AppError>;
    /// Mark the member deleted and drop its credentials.
    async fn delete_member(&self, member_uuid: Uuid) -> Result<(), AppError>;
    async fn find_credentials(&self, member_uuid: Uuid) -> Result<Option<Credentials>, AppError>;
    async fn find_credentials_by_username(
        &self,
        username: &str,
    ) -> Result<Option<Credentials>, AppError>;
    /// Fails with `Conflict` when the username belongs to another member.
    async fn upsert_credentials(
        &self,
        member_uuid: Uuid,
        username: &str,
        password_hash: &str,
    ) -> Result<(), AppError>;
}

#[async_trait]
pub trait EventStore: Send + Sync {
    async fn insert_event(&self, event: &Event) -> Result<(), AppError>;
    /// Deleted events are never returned.
    async fn find_event(&self, event_uuid: Uuid) -> Result<Option<Event>, AppError>;
    async fn update_event(&self, event: &Event) -> Result<(), AppError>;
    async fn delete_event(&self, event_uuid: Uuid) -> Result<(), AppError>;
    /// Events starting after `now`, soonest first.
    async fn list_upcoming_events(&self, now: DateTime<Utc>) -> Result<Vec<Event>, AppError>;
    /// Upcoming events that have no notification of `notification_type` yet.
    async fn upcoming_events_without_notification(
        &self,
        now: DateTime<Utc>,
        notification_type: NotificationType,
    ) -> Result<Vec<Event>, AppError>;
    async fn find_participation(
        &self,
        event_uuid: Uuid,
        member_uuid: Uuid,
    ) -> Result<Option<Participation>, AppError>;
    /// Every answer recorded for an event.
    async fn list_participations(&self, event_uuid: Uuid) -> Result<Vec<Participation>, AppError>;
    /// Store the member's answer, keeping any recorded presence.
    async fn upsert_participation(&self, participation: &Participation) -> Result<(), AppError>;
    /// Store the presence, keeping any answer.
    async fn upsert_presence(
        &self,
        event_uuid: Uuid,
        member_uuid: Uuid,
        presence: &str,
    ) -> Result<Participation, AppError>;
}

#[async_trait]
pub trait NotificationStore: Send + Sync {
    async fn create_notification(
        &self,
        notification: &NewNotification,
    ) -> Result<Notification, AppError>;
    /// Not-delivered notifications with `send_utc <= now`, oldest first.
    async fn due_notifications(&self, now: DateTime<Utc>) -> Result<Vec<Notification>, AppError>;
    async fn update_notification_status(
        &self,
        notification_id: i64,
        status: DeliveryStatus,
    ) -> Result<(), AppError>;
    async fn find_notification(
        &self,
        notification_id: i64,
    ) -> Result<Option<Notification>, AppError>;
}

/// Everything the service persists.
#[async_trait]
pub trait Store: MemberStore + EventStore + NotificationStore {
    async fn health_check(&self) -> Result<(), AppError>;
}
