//! In-process store for tests and local runs without PostgreSQL.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use service_core::error::AppError;
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

use super::store::{EventStore, MemberStore, NotificationStore, Store};
use crate::models::{
    Credentials, DeliveryStatus, Event, Member, MemberStatus, NewNotification, Notification,
    NotificationType, Participation,
};

#[derive(Default)]
struct Tables {
    members: Vec<Member>,
    credentials: HashMap<Uuid, Credentials>,
    events: Vec<Event>,
    participations: HashMap<(Uuid, Uuid), Participation>,
    notifications: Vec<Notification>,
    next_notification_id: i64,
    failing_members: HashSet<Uuid>,
    failing_notification_writes: bool,
}

impl Tables {
    fn email_taken(&self, email: &str, owner: Uuid) -> bool {
        self.members
            .iter()
            .any(|m| m.member_uuid != owner && is_visible(m) && m.email.eq_ignore_ascii_case(email))
    }

    fn insert_member(&mut self, member: &Member) -> Result<(), AppError> {
        if self
            .members
            .iter()
            .any(|m| m.member_uuid == member.member_uuid)
        {
            return Err(AppError::Conflict(anyhow::anyhow!("Record already exists")));
        }
        if self.email_taken(&member.email, member.member_uuid) {
            return Err(AppError::Conflict(anyhow::anyhow!("Email already used")));
        }
        self.members.push(member.clone());
        Ok(())
    }

    fn check_notification_write(&self) -> Result<(), AppError> {
        if self.failing_notification_writes {
            return Err(AppError::DatabaseError(anyhow::anyhow!(
                "Notification could not be written"
            )));
        }
        Ok(())
    }

    fn insert_notification(&mut self, notification: &NewNotification) -> Notification {
        self.next_notification_id += 1;
        let created = Notification {
            notification_id: self.next_notification_id,
            notification_type_code: notification.notification_type.as_str().to_string(),
            author_uuid: notification.author_uuid,
            object_uuid: notification.object_uuid,
            send_utc: notification.send_utc,
            delivery_status_code: DeliveryStatus::NotDelivered.as_str().to_string(),
            created_utc: Utc::now(),
        };
        self.notifications.push(created.clone());
        created
    }
}

#[derive(Default)]
pub struct InMemoryStore {
    tables: Mutex<Tables>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every lookup of `member_uuid` fail with a database error.
    pub fn fail_member_load(&self, member_uuid: Uuid) -> Result<(), AppError> {
        self.lock()?.failing_members.insert(member_uuid);
        Ok(())
    }

    /// Make every notification insert fail with a database error.
    pub fn fail_notification_writes(&self, failing: bool) -> Result<(), AppError> {
        self.lock()?.failing_notification_writes = failing;
        Ok(())
    }

    pub fn notifications(&self) -> Result<Vec<Notification>, AppError> {
        Ok(self.lock()?.notifications.clone())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Tables>, AppError> {
        self.tables
            .lock()
            .map_err(|e| AppError::InternalError(anyhow::anyhow!("Store mutex poisoned: {}", e)))
    }
}

fn is_visible(member: &Member) -> bool {
    member.member_status_code != MemberStatus::Deleted.as_str()
}

#[async_trait]
impl MemberStore for InMemoryStore {
    async fn find_member(&self, member_uuid: Uuid) -> Result<Option<Member>, AppError> {
        let tables = self.lock()?;
        if tables.failing_members.contains(&member_uuid) {
            return Err(AppError::DatabaseError(anyhow::anyhow!(
                "Member {} could not be read",
                member_uuid
            )));
        }
        Ok(tables
            .members
            .iter()
            .find(|m| m.member_uuid == member_uuid && is_visible(m))
            .cloned())
    }

    async fn find_member_by_email(&self, email: &str) -> Result<Option<Member>, AppError> {
        Ok(self
            .lock()?
            .members
            .iter()
            .find(|m| m.email.eq_ignore_ascii_case(email) && is_visible(m))
            .cloned())
    }

    async fn list_members(&self) -> Result<Vec<Member>, AppError> {
        let mut members: Vec<Member> = self
            .lock()?
            .members
            .iter()
            .filter(|m| is_visible(m))
            .cloned()
            .collect();
        members.sort_by(|a, b| {
            (&a.first_name, &a.last_name).cmp(&(&b.first_name, &b.last_name))
        });
        Ok(members)
    }

    async fn has_members(&self) -> Result<bool, AppError> {
        Ok(!self.lock()?.members.is_empty())
    }

    async fn insert_member(&self, member: &Member) -> Result<(), AppError> {
        self.lock()?.insert_member(member)
    }

    async fn create_member_with_registration(
        &self,
        member: &Member,
        registration: &NewNotification,
    ) -> Result<Notification, AppError> {
        let mut tables = self.lock()?;
        tables.check_notification_write()?;
        tables.insert_member(member)?;
        Ok(tables.insert_notification(registration))
    }

    async fn create_first_member_with_registration(
        &self,
        member: &Member,
        registration: &NewNotification,
    ) -> Result<Option<Notification>, AppError> {
        let mut tables = self.lock()?;
        if !tables.members.is_empty() {
            return Ok(None);
        }
        tables.check_notification_write()?;
        tables.insert_member(member)?;
        Ok(Some(tables.insert_notification(registration)))
    }

    async fn update_member(&self, member: &Member) -> Result<(), AppError> {
        let mut tables = self.lock()?;
        if tables.email_taken(&member.email, member.member_uuid) {
            return Err(AppError::Conflict(anyhow::anyhow!("Email already used")));
        }
        let existing = tables
            .members
            .iter_mut()
            .find(|m| m.member_uuid == member.member_uuid)
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Member not found")))?;
        *existing = member.clone();
        Ok(())
    }

    async fn delete_member(&self, member_uuid: Uuid) -> Result<(), AppError> {
        let mut tables = self.lock()?;
        let member = tables
            .members
            .iter_mut()
            .find(|m| m.member_uuid == member_uuid && is_visible(m))
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Member not found")))?;
        member.member_status_code = MemberStatus::Deleted.as_str().to_string();
        tables.credentials.remove(&member_uuid);
        Ok(())
    }

    async fn find_credentials(&self, member_uuid: Uuid) -> Result<Option<Credentials>, AppError> {
        Ok(self.lock()?.credentials.get(&member_uuid).cloned())
    }

    async fn find_credentials_by_username(
        &self,
        username: &str,
    ) -> Result<Option<Credentials>, AppError> {
        Ok(self
            .lock()?
            .credentials
            .values()
            .find(|c| c.username == username)
            .cloned())
    }

    async fn upsert_credentials(
        &self,
        member_uuid: Uuid,
        username: &str,
        password_hash: &str,
    ) -> Result<(), AppError> {
        let mut tables = self.lock()?;
        if tables
            .credentials
            .values()
            .any(|c| c.username == username && c.member_uuid != member_uuid)
        {
            return Err(AppError::Conflict(anyhow::anyhow!("Record already exists")));
        }
        tables.credentials.insert(
            member_uuid,
            Credentials {
                member_uuid,
                username: username.to_string(),
                password_hash: password_hash.to_string(),
                updated_utc: Utc::now(),
            },
        );
        Ok(())
    }
}

#[async_trait]
impl EventStore for InMemoryStore {
    async fn insert_event(&self, event: &Event) -> Result<(), AppError> {
        self.lock()?.events.push(event.clone());
        Ok(())
    }

    async fn find_event(&self, event_uuid: Uuid) -> Result<Option<Event>, AppError> {
        Ok(self
            .lock()?
            .events
            .iter()
            .find(|e| e.event_uuid == event_uuid)
            .cloned())
    }

    async fn update_event(&self, event: &Event) -> Result<(), AppError> {
        let mut tables = self.lock()?;
        let existing = tables
            .events
            .iter_mut()
            .find(|e| e.event_uuid == event.event_uuid)
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Event not found")))?;
        *existing = event.clone();
        Ok(())
    }

    async fn delete_event(&self, event_uuid: Uuid) -> Result<(), AppError> {
        let mut tables = self.lock()?;
        let before = tables.events.len();
        tables.events.retain(|e| e.event_uuid != event_uuid);
        if tables.events.len() == before {
            return Err(AppError::NotFound(anyhow::anyhow!("Event not found")));
        }
        Ok(())
    }

    async fn list_upcoming_events(&self, now: DateTime<Utc>) -> Result<Vec<Event>, AppError> {
        let mut events: Vec<Event> = self
            .lock()?
            .events
            .iter()
            .filter(|e| e.start_utc > now)
            .cloned()
            .collect();
        events.sort_by_key(|e| e.start_utc);
        Ok(events)
    }

    async fn upcoming_events_without_notification(
        &self,
        now: DateTime<Utc>,
        notification_type: NotificationType,
    ) -> Result<Vec<Event>, AppError> {
        let tables = self.lock()?;
        let mut events: Vec<Event> = tables
            .events
            .iter()
            .filter(|e| e.start_utc > now)
            .filter(|e| {
                !tables.notifications.iter().any(|n| {
                    n.object_uuid == e.event_uuid
                        && n.notification_type_code == notification_type.as_str()
                })
            })
            .cloned()
            .collect();
        events.sort_by_key(|e| e.start_utc);
        Ok(events)
    }

    async fn find_participation(
        &self,
        event_uuid: Uuid,
        member_uuid: Uuid,
    ) -> Result<Option<Participation>, AppError> {
        Ok(self
            .lock()?
            .participations
            .get(&(event_uuid, member_uuid))
            .cloned())
    }

    async fn list_participations(&self, event_uuid: Uuid) -> Result<Vec<Participation>, AppError> {
        Ok(self
            .lock()?
            .participations
            .values()
            .filter(|p| p.event_uuid == event_uuid)
            .cloned()
            .collect())
    }

    async fn upsert_participation(&self, participation: &Participation) -> Result<(), AppError> {
        let mut tables = self.lock()?;
        let key = (participation.event_uuid, participation.member_uuid);
        match tables.participations.get_mut(&key) {
            Some(existing) => {
                existing.answer = participation.answer.clone();
                existing.updated_utc = participation.updated_utc;
            }
            None => {
                tables.participations.insert(key, participation.clone());
            }
        }
        Ok(())
    }

    async fn upsert_presence(
        &self,
        event_uuid: Uuid,
        member_uuid: Uuid,
        presence: &str,
    ) -> Result<Participation, AppError> {
        let mut tables = self.lock()?;
        let participation = tables
            .participations
            .entry((event_uuid, member_uuid))
            .or_insert_with(|| Participation::answered(event_uuid, member_uuid, ""));
        participation.presence = presence.to_string();
        participation.updated_utc = Utc::now();
        Ok(participation.clone())
    }
}

#[async_trait]
impl NotificationStore for InMemoryStore {
    async fn create_notification(
        &self,
        notification: &NewNotification,
    ) -> Result<Notification, AppError> {
        let mut tables = self.lock()?;
        tables.check_notification_write()?;
        Ok(tables.insert_notification(notification))
    }

    async fn due_notifications(&self, now: DateTime<Utc>) -> Result<Vec<Notification>, AppError> {
        let mut due: Vec<Notification> = self
            .lock()?
            .notifications
            .iter()
            .filter(|n| {
                n.delivery_status_code == DeliveryStatus::NotDelivered.as_str() && n.send_utc <= now
            })
            .cloned()
            .collect();
        due.sort_by_key(|n| (n.send_utc, n.notification_id));
        Ok(due)
    }

    async fn update_notification_status(
        &self,
        notification_id: i64,
        status: DeliveryStatus,
    ) -> Result<(), AppError> {
        let mut tables = self.lock()?;
        let notification = tables
            .notifications
            .iter_mut()
            .find(|n| n.notification_id == notification_id)
            .ok_or_else(|| {
                AppError::NotFound(anyhow::anyhow!(
                    "Notification {} not found",
                    notification_id
                ))
            })?;
        notification.delivery_status_code = status.as_str().to_string();
        Ok(())
    }

    async fn find_notification(
        &self,
        notification_id: i64,
    ) -> Result<Option<Notification>, AppError> {
        Ok(self
            .lock()?
            .notifications
            .iter()
            .find(|n| n.notification_id == notification_id)
            .cloned())
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn health_check(&self) -> Result<(), AppError> {
        self.lock().map(|_| ())
    }
}
