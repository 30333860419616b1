//! PostgreSQL persistence.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use service_core::error::AppError;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::PgExecutor;
use std::time::Duration;
use tracing::{info, instrument};
use uuid::Uuid;

use super::store::{EventStore, MemberStore, NotificationStore, Store};
use crate::config::DatabaseConfig;
use crate::models::{
    Credentials, DeliveryStatus, Event, Member, MemberStatus, NewNotification, Notification,
    NotificationType, Participation,
};

const MEMBER_COLUMNS: &str = "member_uuid, first_name, last_name, email, member_type_code, \
     member_status_code, subscribed, language, created_utc";
const EVENT_COLUMNS: &str =
    "event_uuid, name, description, location_name, start_utc, end_utc, created_utc";
const NOTIFICATION_COLUMNS: &str = "notification_id, notification_type_code, author_uuid, \
     object_uuid, send_utc, delivery_status_code, created_utc";
const PARTICIPATION_COLUMNS: &str = "event_uuid, member_uuid, answer, presence, updated_utc";

#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    #[instrument(skip(config))]
    pub async fn new(config: &DatabaseConfig) -> Result<Self, AppError> {
        info!(
            max_connections = config.max_connections,
            "Connecting to PostgreSQL"
        );

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .connect(&config.url)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to connect: {}", e)))?;

        info!("PostgreSQL connection pool established");

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> Result<(), AppError> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        info!("Database migrations completed");
        Ok(())
    }
}

fn db_error(context: &str, e: sqlx::Error) -> AppError {
    AppError::DatabaseError(anyhow::anyhow!("{}: {}", context, e))
}

/// The only unique index on members besides the key is the live email.
fn member_write_error(context: &str, e: sqlx::Error) -> AppError {
    match e {
        sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
            AppError::Conflict(anyhow::anyhow!("Email already used"))
        }
        other => db_error(context, other),
    }
}

async fn insert_member_row<'e>(
    executor: impl PgExecutor<'e>,
    member: &Member,
) -> Result<(), AppError> {
    sqlx::query(
        r#"
        INSERT INTO members (member_uuid, first_name, last_name, email, member_type_code,
                             member_status_code, subscribed, language, created_utc)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        "#,
    )
    .bind(member.member_uuid)
    .bind(&member.first_name)
    .bind(&member.last_name)
    .bind(&member.email)
    .bind(&member.member_type_code)
    .bind(&member.member_status_code)
    .bind(member.subscribed)
    .bind(&member.language)
    .bind(member.created_utc)
    .execute(executor)
    .await
    .map_err(|e| member_write_error("Failed to create member", e))?;
    Ok(())
}

async fn insert_notification_row<'e>(
    executor: impl PgExecutor<'e>,
    notification: &NewNotification,
) -> Result<Notification, AppError> {
    sqlx::query_as::<_, Notification>(&format!(
        r#"
        INSERT INTO notifications (notification_type_code, author_uuid, object_uuid, send_utc, delivery_status_code)
        VALUES ($1, $2, $3, $4, $5)
        RETURNING {}
        "#,
        NOTIFICATION_COLUMNS
    ))
    .bind(notification.notification_type.as_str())
    .bind(notification.author_uuid)
    .bind(notification.object_uuid)
    .bind(notification.send_utc)
    .bind(DeliveryStatus::NotDelivered.as_str())
    .fetch_one(executor)
    .await
    .map_err(|e| db_error("Failed to create notification", e))
}

#[async_trait]
impl MemberStore for Database {
    #[instrument(skip(self), fields(member_uuid = %member_uuid))]
    async fn find_member(&self, member_uuid: Uuid) -> Result<Option<Member>, AppError> {
        sqlx::query_as::<_, Member>(&format!(
            "SELECT {} FROM members WHERE member_uuid = $1 AND member_status_code <> $2",
            MEMBER_COLUMNS
        ))
        .bind(member_uuid)
        .bind(MemberStatus::Deleted.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("Failed to load member", e))
    }

    #[instrument(skip(self, email))]
    async fn find_member_by_email(&self, email: &str) -> Result<Option<Member>, AppError> {
        sqlx::query_as::<_, Member>(&format!(
            "SELECT {} FROM members WHERE lower(email) = lower($1) AND member_status_code <> $2 \
             ORDER BY created_utc LIMIT 1",
            MEMBER_COLUMNS
        ))
        .bind(email)
        .bind(MemberStatus::Deleted.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("Failed to load member by email", e))
    }

    #[instrument(skip(self))]
    async fn list_members(&self) -> Result<Vec<Member>, AppError> {
        sqlx::query_as::<_, Member>(&format!(
            "SELECT {} FROM members WHERE member_status_code <> $1 ORDER BY first_name, last_name",
            MEMBER_COLUMNS
        ))
        .bind(MemberStatus::Deleted.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_error("Failed to list members", e))
    }

    #[instrument(skip(self))]
    async fn has_members(&self) -> Result<bool, AppError> {
        sqlx::query_scalar::<_, bool>("SELECT EXISTS (SELECT 1 FROM members)")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| db_error("Failed to count members", e))
    }

    #[instrument(skip(self, member), fields(member_uuid = %member.member_uuid))]
    async fn insert_member(&self, member: &Member) -> Result<(), AppError> {
        insert_member_row(&self.pool, member).await?;
        info!("Member created");
        Ok(())
    }

    #[instrument(skip(self, member, registration), fields(member_uuid = %member.member_uuid))]
    async fn create_member_with_registration(
        &self,
        member: &Member,
        registration: &NewNotification,
    ) -> Result<Notification, AppError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| db_error("Failed to open transaction", e))?;

        insert_member_row(&mut *tx, member).await?;
        let created = insert_notification_row(&mut *tx, registration).await?;

        tx.commit()
            .await
            .map_err(|e| db_error("Failed to commit member creation", e))?;

        info!(notification_id = created.notification_id, "Member created");
        Ok(created)
    }

    #[instrument(skip(self, member, registration), fields(member_uuid = %member.member_uuid))]
    async fn create_first_member_with_registration(
        &self,
        member: &Member,
        registration: &NewNotification,
    ) -> Result<Option<Notification>, AppError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| db_error("Failed to open transaction", e))?;

        // Serializes concurrent initializations; readers are not blocked.
        sqlx::query("LOCK TABLE members IN SHARE ROW EXCLUSIVE MODE")
            .execute(&mut *tx)
            .await
            .map_err(|e| db_error("Failed to lock members", e))?;

        let initialized =
            sqlx::query_scalar::<_, bool>("SELECT EXISTS (SELECT 1 FROM members)")
                .fetch_one(&mut *tx)
                .await
                .map_err(|e| db_error("Failed to count members", e))?;
        if initialized {
            return Ok(None);
        }

        insert_member_row(&mut *tx, member).await?;
        let created = insert_notification_row(&mut *tx, registration).await?;

        tx.commit()
            .await
            .map_err(|e| db_error("Failed to commit initialization", e))?;

        info!("First member created");
        Ok(Some(created))
    }

    #[instrument(skip(self, member), fields(member_uuid = %member.member_uuid))]
    async fn update_member(&self, member: &Member) -> Result<(), AppError> {
        let result = sqlx::query(
            r#"
            UPDATE members
            SET first_name = $2, last_name = $3, email = $4, member_type_code = $5,
                member_status_code = $6, subscribed = $7, language = $8
            WHERE member_uuid = $1
            "#,
        )
        .bind(member.member_uuid)
        .bind(&member.first_name)
        .bind(&member.last_name)
        .bind(&member.email)
        .bind(&member.member_type_code)
        .bind(&member.member_status_code)
        .bind(member.subscribed)
        .bind(&member.language)
        .execute(&self.pool)
        .await
        .map_err(|e| member_write_error("Failed to update member", e))?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(anyhow::anyhow!("Member not found")));
        }
        Ok(())
    }

    #[instrument(skip(self), fields(member_uuid = %member_uuid))]
    async fn delete_member(&self, member_uuid: Uuid) -> Result<(), AppError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| db_error("Failed to open transaction", e))?;

        let result = sqlx::query(
            "UPDATE members SET member_status_code = $2 \
             WHERE member_uuid = $1 AND member_status_code <> $2",
        )
        .bind(member_uuid)
        .bind(MemberStatus::Deleted.as_str())
        .execute(&mut *tx)
        .await
        .map_err(|e| db_error("Failed to delete member", e))?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(anyhow::anyhow!("Member not found")));
        }

        sqlx::query("DELETE FROM member_credentials WHERE member_uuid = $1")
            .bind(member_uuid)
            .execute(&mut *tx)
            .await
            .map_err(|e| db_error("Failed to delete credentials", e))?;

        tx.commit()
            .await
            .map_err(|e| db_error("Failed to commit member deletion", e))?;

        info!("Member deleted");
        Ok(())
    }

    #[instrument(skip(self), fields(member_uuid = %member_uuid))]
    async fn find_credentials(&self, member_uuid: Uuid) -> Result<Option<Credentials>, AppError> {
        sqlx::query_as::<_, Credentials>(
            "SELECT member_uuid, username, password_hash, updated_utc \
             FROM member_credentials WHERE member_uuid = $1",
        )
        .bind(member_uuid)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("Failed to load credentials", e))
    }

    #[instrument(skip(self, username))]
    async fn find_credentials_by_username(
        &self,
        username: &str,
    ) -> Result<Option<Credentials>, AppError> {
        sqlx::query_as::<_, Credentials>(
            "SELECT member_uuid, username, password_hash, updated_utc \
             FROM member_credentials WHERE username = $1",
        )
        .bind(username)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("Failed to load credentials", e))
    }

    #[instrument(skip(self, username, password_hash), fields(member_uuid = %member_uuid))]
    async fn upsert_credentials(
        &self,
        member_uuid: Uuid,
        username: &str,
        password_hash: &str,
    ) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO member_credentials (member_uuid, username, password_hash, updated_utc)
            VALUES ($1, $2, $3, NOW())
            ON CONFLICT (member_uuid)
            DO UPDATE SET username = EXCLUDED.username,
                          password_hash = EXCLUDED.password_hash,
                          updated_utc = NOW()
            "#,
        )
        .bind(member_uuid)
        .bind(username)
        .bind(password_hash)
        .execute(&self.pool)
        .await?;

        info!("Credentials updated");
        Ok(())
    }
}

#[async_trait]
impl EventStore for Database {
    #[instrument(skip(self, event), fields(event_uuid = %event.event_uuid))]
    async fn insert_event(&self, event: &Event) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO events (event_uuid, name, description, location_name, start_utc, end_utc, created_utc)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(event.event_uuid)
        .bind(&event.name)
        .bind(&event.description)
        .bind(&event.location_name)
        .bind(event.start_utc)
        .bind(event.end_utc)
        .bind(event.created_utc)
        .execute(&self.pool)
        .await?;

        info!("Event created");
        Ok(())
    }

    #[instrument(skip(self), fields(event_uuid = %event_uuid))]
    async fn find_event(&self, event_uuid: Uuid) -> Result<Option<Event>, AppError> {
        sqlx::query_as::<_, Event>(&format!(
            "SELECT {} FROM events WHERE event_uuid = $1 AND NOT deleted",
            EVENT_COLUMNS
        ))
        .bind(event_uuid)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("Failed to load event", e))
    }

    #[instrument(skip(self, event), fields(event_uuid = %event.event_uuid))]
    async fn update_event(&self, event: &Event) -> Result<(), AppError> {
        let result = sqlx::query(
            r#"
            UPDATE events
            SET name = $2, description = $3, location_name = $4, start_utc = $5, end_utc = $6
            WHERE event_uuid = $1 AND NOT deleted
            "#,
        )
        .bind(event.event_uuid)
        .bind(&event.name)
        .bind(&event.description)
        .bind(&event.location_name)
        .bind(event.start_utc)
        .bind(event.end_utc)
        .execute(&self.pool)
        .await
        .map_err(|e| db_error("Failed to update event", e))?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(anyhow::anyhow!("Event not found")));
        }
        Ok(())
    }

    #[instrument(skip(self), fields(event_uuid = %event_uuid))]
    async fn delete_event(&self, event_uuid: Uuid) -> Result<(), AppError> {
        let result =
            sqlx::query("UPDATE events SET deleted = TRUE WHERE event_uuid = $1 AND NOT deleted")
                .bind(event_uuid)
                .execute(&self.pool)
                .await
                .map_err(|e| db_error("Failed to delete event", e))?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(anyhow::anyhow!("Event not found")));
        }
        info!("Event deleted");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn list_upcoming_events(&self, now: DateTime<Utc>) -> Result<Vec<Event>, AppError> {
        sqlx::query_as::<_, Event>(&format!(
            "SELECT {} FROM events WHERE start_utc > $1 AND NOT deleted ORDER BY start_utc",
            EVENT_COLUMNS
        ))
        .bind(now)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_error("Failed to list events", e))
    }

    #[instrument(skip(self), fields(notification_type = notification_type.as_str()))]
    async fn upcoming_events_without_notification(
        &self,
        now: DateTime<Utc>,
        notification_type: NotificationType,
    ) -> Result<Vec<Event>, AppError> {
        sqlx::query_as::<_, Event>(&format!(
            r#"
            SELECT {} FROM events e
            WHERE e.start_utc > $1
              AND NOT e.deleted
              AND NOT EXISTS (
                  SELECT 1 FROM notifications n
                  WHERE n.object_uuid = e.event_uuid AND n.notification_type_code = $2
              )
            ORDER BY e.start_utc
            "#,
            EVENT_COLUMNS
        ))
        .bind(now)
        .bind(notification_type.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_error("Failed to list events without notification", e))
    }

    #[instrument(skip(self), fields(event_uuid = %event_uuid, member_uuid = %member_uuid))]
    async fn find_participation(
        &self,
        event_uuid: Uuid,
        member_uuid: Uuid,
    ) -> Result<Option<Participation>, AppError> {
        sqlx::query_as::<_, Participation>(&format!(
            "SELECT {} FROM participations WHERE event_uuid = $1 AND member_uuid = $2",
            PARTICIPATION_COLUMNS
        ))
        .bind(event_uuid)
        .bind(member_uuid)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("Failed to load participation", e))
    }

    #[instrument(skip(self), fields(event_uuid = %event_uuid))]
    async fn list_participations(&self, event_uuid: Uuid) -> Result<Vec<Participation>, AppError> {
        sqlx::query_as::<_, Participation>(&format!(
            "SELECT {} FROM participations WHERE event_uuid = $1",
            PARTICIPATION_COLUMNS
        ))
        .bind(event_uuid)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_error("Failed to list participations", e))
    }

    #[instrument(skip(self, participation), fields(event_uuid = %participation.event_uuid))]
    async fn upsert_participation(&self, participation: &Participation) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO participations (event_uuid, member_uuid, answer, presence, updated_utc)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (event_uuid, member_uuid)
            DO UPDATE SET answer = EXCLUDED.answer, updated_utc = EXCLUDED.updated_utc
            "#,
        )
        .bind(participation.event_uuid)
        .bind(participation.member_uuid)
        .bind(&participation.answer)
        .bind(&participation.presence)
        .bind(participation.updated_utc)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    #[instrument(skip(self), fields(event_uuid = %event_uuid, member_uuid = %member_uuid))]
    async fn upsert_presence(
        &self,
        event_uuid: Uuid,
        member_uuid: Uuid,
        presence: &str,
    ) -> Result<Participation, AppError> {
        sqlx::query_as::<_, Participation>(&format!(
            r#"
            INSERT INTO participations (event_uuid, member_uuid, answer, presence, updated_utc)
            VALUES ($1, $2, '', $3, NOW())
            ON CONFLICT (event_uuid, member_uuid)
            DO UPDATE SET presence = EXCLUDED.presence, updated_utc = EXCLUDED.updated_utc
            RETURNING {}
            "#,
            PARTICIPATION_COLUMNS
        ))
        .bind(event_uuid)
        .bind(member_uuid)
        .bind(presence)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| db_error("Failed to record presence", e))
    }
}

#[async_trait]
impl NotificationStore for Database {
    #[instrument(skip(self, notification), fields(notification_type = notification.notification_type.as_str()))]
    async fn create_notification(
        &self,
        notification: &NewNotification,
    ) -> Result<Notification, AppError> {
        let created = insert_notification_row(&self.pool, notification).await?;
        info!(notification_id = created.notification_id, "Notification enqueued");
        Ok(created)
    }

    #[instrument(skip(self))]
    async fn due_notifications(&self, now: DateTime<Utc>) -> Result<Vec<Notification>, AppError> {
        sqlx::query_as::<_, Notification>(&format!(
            "SELECT {} FROM notifications \
             WHERE delivery_status_code = $1 AND send_utc <= $2 \
             ORDER BY send_utc, notification_id",
            NOTIFICATION_COLUMNS
        ))
        .bind(DeliveryStatus::NotDelivered.as_str())
        .bind(now)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_error("Failed to load due notifications", e))
    }

    #[instrument(skip(self), fields(status = status.as_str()))]
    async fn update_notification_status(
        &self,
        notification_id: i64,
        status: DeliveryStatus,
    ) -> Result<(), AppError> {
        let result =
            sqlx::query("UPDATE notifications SET delivery_status_code = $2 WHERE notification_id = $1")
                .bind(notification_id)
                .bind(status.as_str())
                .execute(&self.pool)
                .await
                .map_err(|e| db_error("Failed to update notification status", e))?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(anyhow::anyhow!(
                "Notification {} not found",
                notification_id
            )));
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn find_notification(
        &self,
        notification_id: i64,
    ) -> Result<Option<Notification>, AppError> {
        sqlx::query_as::<_, Notification>(&format!(
            "SELECT {} FROM notifications WHERE notification_id = $1",
            NOTIFICATION_COLUMNS
        ))
        .bind(notification_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("Failed to load notification", e))
    }
}

#[async_trait]
impl Store for Database {
    #[instrument(skip(self))]
    async fn health_check(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| db_error("Health check failed", e))?;
        Ok(())
    }
}
