//! Periodic dispatcher for queued notifications.
//!
//! Each poll first enqueues reminder and summary notifications for events
//! entering their lead window, then walks every due notification oldest
//! first. Every notification gets exactly one terminal status per poll and
//! that status is persisted before the next one is touched, so a crash
//! mid-batch leaves unprocessed items `not_delivered`. Failures are never
//! retried: a notification that failed stays failed.

use chrono::{DateTime, Duration, Utc};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn, Instrument};
use uuid::Uuid;

use crate::config::SchedulerConfig;
use crate::models::{
    DeliveryStatus, Event, Member, NewNotification, Notification, NotificationType,
};
use crate::services::email::{MailTemplate, Mailer};
use crate::services::metrics;
use crate::services::store::{EventStore, MemberStore, NotificationStore, Store};
use crate::services::tokens::TokenService;
use service_core::error::AppError;

#[derive(Clone)]
pub struct NotificationScheduler {
    store: Arc<dyn Store>,
    mailer: Arc<dyn Mailer>,
    tokens: TokenService,
    config: SchedulerConfig,
}

impl NotificationScheduler {
    pub fn new(
        store: Arc<dyn Store>,
        mailer: Arc<dyn Mailer>,
        tokens: TokenService,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            store,
            mailer,
            tokens,
            config,
        }
    }

    /// Poll on a fixed interval until `shutdown` is cancelled. A poll in
    /// flight is allowed to finish.
    pub async fn run(self, shutdown: CancellationToken) {
        let mut interval = tokio::time::interval(self.config.poll_interval());
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        info!(
            poll_interval_seconds = self.config.poll_interval_seconds,
            debug = self.config.debug,
            "Notification scheduler started"
        );

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Notification scheduler shutting down");
                    break;
                }
                _ = interval.tick() => {
                    if let Err(e) = self.poll_once(Utc::now()).await {
                        error!(error = %e, "Notification poll failed");
                    }
                }
            }
        }
    }

    /// One scheduler firing. Returns the status written for each processed
    /// notification, in processing order.
    pub async fn poll_once(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<(i64, DeliveryStatus)>, AppError> {
        let span = tracing::info_span!("notification_poll");
        async move {
            self.generate_event_notifications(now).await;

            let due = self.store.due_notifications(now).await?;
            let mut outcomes = Vec::with_capacity(due.len());

            for notification in due {
                let status = self.dispatch(&notification, now).await;

                if let Err(e) = self
                    .store
                    .update_notification_status(notification.notification_id, status)
                    .await
                {
                    // Left not_delivered; the next poll picks it up again.
                    error!(
                        notification_id = notification.notification_id,
                        error = %e,
                        "Failed to record notification status"
                    );
                    continue;
                }

                metrics::record_notification(
                    &notification.notification_type_code,
                    status.as_str(),
                );
                info!(
                    notification_id = notification.notification_id,
                    notification_type = %notification.notification_type_code,
                    status = status.as_str(),
                    "Notification processed"
                );
                outcomes.push((notification.notification_id, status));
            }

            Ok(outcomes)
        }
        .instrument(span)
        .await
    }

    /// Enqueue reminder and summary notifications for events starting
    /// within their configured lead time.
    async fn generate_event_notifications(&self, now: DateTime<Utc>) {
        let windows = [
            (
                NotificationType::UpcomingEvent,
                self.config.reminder_before_event_seconds,
            ),
            (
                NotificationType::SummaryEvent,
                self.config.summary_before_event_seconds,
            ),
        ];

        for (notification_type, lead_seconds) in windows {
            let events = match self
                .store
                .upcoming_events_without_notification(now, notification_type)
                .await
            {
                Ok(events) => events,
                Err(e) => {
                    error!(
                        notification_type = notification_type.as_str(),
                        error = %e,
                        "Failed to list events for notification generation"
                    );
                    continue;
                }
            };

            let horizon = now + Duration::seconds(lead_seconds);
            for event in events.iter().filter(|e| e.start_utc < horizon) {
                let notification = NewNotification {
                    notification_type,
                    author_uuid: None,
                    object_uuid: event.event_uuid,
                    send_utc: now,
                };
                if let Err(e) = self.store.create_notification(&notification).await {
                    error!(
                        event_uuid = %event.event_uuid,
                        error = %e,
                        "Failed to create event notification"
                    );
                }
            }
        }
    }

    async fn dispatch(&self, notification: &Notification, now: DateTime<Utc>) -> DeliveryStatus {
        match notification.notification_type() {
            Some(NotificationType::MemberRegistration) => {
                self.send_member_registration(notification).await
            }
            Some(NotificationType::ForgotPassword) => self.send_forgot_password(notification).await,
            Some(NotificationType::UpcomingEvent) => {
                self.send_event_reminder(notification, now).await
            }
            Some(NotificationType::SummaryEvent) => {
                self.send_event_summary(notification, now).await
            }
            None => {
                warn!(
                    notification_id = notification.notification_id,
                    notification_type = %notification.notification_type_code,
                    "Unknown notification type"
                );
                DeliveryStatus::Failure
            }
        }
    }

    async fn load_member(&self, member_uuid: Option<Uuid>) -> Option<Member> {
        let member_uuid = member_uuid?;
        match self.store.find_member(member_uuid).await {
            Ok(Some(member)) => Some(member),
            Ok(None) => {
                warn!(member_uuid = %member_uuid, "Member not found");
                None
            }
            Err(e) => {
                error!(member_uuid = %member_uuid, error = %e, "Failed to load member");
                None
            }
        }
    }

    async fn load_event(&self, event_uuid: Uuid) -> Option<Event> {
        match self.store.find_event(event_uuid).await {
            Ok(Some(event)) => Some(event),
            Ok(None) => {
                warn!(event_uuid = %event_uuid, "Event not found");
                None
            }
            Err(e) => {
                error!(event_uuid = %event_uuid, error = %e, "Failed to load event");
                None
            }
        }
    }

    async fn send_member_registration(&self, notification: &Notification) -> DeliveryStatus {
        let Some(member) = self.load_member(Some(notification.object_uuid)).await else {
            return DeliveryStatus::Failure;
        };
        let Some(author) = self.load_member(notification.author_uuid).await else {
            return DeliveryStatus::Failure;
        };

        if self.config.debug {
            return DeliveryStatus::Success;
        }

        let ttl = self.tokens.config().registration_ttl_minutes;
        let token = match self
            .tokens
            .reset_credentials_token(member.member_uuid, ttl)
            .await
        {
            Ok(token) => token,
            Err(e) => {
                error!(error = %e, "Failed to mint registration token");
                return DeliveryStatus::Failure;
            }
        };

        let context = json!({
            "author_name": author.display_name(),
            "link": format!("{}/reset?t={}&a=activation", self.config.app_domain, token),
        });

        self.deliver(MailTemplate::Registration, &member, &context)
            .await
    }

    async fn send_forgot_password(&self, notification: &Notification) -> DeliveryStatus {
        let Some(member) = self.load_member(Some(notification.object_uuid)).await else {
            return DeliveryStatus::Failure;
        };

        if self.config.debug {
            return DeliveryStatus::Success;
        }

        let ttl = self.tokens.config().reset_ttl_minutes;
        let token = match self
            .tokens
            .reset_credentials_token(member.member_uuid, ttl)
            .await
        {
            Ok(token) => token,
            Err(e) => {
                error!(error = %e, "Failed to mint reset token");
                return DeliveryStatus::Failure;
            }
        };

        let username = match self.store.find_credentials(member.member_uuid).await {
            Ok(credentials) => credentials.map(|c| c.username).unwrap_or_default(),
            Err(e) => {
                error!(error = %e, "Failed to load credentials");
                return DeliveryStatus::Failure;
            }
        };

        let context = json!({
            "username": username,
            "link": format!(
                "{}/reset?t={}&a=reset&u={}",
                self.config.app_domain, token, username
            ),
        });

        self.deliver(MailTemplate::ForgotPassword, &member, &context)
            .await
    }

    async fn send_event_reminder(
        &self,
        notification: &Notification,
        now: DateTime<Utc>,
    ) -> DeliveryStatus {
        let (event, members) = match self.load_event_and_members(notification, now).await {
            Ok(loaded) => loaded,
            Err(status) => return status,
        };

        if self.config.debug {
            return DeliveryStatus::Success;
        }

        let recipients: Vec<&Member> = members
            .iter()
            .filter(|m| m.subscribed && m.is_active())
            .collect();
        let ttl = self.tokens.config().participation_ttl_minutes;
        let mut failures = 0;

        for member in &recipients {
            let answer = match self
                .store
                .find_participation(event.event_uuid, member.member_uuid)
                .await
            {
                Ok(participation) => participation.map(|p| p.answer).unwrap_or_default(),
                Err(e) => {
                    error!(member_uuid = %member.member_uuid, error = %e, "Failed to load participation");
                    failures += 1;
                    continue;
                }
            };

            let token = match self
                .tokens
                .participate_event_token(member.member_uuid, ttl)
                .await
            {
                Ok(token) => token,
                Err(e) => {
                    error!(member_uuid = %member.member_uuid, error = %e, "Failed to mint participation token");
                    failures += 1;
                    continue;
                }
            };

            let context = json!({
                "event_name": event.name,
                "event_start": format_start(&event),
                "answer": answer,
                "link": format!(
                    "{}/events?a=participate&e={}&u={}&t={}&p=",
                    self.config.app_domain, event.event_uuid, member.member_uuid, token
                ),
            });

            if self
                .deliver(MailTemplate::EventReminder, member, &context)
                .await
                != DeliveryStatus::Success
            {
                failures += 1;
            }
        }

        DeliveryStatus::from_failures(failures, recipients.len())
    }

    async fn send_event_summary(
        &self,
        notification: &Notification,
        now: DateTime<Utc>,
    ) -> DeliveryStatus {
        let (event, members) = match self.load_event_and_members(notification, now).await {
            Ok(loaded) => loaded,
            Err(status) => return status,
        };

        if self.config.debug {
            return DeliveryStatus::Success;
        }

        let mut failures = 0;
        let mut participants: Vec<(String, String, String)> = Vec::with_capacity(members.len());
        for member in &members {
            match self
                .store
                .find_participation(event.event_uuid, member.member_uuid)
                .await
            {
                Ok(participation) => participants.push((
                    participation.map(|p| p.answer).unwrap_or_default(),
                    member.first_name.clone(),
                    member.display_name(),
                )),
                Err(e) => {
                    error!(member_uuid = %member.member_uuid, error = %e, "Failed to load participation");
                    failures += 1;
                }
            }
        }
        // Answered members first, grouped by answer, then by first name.
        participants.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(&b.1)));

        let context = json!({
            "event_name": event.name,
            "event_start": format_start(&event),
            "participants": participants
                .iter()
                .map(|(answer, _, name)| json!({"name": name, "answer": answer}))
                .collect::<Vec<Value>>(),
        });

        let recipients: Vec<&Member> = members
            .iter()
            .filter(|m| m.is_admin() && m.subscribed && m.is_active())
            .collect();
        for admin in &recipients {
            if self
                .deliver(MailTemplate::EventSummary, admin, &context)
                .await
                != DeliveryStatus::Success
            {
                failures += 1;
            }
        }

        DeliveryStatus::from_failures(failures, members.len() + recipients.len())
    }

    async fn load_event_and_members(
        &self,
        notification: &Notification,
        now: DateTime<Utc>,
    ) -> Result<(Event, Vec<Member>), DeliveryStatus> {
        let event = self
            .load_event(notification.object_uuid)
            .await
            .ok_or(DeliveryStatus::Failure)?;

        if event.has_started(now) {
            info!(event_uuid = %event.event_uuid, "Event already started");
            return Err(DeliveryStatus::TooLate);
        }

        let members = self.store.list_members().await.map_err(|e| {
            error!(error = %e, "Failed to list members");
            DeliveryStatus::Failure
        })?;

        Ok((event, members))
    }

    async fn deliver(&self, template: MailTemplate, member: &Member, context: &Value) -> DeliveryStatus {
        match self.mailer.send(template, member, context).await {
            Ok(()) => DeliveryStatus::Success,
            Err(e) => {
                error!(
                    member_uuid = %member.member_uuid,
                    template = template.as_str(),
                    error = %e,
                    "Failed to send email"
                );
                DeliveryStatus::Failure
            }
        }
    }
}

fn format_start(event: &Event) -> String {
    event.start_utc.format("%Y-%m-%d %H:%M UTC").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::JwtConfig;
    use crate::models::MemberType;
    use crate::services::cache::MockTokenCache;
    use crate::services::email::MockMailer;
    use crate::services::memory::InMemoryStore;
    use crate::services::store::{EventStore, MemberStore, NotificationStore};

    fn scheduler_config(debug: bool) -> SchedulerConfig {
        SchedulerConfig {
            debug,
            poll_interval_seconds: 600,
            reminder_before_event_seconds: 172_800,
            summary_before_event_seconds: 86_400,
            app_domain: "https://colla.example".to_string(),
        }
    }

    fn scheduler(
        debug: bool,
    ) -> (NotificationScheduler, Arc<InMemoryStore>, Arc<MockMailer>) {
        let store = Arc::new(InMemoryStore::new());
        let mailer = Arc::new(MockMailer::new());
        let tokens = TokenService::new(
            &JwtConfig {
                access_secret: "a".to_string(),
                refresh_secret: "r".to_string(),
                access_ttl_minutes: 15,
                refresh_ttl_days: 7,
                registration_ttl_minutes: 10080,
                reset_ttl_minutes: 60,
                participation_ttl_minutes: 4320,
            },
            Arc::new(MockTokenCache::new()),
        );
        let scheduler = NotificationScheduler::new(
            store.clone(),
            mailer.clone(),
            tokens,
            scheduler_config(debug),
        );
        (scheduler, store, mailer)
    }

    fn member(first_name: &str, member_type: MemberType) -> Member {
        Member::new(
            first_name.to_string(),
            "Test".to_string(),
            format!("{}@example.com", first_name.to_lowercase()),
            member_type,
            "en".to_string(),
        )
    }

    #[tokio::test]
    async fn forgot_password_mail_carries_reset_link() {
        let (scheduler, store, mailer) = scheduler(false);
        let anna = member("Anna", MemberType::Member);
        store.insert_member(&anna).await.unwrap();
        store
            .create_notification(&NewNotification::due_now(
                NotificationType::ForgotPassword,
                None,
                anna.member_uuid,
            ))
            .await
            .unwrap();

        let outcomes = scheduler.poll_once(Utc::now()).await.unwrap();
        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].1, DeliveryStatus::Success);

        let sent = mailer.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].template, MailTemplate::ForgotPassword);
        let link = sent[0].context["link"].as_str().unwrap();
        assert!(link.starts_with("https://colla.example/reset?t="));
        assert!(link.contains("&a=reset"));
    }

    #[tokio::test]
    async fn started_event_is_too_late() {
        let (scheduler, store, mailer) = scheduler(false);
        let now = Utc::now();
        let event = Event::new(
            "Assaig".to_string(),
            String::new(),
            String::new(),
            now - Duration::hours(1),
            now + Duration::hours(1),
        );
        store.insert_event(&event).await.unwrap();
        let created = store
            .create_notification(&NewNotification {
                notification_type: NotificationType::UpcomingEvent,
                author_uuid: None,
                object_uuid: event.event_uuid,
                send_utc: now,
            })
            .await
            .unwrap();

        let outcomes = scheduler.poll_once(now).await.unwrap();
        assert_eq!(
            outcomes,
            vec![(created.notification_id, DeliveryStatus::TooLate)]
        );
        assert!(mailer.sent().is_empty());
    }

    #[tokio::test]
    async fn reminder_partial_failure() {
        let (scheduler, store, mailer) = scheduler(false);
        let now = Utc::now();
        let anna = member("Anna", MemberType::Member);
        let pere = member("Pere", MemberType::Member);
        let mut quiet = member("Quim", MemberType::Member);
        quiet.subscribed = false;
        for m in [&anna, &pere, &quiet] {
            store.insert_member(m).await.unwrap();
        }
        mailer.fail_for(&pere.email);

        let event = Event::new(
            "Diada".to_string(),
            String::new(),
            String::new(),
            now + Duration::hours(30),
            now + Duration::hours(34),
        );
        store.insert_event(&event).await.unwrap();

        // Generation enqueues the reminder (30h < 48h) but not the summary (30h > 24h).
        let outcomes = scheduler.poll_once(now).await.unwrap();
        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].1, DeliveryStatus::PartialFailure);

        let sent = mailer.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, anna.email);

        // Already generated; nothing new on the next poll.
        assert!(scheduler.poll_once(now).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn summary_goes_to_subscribed_admins() {
        let (scheduler, store, mailer) = scheduler(false);
        let now = Utc::now();
        let admin = member("Marta", MemberType::Admin);
        let anna = member("Anna", MemberType::Member);
        store.insert_member(&admin).await.unwrap();
        store.insert_member(&anna).await.unwrap();

        let event = Event::new(
            "Diada".to_string(),
            String::new(),
            String::new(),
            now + Duration::hours(2),
            now + Duration::hours(4),
        );
        store.insert_event(&event).await.unwrap();

        let outcomes = scheduler.poll_once(now).await.unwrap();
        assert_eq!(outcomes.len(), 2);
        assert!(outcomes.iter().all(|(_, s)| *s == DeliveryStatus::Success));

        let summaries: Vec<_> = mailer
            .sent()
            .into_iter()
            .filter(|s| s.template == MailTemplate::EventSummary)
            .collect();
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].to, admin.email);
        assert_eq!(
            summaries[0].context["participants"].as_array().unwrap().len(),
            2
        );
    }

    #[tokio::test]
    async fn missing_subject_member_fails() {
        let (scheduler, store, _) = scheduler(false);
        let created = store
            .create_notification(&NewNotification::due_now(
                NotificationType::ForgotPassword,
                None,
                Uuid::new_v4(),
            ))
            .await
            .unwrap();

        let outcomes = scheduler.poll_once(Utc::now()).await.unwrap();
        assert_eq!(
            outcomes,
            vec![(created.notification_id, DeliveryStatus::Failure)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn run_stops_on_cancellation() {
        let (scheduler, _, _) = scheduler(true);
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(scheduler.run(shutdown.clone()));

        tokio::time::sleep(std::time::Duration::from_secs(1200)).await;
        shutdown.cancel();
        handle.await.unwrap();
    }
}
