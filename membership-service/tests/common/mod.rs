#![allow(dead_code)]

use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use membership_service::{
    build_router,
    config::{JwtConfig, SchedulerConfig},
    models::{Member, MemberType},
    services::{InMemoryStore, MemberStore, MockMailer, MockTokenCache},
    workers::NotificationScheduler,
    AppState,
};
use serde_json::Value;
use std::sync::Arc;
use tower::util::ServiceExt;

pub const PASSWORD: &str = "castell-de-9";

pub fn jwt_config() -> JwtConfig {
    JwtConfig {
        access_secret: "test-access-secret".to_string(),
        refresh_secret: "test-refresh-secret".to_string(),
        access_ttl_minutes: 15,
        refresh_ttl_days: 7,
        registration_ttl_minutes: 10080,
        reset_ttl_minutes: 60,
        participation_ttl_minutes: 4320,
    }
}

pub fn scheduler_config() -> SchedulerConfig {
    SchedulerConfig {
        debug: false,
        poll_interval_seconds: 60,
        reminder_before_event_seconds: 3 * 24 * 3600,
        summary_before_event_seconds: 24 * 3600,
        app_domain: "https://colla.example.org".to_string(),
    }
}

pub struct TestApp {
    pub store: Arc<InMemoryStore>,
    pub cache: Arc<MockTokenCache>,
    pub mailer: Arc<MockMailer>,
    pub state: AppState,
    pub router: Router,
}

impl TestApp {
    pub fn new() -> Self {
        let store = Arc::new(InMemoryStore::new());
        let cache = Arc::new(MockTokenCache::new());
        let mailer = Arc::new(MockMailer::new());
        let state = AppState::new(store.clone(), cache.clone(), mailer.clone(), &jwt_config());
        let router = build_router(state.clone(), &["http://localhost:3000".to_string()]);

        Self {
            store,
            cache,
            mailer,
            state,
            router,
        }
    }

    pub fn scheduler(&self, config: SchedulerConfig) -> NotificationScheduler {
        NotificationScheduler::new(
            self.store.clone(),
            self.mailer.clone(),
            self.state.tokens.clone(),
            config,
        )
    }

    /// Insert a member with login credentials `username` / `PASSWORD`.
    pub async fn seed_member(&self, first_name: &str, member_type: MemberType) -> Member {
        let username = first_name.to_lowercase();
        let member = Member::new(
            first_name.to_string(),
            "Test".to_string(),
            format!("{}@example.com", username),
            member_type,
            "cat".to_string(),
        );
        self.store
            .insert_member(&member)
            .await
            .expect("Failed to insert member");
        self.state
            .auth
            .set_credentials(
                member.member_uuid,
                &username,
                &membership_service::utils::Password::new(PASSWORD.to_string()),
            )
            .await
            .expect("Failed to set credentials");
        member
    }

    /// Log in through the API and return `(access_token, refresh_token)`.
    pub async fn login(&self, username: &str) -> (String, String) {
        let (status, body) = self
            .request(
                Method::POST,
                "/api/v1/login",
                None,
                Some(serde_json::json!({ "username": username, "password": PASSWORD })),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "login failed: {}", body);
        (
            body["access_token"].as_str().unwrap().to_string(),
            body["refresh_token"].as_str().unwrap().to_string(),
        )
    }

    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, body)
    }
}
