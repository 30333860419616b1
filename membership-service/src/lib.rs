pub mod config;
pub mod dtos;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;
pub mod utils;
pub mod workers;

use axum::{
    extract::State,
    http::{header, HeaderValue, Method},
    middleware::{from_fn, from_fn_with_state},
    routing::{delete, get, post, put},
    Json, Router,
};
use service_core::error::AppError;
use service_core::middleware::{request_id_middleware, security_headers_middleware};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use utoipa::{
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    Modify, OpenApi,
};

use crate::config::JwtConfig;
use crate::middleware::{metrics_middleware, permission_gate, GateState};
use crate::models::permission;
use crate::services::{AuthService, Mailer, Store, TokenCache, TokenService};

#[derive(OpenApi)]
#[openapi(
    paths(
        health_check,
        handlers::initialize::initialize,
        handlers::initialize::is_initialized,
        handlers::auth::login,
        handlers::auth::refresh,
        handlers::auth::logout,
        handlers::auth::forgot_password,
        handlers::auth::reset_credentials,
        handlers::auth::change_password,
        handlers::members::list_members,
        handlers::members::create_member,
        handlers::members::get_member,
        handlers::members::update_member,
        handlers::members::delete_member,
        handlers::members::resend_registration,
        handlers::events::list_events,
        handlers::events::get_event,
        handlers::events::create_event,
        handlers::events::update_event,
        handlers::events::delete_event,
        handlers::events::participate,
        handlers::events::list_participants,
        handlers::events::record_presence,
    ),
    components(
        schemas(
            dtos::ErrorResponse,
            dtos::MessageResponse,
            dtos::auth::LoginRequest,
            dtos::auth::RefreshRequest,
            dtos::auth::TokenResponse,
            dtos::auth::ForgotPasswordRequest,
            dtos::auth::CredentialsRequest,
            dtos::members::InitializeRequest,
            dtos::members::CreateMemberRequest,
            dtos::members::UpdateMemberRequest,
            dtos::members::MemberTypeRequest,
            dtos::events::EventRequest,
            dtos::events::ParticipationRequest,
            dtos::events::ParticipationAnswer,
            dtos::events::ParticipationResponse,
            dtos::events::PresenceRequest,
            dtos::events::PresenceAnswer,
            dtos::events::EventParticipantResponse,
            models::MemberResponse,
            models::EventResponse,
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "Authentication", description = "Login, token renewal and credentials"),
        (name = "Members", description = "Member management"),
        (name = "Events", description = "Events and participation"),
        (name = "Observability", description = "Service health and monitoring"),
    )
)]
pub struct ApiDoc;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub cache: Arc<dyn TokenCache>,
    pub mailer: Arc<dyn Mailer>,
    pub tokens: TokenService,
    pub auth: AuthService,
}

impl AppState {
    pub fn new(
        store: Arc<dyn Store>,
        cache: Arc<dyn TokenCache>,
        mailer: Arc<dyn Mailer>,
        jwt: &JwtConfig,
    ) -> Self {
        let tokens = TokenService::new(jwt, cache.clone());
        let auth = AuthService::new(store.clone(), tokens.clone());
        Self {
            store,
            cache,
            mailer,
            tokens,
            auth,
        }
    }
}

/// Wrap every route of `router` in a permission gate accepting any of
/// `required`.
fn gated(router: Router<AppState>, state: &AppState, required: &[&str]) -> Router<AppState> {
    router.route_layer(from_fn_with_state(
        GateState::new(state, required),
        permission_gate,
    ))
}

fn api_routes(state: &AppState) -> Router<AppState> {
    let public = Router::new()
        .route(
            "/initialize",
            get(handlers::initialize::is_initialized).post(handlers::initialize::initialize),
        )
        .route("/login", post(handlers::auth::login))
        .route("/refresh", post(handlers::auth::refresh))
        .route("/forgot_password", post(handlers::auth::forgot_password))
        .route("/events", get(handlers::events::list_events))
        .route("/events/:event_uuid", get(handlers::events::get_event));

    let member = gated(
        Router::new()
            .route("/logout", post(handlers::auth::logout))
            .route("/change_password", post(handlers::auth::change_password))
            .route(
                "/members/:member_uuid",
                get(handlers::members::get_member).put(handlers::members::update_member),
            ),
        state,
        &[permission::MEMBER],
    );

    let reset = gated(
        Router::new().route("/reset_credentials", post(handlers::auth::reset_credentials)),
        state,
        &[permission::RESET_CREDENTIALS],
    );

    let participation = gated(
        Router::new().route(
            "/members/events/:event_uuid",
            post(handlers::events::participate),
        ),
        state,
        &[permission::MEMBER, permission::PARTICIPATE_EVENT],
    );

    let admin = gated(
        Router::new()
            .route(
                "/members",
                get(handlers::members::list_members).post(handlers::members::create_member),
            )
            .route(
                "/members/:member_uuid",
                delete(handlers::members::delete_member),
            )
            .route(
                "/members/:member_uuid/registration",
                get(handlers::members::resend_registration),
            )
            .route("/events", post(handlers::events::create_event))
            .route(
                "/events/:event_uuid",
                put(handlers::events::update_event).delete(handlers::events::delete_event),
            )
            .route(
                "/events/:event_uuid/members",
                get(handlers::events::list_participants),
            )
            .route(
                "/events/:event_uuid/members/:member_uuid",
                post(handlers::events::record_presence),
            ),
        state,
        &[permission::ADMIN],
    );

    public
        .merge(member)
        .merge(reset)
        .merge(participation)
        .merge(admin)
}

fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::error!(origin = %origin, error = %e, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
}

pub fn build_router(state: AppState, allowed_origins: &[String]) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(handlers::metrics::metrics))
        .route(
            "/.well-known/openapi.json",
            get(|| async { Json(ApiDoc::openapi()) }),
        )
        .nest("/api/v1", api_routes(&state))
        .with_state(state)
        .layer(from_fn(metrics_middleware))
        .layer(TraceLayer::new_for_http().make_span_with(
            |request: &axum::http::Request<_>| {
                let request_id = request
                    .headers()
                    .get(service_core::middleware::REQUEST_ID_HEADER)
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or("-");

                tracing::info_span!(
                    "http_request",
                    request_id = %request_id,
                    method = %request.method(),
                    uri = %request.uri(),
                )
            },
        ))
        .layer(from_fn(request_id_middleware))
        .layer(from_fn(security_headers_middleware))
        .layer(cors_layer(allowed_origins))
}

/// Service health check
#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service is healthy"),
        (status = 503, description = "A dependency is down")
    ),
    tag = "Observability"
)]
pub async fn health_check(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, AppError> {
    state.store.health_check().await.map_err(|e| {
        tracing::error!(error = %e, "Database health check failed");
        AppError::ServiceUnavailable
    })?;

    state.cache.health_check().await.map_err(|e| {
        tracing::error!(error = %e, "Token cache health check failed");
        AppError::ServiceUnavailable
    })?;

    Ok(Json(serde_json::json!({
        "status": "healthy",
        "service": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "checks": {
            "database": "up",
            "cache": "up"
        }
    })))
}
