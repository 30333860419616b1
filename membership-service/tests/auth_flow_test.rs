//! End-to-end session tests: login, refresh, logout and credential resets.

mod common;

use axum::http::{Method, StatusCode};
use common::{TestApp, PASSWORD};
use membership_service::{
    models::{permission, MemberType, NotificationType, PermissionSet},
    services::AuthError,
};
use serde_json::json;

// ============================================================================
// Login
// ============================================================================

#[tokio::test]
async fn login_embeds_role_permissions() {
    let app = TestApp::new();
    let member = app.seed_member("Pau", MemberType::Member).await;
    let admin = app.seed_member("Marta", MemberType::Admin).await;

    let (access, refresh) = app.login("pau").await;
    assert!(!refresh.is_empty());
    let claims = app.state.tokens.verify_access(&access).await.unwrap();
    assert_eq!(claims.user_uuid, member.member_uuid);
    assert_eq!(
        claims.permissions,
        PermissionSet::from_iter([permission::MEMBER])
    );

    let (access, _) = app.login("marta").await;
    let claims = app.state.tokens.verify_access(&access).await.unwrap();
    assert_eq!(claims.user_uuid, admin.member_uuid);
    assert_eq!(
        claims.permissions,
        PermissionSet::from_iter([permission::MEMBER, permission::ADMIN])
    );
}

#[tokio::test]
async fn login_with_wrong_password_is_rejected() {
    let app = TestApp::new();
    app.seed_member("Pau", MemberType::Member).await;

    let (status, body) = app
        .request(
            Method::POST,
            "/api/v1/login",
            None,
            Some(json!({ "username": "pau", "password": "not-the-password" })),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "Invalid credentials");
}

#[tokio::test]
async fn login_with_empty_fields_fails_validation() {
    let app = TestApp::new();
    let (status, _) = app
        .request(
            Method::POST,
            "/api/v1/login",
            None,
            Some(json!({ "username": "", "password": "" })),
        )
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}

// ============================================================================
// Refresh
// ============================================================================

#[tokio::test]
async fn refresh_token_is_single_use() {
    let app = TestApp::new();
    let member = app.seed_member("Pau", MemberType::Member).await;
    let (access, refresh) = app.login("pau").await;

    let (status, body) = app
        .request(
            Method::POST,
            "/api/v1/refresh",
            None,
            Some(json!({ "refresh_token": refresh })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    let renewed = body["access_token"].as_str().unwrap();
    assert!(app.state.tokens.verify_access(renewed).await.is_ok());

    let (status, body) = app
        .request(
            Method::POST,
            "/api/v1/refresh",
            None,
            Some(json!({ "refresh_token": refresh })),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "You are not authorized to perform this action.");

    // Refreshing does not revoke the access token it was issued with.
    let (status, _) = app
        .request(
            Method::GET,
            &format!("/api/v1/members/{}", member.member_uuid),
            Some(&access),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn access_token_is_not_a_refresh_token() {
    let app = TestApp::new();
    app.seed_member("Pau", MemberType::Member).await;
    let (access, _) = app.login("pau").await;

    let (status, _) = app
        .request(
            Method::POST,
            "/api/v1/refresh",
            None,
            Some(json!({ "refresh_token": access })),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

// ============================================================================
// Logout
// ============================================================================

#[tokio::test]
async fn logout_revokes_both_tokens() {
    let app = TestApp::new();
    let member = app.seed_member("Pau", MemberType::Member).await;
    let (access, refresh) = app.login("pau").await;

    let (status, _) = app
        .request(Method::POST, "/api/v1/logout", Some(&access), None)
        .await;
    assert_eq!(status, StatusCode::ACCEPTED);

    let (status, _) = app
        .request(
            Method::GET,
            &format!("/api/v1/members/{}", member.member_uuid),
            Some(&access),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = app
        .request(
            Method::POST,
            "/api/v1/refresh",
            None,
            Some(json!({ "refresh_token": refresh })),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = app
        .request(Method::POST, "/api/v1/logout", Some(&access), None)
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(app.cache.is_empty());
}

#[tokio::test]
async fn logout_without_token_is_rejected() {
    let app = TestApp::new();
    let (status, _) = app.request(Method::POST, "/api/v1/logout", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

// ============================================================================
// Expiry
// ============================================================================

#[tokio::test]
async fn zero_lifetime_token_is_expired() {
    let app = TestApp::new();
    let member = app.seed_member("Pau", MemberType::Member).await;

    let pair = app
        .state
        .tokens
        .create_token(
            member.member_uuid,
            &PermissionSet::from_iter([permission::MEMBER]),
            0,
            0,
        )
        .await
        .unwrap();
    assert!(pair.refresh_token.is_none());

    let err = app
        .state
        .tokens
        .verify_access(&pair.access_token)
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::Expired));

    let (status, body) = app
        .request(
            Method::GET,
            &format!("/api/v1/members/{}", member.member_uuid),
            Some(&pair.access_token),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "Token expired");
}

// ============================================================================
// Credentials
// ============================================================================

#[tokio::test]
async fn forgot_password_does_not_reveal_unknown_emails() {
    let app = TestApp::new();
    let member = app.seed_member("Pau", MemberType::Member).await;

    let (status, _) = app
        .request(
            Method::POST,
            "/api/v1/forgot_password",
            None,
            Some(json!({ "email": "nobody@example.com" })),
        )
        .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert!(app.store.notifications().unwrap().is_empty());

    let (status, _) = app
        .request(
            Method::POST,
            "/api/v1/forgot_password",
            None,
            Some(json!({ "email": "pau@example.com" })),
        )
        .await;
    assert_eq!(status, StatusCode::ACCEPTED);

    let notifications = app.store.notifications().unwrap();
    assert_eq!(notifications.len(), 1);
    assert_eq!(
        notifications[0].notification_type(),
        Some(NotificationType::ForgotPassword)
    );
    assert_eq!(notifications[0].object_uuid, member.member_uuid);
    assert_eq!(notifications[0].author_uuid, None);
}

#[tokio::test]
async fn reset_credentials_token_works_once() {
    let app = TestApp::new();
    let member = app.seed_member("Pau", MemberType::Member).await;
    let token = app
        .state
        .tokens
        .reset_credentials_token(member.member_uuid, 60)
        .await
        .unwrap();

    let body = json!({ "username": "pau.nou", "password": "a-new-password" });
    let (status, _) = app
        .request(
            Method::POST,
            "/api/v1/reset_credentials",
            Some(&token),
            Some(body.clone()),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = app
        .request(
            Method::POST,
            "/api/v1/login",
            None,
            Some(json!({ "username": "pau.nou", "password": "a-new-password" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = app
        .request(
            Method::POST,
            "/api/v1/reset_credentials",
            Some(&token),
            Some(body),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn change_password_keeps_the_stored_username() {
    let app = TestApp::new();
    app.seed_member("Pau", MemberType::Member).await;
    let (access, _) = app.login("pau").await;

    let (status, _) = app
        .request(
            Method::POST,
            "/api/v1/change_password",
            Some(&access),
            Some(json!({ "password": "another-password" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = app
        .request(
            Method::POST,
            "/api/v1/login",
            None,
            Some(json!({ "username": "pau", "password": PASSWORD })),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = app
        .request(
            Method::POST,
            "/api/v1/login",
            None,
            Some(json!({ "username": "pau", "password": "another-password" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn username_taken_by_another_member_conflicts() {
    let app = TestApp::new();
    app.seed_member("Pau", MemberType::Member).await;
    app.seed_member("Laia", MemberType::Member).await;
    let (access, _) = app.login("laia").await;

    let (status, _) = app
        .request(
            Method::POST,
            "/api/v1/change_password",
            Some(&access),
            Some(json!({ "username": "pau", "password": "another-password" })),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
}
