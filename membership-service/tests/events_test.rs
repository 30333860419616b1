//! Event maintenance, participation lists and presence.

mod common;

use axum::http::{Method, StatusCode};
use chrono::{Duration, Utc};
use common::{scheduler_config, TestApp};
use membership_service::{
    models::{Event, MemberType},
    services::{EventStore, InMemoryStore},
};
use serde_json::json;
use uuid::Uuid;

async fn seed_event(store: &InMemoryStore, start_in: Duration) -> Event {
    let start = Utc::now() + start_in;
    let event = Event::new(
        "Diada".to_string(),
        "Actuació de festa major".to_string(),
        "Plaça de la Vila".to_string(),
        start,
        start + Duration::hours(3),
    );
    store.insert_event(&event).await.unwrap();
    event
}

#[tokio::test]
async fn single_event_is_public() {
    let app = TestApp::new();
    let event = seed_event(&app.store, Duration::days(5)).await;

    let (status, body) = app
        .request(
            Method::GET,
            &format!("/api/v1/events/{}", event.event_uuid),
            None,
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["name"], "Diada");
    assert_eq!(body["location_name"], "Plaça de la Vila");

    let (status, _) = app
        .request(
            Method::GET,
            &format!("/api/v1/events/{}", Uuid::new_v4()),
            None,
            None,
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn admins_update_events() {
    let app = TestApp::new();
    app.seed_member("Pau", MemberType::Member).await;
    app.seed_member("Marta", MemberType::Admin).await;
    let (member_token, _) = app.login("pau").await;
    let (admin_token, _) = app.login("marta").await;
    let event = seed_event(&app.store, Duration::days(5)).await;
    let uri = format!("/api/v1/events/{}", event.event_uuid);

    let start = Utc::now() + Duration::days(6);
    let body = json!({
        "name": "Diada (ajornada)",
        "location_name": "Plaça Major",
        "start_date": start,
        "end_date": start + Duration::hours(2),
    });

    let (status, _) = app
        .request(Method::PUT, &uri, Some(&member_token), Some(body.clone()))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, updated) = app
        .request(Method::PUT, &uri, Some(&admin_token), Some(body.clone()))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated["name"], "Diada (ajornada)");

    let stored = app.store.find_event(event.event_uuid).await.unwrap().unwrap();
    assert_eq!(stored.location_name, "Plaça Major");
    assert_eq!(stored.description, "");

    let (status, _) = app
        .request(
            Method::PUT,
            &uri,
            Some(&admin_token),
            Some(json!({
                "name": "Diada",
                "start_date": start,
                "end_date": start - Duration::hours(1),
            })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = app
        .request(
            Method::PUT,
            &format!("/api/v1/events/{}", Uuid::new_v4()),
            Some(&admin_token),
            Some(body),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn deleted_event_is_gone_and_gets_no_reminders() {
    let app = TestApp::new();
    app.seed_member("Marta", MemberType::Admin).await;
    let (admin_token, _) = app.login("marta").await;
    let event = seed_event(&app.store, Duration::hours(12)).await;
    let uri = format!("/api/v1/events/{}", event.event_uuid);

    let (status, _) = app
        .request(Method::DELETE, &uri, Some(&admin_token), None)
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = app.request(Method::GET, &uri, None, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (_, events) = app.request(Method::GET, "/api/v1/events", None, None).await;
    assert!(events.as_array().unwrap().is_empty());

    let (status, _) = app
        .request(
            Method::POST,
            &format!("/api/v1/members/events/{}", event.event_uuid),
            Some(&admin_token),
            Some(json!({ "answer": "yes" })),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let outcomes = app
        .scheduler(scheduler_config())
        .poll_once(Utc::now())
        .await
        .unwrap();
    assert!(outcomes.is_empty());
    assert!(app.mailer.sent().is_empty());

    let (status, _) = app
        .request(Method::DELETE, &uri, Some(&admin_token), None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn participation_list_covers_every_member() {
    let app = TestApp::new();
    let laia = app.seed_member("Laia", MemberType::Member).await;
    app.seed_member("Marta", MemberType::Admin).await;
    app.seed_member("Pau", MemberType::Member).await;
    let (pau_token, _) = app.login("pau").await;
    let (admin_token, _) = app.login("marta").await;
    let event = seed_event(&app.store, Duration::days(5)).await;

    let (status, _) = app
        .request(
            Method::POST,
            &format!("/api/v1/members/events/{}", event.event_uuid),
            Some(&pau_token),
            Some(json!({ "answer": "yes" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = app
        .request(
            Method::POST,
            &format!(
                "/api/v1/events/{}/members/{}",
                event.event_uuid, laia.member_uuid
            ),
            Some(&admin_token),
            Some(json!({ "presence": "no" })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);

    let uri = format!("/api/v1/events/{}/members", event.event_uuid);
    let (status, _) = app.request(Method::GET, &uri, Some(&pau_token), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) = app
        .request(Method::GET, &uri, Some(&admin_token), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    let rows: Vec<(String, String, String)> = body
        .as_array()
        .unwrap()
        .iter()
        .map(|row| {
            (
                row["first_name"].as_str().unwrap().to_string(),
                row["answer"].as_str().unwrap().to_string(),
                row["presence"].as_str().unwrap().to_string(),
            )
        })
        .collect();
    assert_eq!(
        rows,
        vec![
            ("Laia".to_string(), String::new(), "no".to_string()),
            ("Marta".to_string(), String::new(), String::new()),
            ("Pau".to_string(), "yes".to_string(), String::new()),
        ]
    );
}

#[tokio::test]
async fn presence_keeps_the_members_answer() {
    let app = TestApp::new();
    let pau = app.seed_member("Pau", MemberType::Member).await;
    app.seed_member("Marta", MemberType::Admin).await;
    let (pau_token, _) = app.login("pau").await;
    let (admin_token, _) = app.login("marta").await;
    let event = seed_event(&app.store, Duration::days(5)).await;
    let presence_uri = format!(
        "/api/v1/events/{}/members/{}",
        event.event_uuid, pau.member_uuid
    );

    app.request(
        Method::POST,
        &format!("/api/v1/members/events/{}", event.event_uuid),
        Some(&pau_token),
        Some(json!({ "answer": "maybe" })),
    )
    .await;

    let (status, body) = app
        .request(
            Method::POST,
            &presence_uri,
            Some(&admin_token),
            Some(json!({ "presence": "yes" })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["answer"], "maybe");
    assert_eq!(body["presence"], "yes");

    // Answering again does not clear the presence.
    let (_, body) = app
        .request(
            Method::POST,
            &format!("/api/v1/members/events/{}", event.event_uuid),
            Some(&pau_token),
            Some(json!({ "answer": "no" })),
        )
        .await;
    assert_eq!(body["answer"], "no");
    assert_eq!(body["presence"], "yes");

    let (status, body) = app
        .request(
            Method::POST,
            &presence_uri,
            Some(&admin_token),
            Some(json!({ "presence": "" })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["presence"], "");
}

#[tokio::test]
async fn presence_rejects_unknown_values_and_targets() {
    let app = TestApp::new();
    let pau = app.seed_member("Pau", MemberType::Member).await;
    app.seed_member("Marta", MemberType::Admin).await;
    let (pau_token, _) = app.login("pau").await;
    let (admin_token, _) = app.login("marta").await;
    let event = seed_event(&app.store, Duration::days(5)).await;
    let presence_uri = format!(
        "/api/v1/events/{}/members/{}",
        event.event_uuid, pau.member_uuid
    );

    let (status, _) = app
        .request(
            Method::POST,
            &presence_uri,
            Some(&pau_token),
            Some(json!({ "presence": "yes" })),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = app
        .request(
            Method::POST,
            &presence_uri,
            Some(&admin_token),
            Some(json!({ "presence": "maybe" })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = app
        .request(
            Method::POST,
            &format!(
                "/api/v1/events/{}/members/{}",
                event.event_uuid,
                Uuid::new_v4()
            ),
            Some(&admin_token),
            Some(json!({ "presence": "yes" })),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    assert!(app
        .store
        .find_participation(event.event_uuid, pau.member_uuid)
        .await
        .unwrap()
        .is_none());
}
