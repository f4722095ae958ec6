mod common;

use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Request, StatusCode, header},
};
use common::*;
use meetup_backend::{AppState, create_router, utils::generate_token};
use serde_json::{Value, json};
use tower::ServiceExt;

fn app(h: &Harness) -> Router {
    create_router(AppState::new(h.config.clone(), h.ledger.clone()))
}

fn bearer(h: &Harness, user_id: &str) -> String {
    let (token, _) = generate_token(user_id, &h.config).unwrap();
    format!("Bearer {}", token)
}

async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

fn post(uri: &str, auth: Option<&str>, body: Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(auth) = auth {
        builder = builder.header(header::AUTHORIZATION, auth);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

#[tokio::test]
async fn requests_without_token_are_rejected() {
    let h = harness();
    let router = app(&h);

    let (status, body) = send(
        &router,
        post("/api/groups/match", None, json!({ "latitude": 52.52, "longitude": 13.405 })),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], 1002);
}

#[tokio::test]
async fn match_creates_then_joins() {
    let h = harness();
    let router = app(&h);
    let alice = bearer(&h, "alice");
    let bob = bearer(&h, "bob");

    let (status, body) = send(
        &router,
        post(
            "/api/groups/match",
            Some(&alice),
            json!({ "latitude": 52.52, "longitude": 13.405 }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["code"], 0);
    assert_eq!(body["resp_data"]["created"], true);
    assert_eq!(body["resp_data"]["confidence"], "high");
    let group_id = body["resp_data"]["group"]["group_id"]
        .as_str()
        .unwrap()
        .to_string();

    let (status, body) = send(
        &router,
        post(
            "/api/groups/match",
            Some(&bob),
            json!({ "location_name": "near Alexanderplatz" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["resp_data"]["confidence"], "medium");
    assert_eq!(body["resp_data"]["group"]["group_id"], group_id.as_str());
    assert_eq!(body["resp_data"]["group"]["current_count"], 2);

    let request = Request::builder()
        .uri(format!("/api/groups/by-id?group_id={}", group_id))
        .header(header::AUTHORIZATION, &alice)
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(&router, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["resp_data"]["members"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn half_coordinates_are_a_validation_error() {
    let h = harness();
    let router = app(&h);
    let alice = bearer(&h, "alice");

    let (status, body) = send(
        &router,
        post("/api/groups/match", Some(&alice), json!({ "latitude": 52.52 })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], 1000);
}

#[tokio::test]
async fn second_match_conflicts() {
    let h = harness();
    let router = app(&h);
    let alice = bearer(&h, "alice");
    let request = || {
        post(
            "/api/groups/match",
            Some(&alice),
            json!({ "latitude": 52.52, "longitude": 13.405 }),
        )
    };

    send(&router, request()).await;
    let (status, body) = send(&router, request()).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], 1006);
}

#[tokio::test]
async fn keep_alive_and_leave() {
    let h = harness();
    let router = app(&h);
    let alice = bearer(&h, "alice");
    let group_id = h.group_founded_by("alice").await;

    let (status, body) = send(
        &router,
        post("/api/groups/keep-alive", Some(&alice), json!({ "group_id": group_id })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["resp_data"]["last_active_time"].is_string());

    let (status, body) = send(
        &router,
        post("/api/groups/leave", Some(&alice), json!({ "group_id": group_id })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["resp_data"]["cancelled"], true);
    assert_eq!(body["resp_data"]["group"]["status"], "cancelled");

    let (status, _) = send(
        &router,
        post("/api/groups/leave", Some(&alice), json!({ "group_id": group_id })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
