use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

use authgate::comms::local_api::{create_router, AppState};
use authgate::config::Config;
use authgate::security::identity::Role;
use authgate::security::rate_limit::RatePolicy;

const TEST_KEY: &str = "rate-limit-test-key";

fn policy(name: &str, window_secs: u64, max_requests: u32) -> RatePolicy {
    RatePolicy {
        name: name.to_string(),
        window_secs,
        max_requests,
    }
}

// Every policy the router references must exist; tests tighten the ones
// under scrutiny and relax the rest.
fn config_with(policies: Vec<RatePolicy>) -> Config {
    Config {
        rate_policies: policies,
        ..Config::default()
    }
}

async fn app_with(policies: Vec<RatePolicy>) -> Router {
    let state = Arc::new(AppState::new(
        Arc::new(config_with(policies)),
        TEST_KEY.as_bytes().to_vec(),
    ));
    state
        .directory
        .register("alice", "wonder-land", Role::User)
        .await
        .unwrap();
    create_router(state)
}

async fn send(
    app: &Router,
    method: &str,
    uri: &str,
    body: Option<Value>,
    headers: &[(&str, &str)],
) -> (StatusCode, Value, Option<String>) {
    let mut builder = Request::builder().method(method).uri(uri);
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }
    let request = match body {
        Some(json_body) => builder
            .header("content-type", "application/json")
            .body(Body::from(json_body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let retry_after = response
        .headers()
        .get(header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string());
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, value, retry_after)
}

fn login_body(password: &str) -> Value {
    json!({"username": "alice", "password": password})
}

#[tokio::test]
async fn test_auth_policy_throttles_login_attempts() {
    let app = app_with(vec![
        policy("api", 900, 100),
        policy("auth", 900, 3),
        policy("external", 900, 30),
        policy("create", 900, 20),
    ])
    .await;

    // Two failed logins on top of nothing: both admitted, both rejected
    // for bad credentials.
    for _ in 0..2 {
        let (status, body, _) =
            send(&app, "POST", "/auth/login", Some(login_body("wrong")), &[]).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["kind"], "invalid_credentials");
    }

    // Third attempt fills the window; the fourth is the first rejected.
    let (status, _, _) = send(&app, "POST", "/auth/login", Some(login_body("wrong")), &[]).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body, retry_after) =
        send(&app, "POST", "/auth/login", Some(login_body("wrong")), &[]).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body["kind"], "rate_limited");
    let hint = body["retry_after_secs"].as_u64().unwrap();
    assert!(hint >= 1 && hint <= 900);
    assert_eq!(retry_after.unwrap(), hint.to_string());

    // A correct password on the next attempt must not discard the previous
    // failures; the limiter counts every attempt in the window.
    let (status, body, _) =
        send(&app, "POST", "/auth/login", Some(login_body("wonder-land")), &[]).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body["kind"], "rate_limited");
}

#[tokio::test]
async fn test_client_keys_are_independent() {
    let app = app_with(vec![
        policy("api", 900, 100),
        policy("auth", 900, 1),
        policy("external", 900, 30),
        policy("create", 900, 20),
    ])
    .await;

    let from_a = [("x-forwarded-for", "9.9.9.9")];
    let from_a_chained = [("x-forwarded-for", "9.9.9.9, 10.0.0.1")];
    let from_b = [("x-forwarded-for", "8.8.8.8")];

    let (status, _, _) =
        send(&app, "POST", "/auth/login", Some(login_body("wrong")), &from_a).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    // Only the first hop of the forwarded chain identifies the client, so
    // the chained variant lands on the exhausted key.
    let (status, _, _) = send(
        &app,
        "POST",
        "/auth/login",
        Some(login_body("wrong")),
        &from_a_chained,
    )
    .await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);

    // A different client is unaffected.
    let (status, _, _) =
        send(&app, "POST", "/auth/login", Some(login_body("wrong")), &from_b).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_policies_are_independent() {
    let app = app_with(vec![
        policy("api", 900, 100),
        policy("auth", 900, 100),
        policy("external", 900, 30),
        policy("create", 900, 1),
    ])
    .await;

    let (status, body, _) = send(
        &app,
        "POST",
        "/auth/login",
        Some(login_body("wonder-land")),
        &[],
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let auth_header = format!("Bearer {}", body["token"].as_str().unwrap());
    let with_token = [("authorization", auth_header.as_str())];

    let place = json!({"name": "home", "latitude": 1.0, "longitude": 2.0});
    let (status, _, _) = send(
        &app,
        "POST",
        "/api/v1/places",
        Some(place.clone()),
        &with_token,
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    // The create window is exhausted...
    let (status, body, _) =
        send(&app, "POST", "/api/v1/places", Some(place), &with_token).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body["kind"], "rate_limited");

    // ...while reads under the api policy keep flowing.
    let (status, _, _) = send(&app, "GET", "/api/v1/places", None, &with_token).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_new_window_opens_after_expiry() {
    let app = app_with(vec![
        policy("api", 900, 100),
        policy("auth", 1, 1),
        policy("external", 900, 30),
        policy("create", 900, 20),
    ])
    .await;

    let (status, _, _) = send(&app, "POST", "/auth/login", Some(login_body("wrong")), &[]).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _, _) = send(&app, "POST", "/auth/login", Some(login_body("wrong")), &[]).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);

    tokio::time::sleep(Duration::from_millis(1100)).await;

    let (status, _, _) = send(&app, "POST", "/auth/login", Some(login_body("wrong")), &[]).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_retry_hint_shrinks_while_retrying() {
    let app = app_with(vec![
        policy("api", 900, 100),
        policy("auth", 5, 1),
        policy("external", 900, 30),
        policy("create", 900, 20),
    ])
    .await;

    let (status, _, _) = send(&app, "POST", "/auth/login", Some(login_body("wrong")), &[]).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (_, body, _) = send(&app, "POST", "/auth/login", Some(login_body("wrong")), &[]).await;
    let first = body["retry_after_secs"].as_u64().unwrap();

    tokio::time::sleep(Duration::from_millis(1200)).await;

    let (status, body, _) =
        send(&app, "POST", "/auth/login", Some(login_body("wrong")), &[]).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    let second = body["retry_after_secs"].as_u64().unwrap();

    assert!(
        second < first,
        "hint must shrink as the window ages: first={first} second={second}"
    );
}

#[tokio::test]
async fn test_anonymous_hammering_is_throttled_before_auth() {
    let app = app_with(vec![
        policy("api", 900, 2),
        policy("auth", 900, 100),
        policy("external", 900, 30),
        policy("create", 900, 20),
    ])
    .await;

    // Anonymous requests burn the window and get 401s...
    for _ in 0..2 {
        let (status, _, _) = send(&app, "GET", "/api/v1/places", None, &[]).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    // ...until the limiter cuts in ahead of the authentication check.
    let (status, body, _) = send(&app, "GET", "/api/v1/places", None, &[]).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body["kind"], "rate_limited");
}
