//! Ingress endpoint tests: signature enforcement, enqueue side effects,
//! health reporting. Runs against the test database.

use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use tower::ServiceExt;

use inflow_api::{router, sign, AppState};
use inflow_core::{Config, EnvelopeState, QueueRepository, Source};
use inflow_db::test_fixtures::{test_db, unique_id};

const TEAMWORK_SECRET: &str = "tw-test-secret";

async fn test_state() -> AppState {
    let db = Arc::new(test_db().await);
    let config = Config::from_lookup(|key| match key {
        "TEAMWORK_BASE_URL" => Some("https://acme.teamwork.com".to_string()),
        "TEAMWORK_API_KEY" => Some("twp_key".to_string()),
        "TEAMWORK_WEBHOOK_SECRET" => Some(TEAMWORK_SECRET.to_string()),
        "MISSIVE_API_TOKEN" => Some("mv_token".to_string()),
        "DB_DSN" => Some("postgres://unused".to_string()),
        _ => None,
    });
    AppState::new(db, Arc::new(config))
}

fn teamwork_request(body: &str, signature: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/webhook/teamwork")
        .header("content-type", "application/x-www-form-urlencoded");
    if let Some(signature) = signature {
        builder = builder.header("x-teamwork-signature", signature);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

#[tokio::test]
async fn test_signed_teamwork_webhook_enqueues() {
    let state = test_state().await;
    let db = state.db.clone();
    let app = router(state);

    let task_id = unique_id("wh");
    let body = format!("Event=TASK.UPDATED&Task.ID={task_id}");
    let signature = sign(TEAMWORK_SECRET, body.as_bytes());

    let response = app
        .oneshot(teamwork_request(&body, Some(&signature)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let pending = db
        .queue
        .list(EnvelopeState::Pending, Some(Source::Teamwork), 1000)
        .await
        .unwrap();
    assert!(pending.iter().any(|e| e.external_id == task_id));
}

#[tokio::test]
async fn test_tampered_signature_rejected_without_enqueue() {
    let state = test_state().await;
    let db = state.db.clone();
    let app = router(state);

    let task_id = unique_id("bad-sig");
    let body = format!("Event=TASK.UPDATED&Task.ID={task_id}");
    let mut signature = sign(TEAMWORK_SECRET, body.as_bytes()).into_bytes();
    signature[0] = if signature[0] == b'0' { b'1' } else { b'0' };
    let tampered = String::from_utf8(signature).unwrap();

    let response = app
        .oneshot(teamwork_request(&body, Some(&tampered)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let pending = db
        .queue
        .list(EnvelopeState::Pending, Some(Source::Teamwork), 1000)
        .await
        .unwrap();
    assert!(!pending.iter().any(|e| e.external_id == task_id));
}

#[tokio::test]
async fn test_missing_signature_rejected_when_secret_configured() {
    let app = router(test_state().await);
    let response = app
        .oneshot(teamwork_request("Event=TASK.UPDATED&Task.ID=1", None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_unsigned_source_accepted_without_secret() {
    // No MISSIVE_WEBHOOK_SECRET configured: verification is skipped.
    let state = test_state().await;
    let db = state.db.clone();
    let app = router(state);

    let conversation_id = unique_id("conv");
    let body = serde_json::json!({
        "event": "incoming_email",
        "conversation": {"id": conversation_id.clone()}
    });
    let request = Request::builder()
        .method("POST")
        .uri("/webhook/missive")
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let pending = db
        .queue
        .list(EnvelopeState::Pending, Some(Source::Missive), 1000)
        .await
        .unwrap();
    assert!(pending.iter().any(|e| e.external_id == conversation_id));
}

#[tokio::test]
async fn test_duplicate_webhook_is_success() {
    let state = test_state().await;
    let app = router(state);

    let task_id = unique_id("dup-wh");
    let body = format!("Event=TASK.UPDATED&Task.ID={task_id}");
    let signature = sign(TEAMWORK_SECRET, body.as_bytes());

    for _ in 0..3 {
        let response = app
            .clone()
            .oneshot(teamwork_request(&body, Some(&signature)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}

#[tokio::test]
async fn test_unknown_source_is_404() {
    let app = router(test_state().await);
    let request = Request::builder()
        .method("POST")
        .uri("/webhook/github")
        .body(Body::from("{}"))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_craft_webhook_rejected() {
    let app = router(test_state().await);
    let request = Request::builder()
        .method("POST")
        .uri("/webhook/craft")
        .body(Body::from("{}"))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_health_reports_queue_and_db() {
    let app = router(test_state().await);
    let request = Request::builder()
        .method("GET")
        .uri("/health")
        .body(Body::empty())
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let health: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(health["status"], "healthy");
    assert_eq!(health["db_ok"], true);
    assert!(health["queue_depth"].is_i64() || health["queue_depth"].is_u64());
    assert!(health["failed"].is_i64() || health["failed"].is_u64());
    assert!(health["timestamp"].is_string());
}
