//! HTTP ingress: webhook endpoints and health reporting.
//!
//! Webhook handlers do the minimum on the hot path: read the raw body,
//! check the signature, derive an envelope, enqueue. No upstream calls, no
//! writes beyond the single queue insert.

use std::sync::Arc;
use std::time::Instant;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use inflow_core::{Config, QueueRepository, Source};
use inflow_db::Database;

use crate::ingest::parse_webhook;
use crate::signature::verify_signature;

/// Shared state behind the router.
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<Database>,
    pub config: Arc<Config>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(db: Arc<Database>, config: Arc<Config>) -> Self {
        Self {
            db,
            config,
            started_at: Instant::now(),
        }
    }
}

/// Build the ingress router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/webhook/:source", post(handle_webhook))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn handle_webhook(
    State(state): State<AppState>,
    Path(source): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    let Ok(source) = source.parse::<Source>() else {
        return (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({"error": "unknown source"})),
        );
    };

    let secret = match source {
        Source::Teamwork => state.config.teamwork.webhook_secret.as_deref(),
        Source::Missive => state.config.missive.webhook_secret.as_deref(),
        Source::Craft => None,
    };

    if let Some(secret) = secret {
        let signature = signature_header(&headers, source);
        let verified = signature
            .map(|sig| verify_signature(secret, &body, sig))
            .unwrap_or(false);
        if !verified {
            // Log only the header prefix; the full value is attacker input.
            warn!(
                subsystem = "api",
                source = %source,
                op = "webhook",
                signature_prefix = signature.map(|s| &s[..s.len().min(12)]).unwrap_or("(missing)"),
                "Webhook signature rejected"
            );
            return (
                StatusCode::UNAUTHORIZED,
                Json(serde_json::json!({"error": "invalid signature"})),
            );
        }
    }

    let envelope = match parse_webhook(source, &body) {
        Ok(envelope) => envelope,
        Err(e) => {
            warn!(
                subsystem = "api",
                source = %source,
                op = "webhook",
                error = %e,
                "Webhook body rejected"
            );
            return (
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({"error": e.to_string()})),
            );
        }
    };

    let external_id = envelope.external_id.clone();
    match state.db.queue.enqueue(envelope).await {
        // Duplicate delivery is a success: the event is already queued.
        Ok(_) => {
            info!(
                subsystem = "api",
                source = %source,
                external_id = %external_id,
                op = "webhook",
                "Webhook accepted"
            );
            (
                StatusCode::OK,
                Json(serde_json::json!({"status": "accepted"})),
            )
        }
        Err(e) => {
            warn!(
                subsystem = "api",
                source = %source,
                external_id = %external_id,
                op = "webhook",
                error = %e,
                "Enqueue failed, asking sender to retry"
            );
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(serde_json::json!({"error": "queue unavailable, retry later"})),
            )
        }
    }
}

/// Accept the generic hook header or the source-branded one.
fn signature_header(headers: &HeaderMap, source: Source) -> Option<&str> {
    let branded = match source {
        Source::Teamwork => "x-teamwork-signature",
        Source::Missive => "x-missive-signature",
        Source::Craft => "x-hook-signature",
    };
    headers
        .get(branded)
        .or_else(|| headers.get("x-hook-signature"))
        .and_then(|v| v.to_str().ok())
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let db_ok = state.db.is_healthy().await;
    let stats = if db_ok {
        state.db.queue.stats().await.unwrap_or_default()
    } else {
        Vec::new()
    };

    let queue_depth: i64 = stats.iter().map(|s| s.pending + s.leased).sum();
    let failed: i64 = stats.iter().map(|s| s.failed).sum();

    let status = if db_ok { "healthy" } else { "degraded" };
    Json(serde_json::json!({
        "status": status,
        "db_ok": db_ok,
        "queue_depth": queue_depth,
        "failed": failed,
        "queue": stats,
        "uptime_secs": state.started_at.elapsed().as_secs(),
        "timestamp": Utc::now().to_rfc3339(),
        "timezone": state.config.timezone.clone(),
    }))
}
