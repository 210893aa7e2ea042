//! Route handlers

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use tracing::{debug, error, info};

use super::AppState;

pub fn create_router() -> Router<AppState> {
    Router::new()
        .route("/healthz", get(health_check))
        .route("/repos", get(list_repositories))
        .route("/repos/changes", get(check_changes))
        .route("/repos/:name/refs", get(repository_refs))
        .route("/webhook/void", post(void_webhook))
        .route("/reload", post(reload))
        .route("/exit", post(exit))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChangesQuery {
    trigger_webhook: Option<String>,
}

/// Query flag parsing: "true", "1" and "yes" (any case) are true
fn is_truthy(value: Option<&str>) -> bool {
    matches!(
        value.map(|v| v.trim().to_ascii_lowercase()).as_deref(),
        Some("true" | "1" | "yes")
    )
}

async fn health_check() -> &'static str {
    "OK"
}

async fn list_repositories(State(state): State<AppState>) -> impl IntoResponse {
    debug!("list_repositories: called");
    Json(state.coordinator.repositories().await)
}

/// `GET /repos/changes[?triggerWebhook=..]`
///
/// Only "true", "1" and "yes" (any case) dispatch the changes; every other
/// value, including "on" or a bare `?triggerWebhook`, just reports them.
async fn check_changes(State(state): State<AppState>, Query(query): Query<ChangesQuery>) -> impl IntoResponse {
    let trigger = is_truthy(query.trigger_webhook.as_deref());
    debug!(trigger, "check_changes: called");
    Json(state.coordinator.check_for_changes(trigger).await)
}

async fn repository_refs(State(state): State<AppState>, Path(name): Path<String>) -> impl IntoResponse {
    debug!(%name, "repository_refs: called");
    Json(state.coordinator.repository_refs(&name).await)
}

async fn void_webhook(Json(body): Json<serde_json::Value>) -> &'static str {
    info!(%body, "Void webhook received");
    "OK"
}

async fn reload(State(state): State<AppState>) -> impl IntoResponse {
    info!("Reload requested over HTTP");
    match state.coordinator.reload().await {
        Ok(_) => (StatusCode::OK, "OK".to_string()),
        Err(e) => {
            error!(error = %e, "Reload failed");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

async fn exit(State(state): State<AppState>) -> &'static str {
    info!("Exit requested over HTTP");
    state.shutdown.notify_one();
    "OK"
}
