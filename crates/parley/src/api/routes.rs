//! API route definitions.

use std::path::PathBuf;

use axum::http::{HeaderValue, Method, header};
use axum::{Json, Router, routing::get, routing::post};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::Level;

use super::chat;
use super::state::AppState;

/// Create the application router.
///
/// When `blob_dir` is set, uploaded attachments are served under `/blobs`.
pub fn create_router(state: AppState, blob_dir: Option<PathBuf>) -> Router {
    let cors = build_cors_layer(&state);

    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
        .on_request(DefaultOnRequest::new().level(Level::INFO))
        .on_response(DefaultOnResponse::new().level(Level::INFO));

    let mut router = Router::new()
        .route("/health", get(health))
        .route("/api/chat", post(chat::chat));

    if let Some(dir) = blob_dir {
        router = router.nest_service("/blobs", ServeDir::new(dir));
    }

    router.layer(cors).layer(trace_layer).with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

fn build_cors_layer(state: &AppState) -> CorsLayer {
    let origins: Vec<HeaderValue> = state
        .cors_origins
        .iter()
        .filter_map(|origin| origin.parse().ok())
        .collect();

    let allow_origin = if origins.is_empty() {
        AllowOrigin::any()
    } else {
        AllowOrigin::list(origins)
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
}
