//! HTTP endpoints
//!
//! Health, token issuance, metrics, and the WebSocket upgrade route.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::metrics::metrics_handler;
use crate::state::AppState;
use crate::websocket::ws_handler;

/// Create the application router.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/token", post(issue_token))
        .route("/metrics", get(metrics_handler))
        .route("/ws", get(ws_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    #[serde(rename = "activeSessions")]
    active_sessions: usize,
}

async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        active_sessions: state.sessions.count(),
    })
}

#[derive(Serialize)]
struct TokenResponse {
    token: String,
    #[serde(rename = "expiresInSecs")]
    expires_in_secs: u64,
}

/// Issue a short-lived opaque connection token.
async fn issue_token(State(state): State<AppState>) -> impl IntoResponse {
    let token = state.tokens.issue();
    (
        StatusCode::OK,
        Json(TokenResponse {
            token,
            expires_in_secs: state.tokens.ttl().as_secs(),
        }),
    )
}
