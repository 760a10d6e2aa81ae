//! Voice Relay Server
//!
//! WebSocket and HTTP endpoints for the real-time voice relay.

pub mod auth;
pub mod http;
pub mod metrics;
pub mod outbound;
pub mod protocol;
pub mod rate_limit;
pub mod session;
pub mod state;
pub mod websocket;

pub use auth::TokenStore;
pub use http::create_router;
pub use metrics::{init_metrics, record_error, record_reply_latency, record_utterance};
pub use outbound::{OutboundItem, OutboundQueue};
pub use protocol::{InboundMessage, OutboundMessage};
pub use rate_limit::{RateLimitError, RateLimiter};
pub use session::{Session, SessionRegistry};
pub use state::AppState;
pub use websocket::ws_handler;

use thiserror::Error;

/// Server errors
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Session error: {0}")]
    Session(String),

    #[error("Session limit reached")]
    SessionLimit,

    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Rate limit exceeded")]
    RateLimit,

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<ServerError> for axum::http::StatusCode {
    fn from(err: ServerError) -> Self {
        match err {
            ServerError::Session(_) => axum::http::StatusCode::NOT_FOUND,
            ServerError::SessionLimit => axum::http::StatusCode::SERVICE_UNAVAILABLE,
            ServerError::Auth(_) => axum::http::StatusCode::UNAUTHORIZED,
            ServerError::RateLimit => axum::http::StatusCode::TOO_MANY_REQUESTS,
            ServerError::InvalidRequest(_) => axum::http::StatusCode::BAD_REQUEST,
            ServerError::Internal(_) => axum::http::StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}
