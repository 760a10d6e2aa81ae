//! Error taxonomy shared across the relay
//!
//! Every error carries a stable wire code (`code()`) used in the `error`
//! message sent to the client. Per-frame errors keep the session alive;
//! only `Unauthorized` and `ConnectionReset` are fatal to the connection.

use std::time::Duration;
use thiserror::Error;

/// Relay errors
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed or oversized frame/control message. Rejects the single
    /// message, never the session.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Provider-side throttling. Recoverable via ordered fallback.
    #[error("rate limited: {0}")]
    RateLimited(String),

    /// Provider-side transient failure. Recoverable via ordered fallback.
    #[error("temporarily unavailable: {0}")]
    TemporaryUnavailable(String),

    /// A provider call exceeded its deadline. Counts as that provider's
    /// failure and triggers fallback.
    #[error("provider call timed out after {0:?}")]
    Timeout(Duration),

    /// Bad or expired token. Fatal to the connection.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// The ordered fallback chain is exhausted. One user-visible error
    /// event; the session stays open for retry.
    #[error("all providers failed: {0}")]
    AllProvidersFailed(String),

    /// Transport-level drop. Triggers session teardown.
    #[error("connection reset: {0}")]
    ConnectionReset(String),

    /// A provider call was cancelled (barge-in, reset, or session close).
    /// Not user-visible; the cancellation itself was user-initiated.
    #[error("cancelled")]
    Cancelled,

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Stable wire code for the client-facing `error` message.
    pub fn code(&self) -> &'static str {
        match self {
            Error::InvalidInput(_) => "INVALID_INPUT",
            Error::RateLimited(_) => "RATE_LIMITED",
            Error::TemporaryUnavailable(_) => "TEMPORARY_UNAVAILABLE",
            Error::Timeout(_) => "TIMEOUT",
            Error::Unauthorized(_) => "UNAUTHORIZED",
            Error::AllProvidersFailed(_) => "ALL_PROVIDERS_FAILED",
            Error::ConnectionReset(_) => "CONNECTION_RESET",
            Error::Cancelled => "CANCELLED",
            Error::Internal(_) => "INTERNAL",
        }
    }

    /// Does this error move the router to the next provider in the list?
    pub fn triggers_fallback(&self) -> bool {
        matches!(
            self,
            Error::RateLimited(_)
                | Error::TemporaryUnavailable(_)
                | Error::Timeout(_)
                | Error::Internal(_)
        )
    }

    /// Is this error fatal to the connection (as opposed to the single
    /// message or provider call that produced it)?
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Unauthorized(_) | Error::ConnectionReset(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_codes_stable() {
        assert_eq!(Error::InvalidInput("x".into()).code(), "INVALID_INPUT");
        assert_eq!(
            Error::AllProvidersFailed("x".into()).code(),
            "ALL_PROVIDERS_FAILED"
        );
        assert_eq!(
            Error::Timeout(Duration::from_secs(5)).code(),
            "TIMEOUT"
        );
    }

    #[test]
    fn test_fallback_classification() {
        assert!(Error::RateLimited("429".into()).triggers_fallback());
        assert!(Error::Timeout(Duration::from_secs(1)).triggers_fallback());
        assert!(!Error::InvalidInput("bad".into()).triggers_fallback());
        assert!(!Error::Cancelled.triggers_fallback());
    }

    #[test]
    fn test_fatal_classification() {
        assert!(Error::Unauthorized("expired".into()).is_fatal());
        assert!(Error::ConnectionReset("eof".into()).is_fatal());
        assert!(!Error::AllProvidersFailed("x".into()).is_fatal());
    }
}
