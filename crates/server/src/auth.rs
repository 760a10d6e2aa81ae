//! Session bootstrap tokens
//!
//! Tokens are opaque, short-lived, and validated once at connection open.
//! An invalid or expired token closes the connection immediately; there is
//! no mid-session revalidation.

use std::time::{Duration, Instant};

use dashmap::DashMap;

/// In-memory store of issued tokens and their expiry deadlines.
pub struct TokenStore {
    tokens: DashMap<String, Instant>,
    ttl: Duration,
}

impl TokenStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            tokens: DashMap::new(),
            ttl,
        }
    }

    /// Issue a fresh opaque token.
    pub fn issue(&self) -> String {
        self.purge_expired();
        let token = uuid::Uuid::new_v4().to_string();
        self.tokens.insert(token.clone(), Instant::now() + self.ttl);
        token
    }

    /// Validate and consume nothing: tokens stay usable until expiry, so a
    /// client can reconnect within the window.
    pub fn validate(&self, token: &str) -> bool {
        match self.tokens.get(token) {
            Some(deadline) => Instant::now() < *deadline,
            None => false,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn purge_expired(&self) {
        let now = Instant::now();
        self.tokens.retain(|_, deadline| now < *deadline);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_issued_token_validates() {
        let store = TokenStore::new(Duration::from_secs(60));
        let token = store.issue();
        assert!(store.validate(&token));
        assert!(!store.validate("not-a-token"));
    }

    #[test]
    fn test_expired_token_rejected() {
        let store = TokenStore::new(Duration::from_millis(0));
        let token = store.issue();
        std::thread::sleep(Duration::from_millis(5));
        assert!(!store.validate(&token));
    }

    #[test]
    fn test_token_survives_for_reconnection() {
        let store = TokenStore::new(Duration::from_secs(60));
        let token = store.issue();
        assert!(store.validate(&token));
        // Second validation (reconnect) still passes within the TTL.
        assert!(store.validate(&token));
    }
}
