//! Session registry
//!
//! One record per live connection. `close` is the single teardown point:
//! it fires the session's cancellation token, which transitively cancels
//! every provider-streaming call the session owns, and removes the entry.
//! No other component frees session resources directly.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::RwLock;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use voice_relay_core::Language;

use crate::ServerError;

/// One live connection's record.
pub struct Session {
    pub id: String,
    pub created_at: Instant,
    last_activity: RwLock<Instant>,
    /// Fired exactly once by `SessionRegistry::close`; every child task
    /// and provider call for this session hangs off it.
    cancel: CancellationToken,
    language: RwLock<Language>,
}

impl Session {
    fn new(id: String) -> Self {
        Self {
            id,
            created_at: Instant::now(),
            last_activity: RwLock::new(Instant::now()),
            cancel: CancellationToken::new(),
            language: RwLock::new(Language::default()),
        }
    }

    /// Reset the inactivity deadline.
    pub fn touch(&self) {
        *self.last_activity.write() = Instant::now();
    }

    pub fn is_expired(&self, timeout: Duration) -> bool {
        self.last_activity.read().elapsed() > timeout
    }

    /// Token tied to the session lifetime. Child tokens derived from it
    /// cancel transitively on session close.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn language(&self) -> Language {
        *self.language.read()
    }

    pub fn set_language(&self, language: Language) {
        *self.language.write() = language;
    }
}

/// Concurrent map of live sessions.
pub struct SessionRegistry {
    sessions: DashMap<String, Arc<Session>>,
    max_sessions: usize,
    inactivity_timeout: Duration,
}

impl SessionRegistry {
    pub fn new(max_sessions: usize, inactivity_timeout: Duration) -> Self {
        Self {
            sessions: DashMap::new(),
            max_sessions,
            inactivity_timeout,
        }
    }

    /// Create a fresh session. Fails when the registry is at capacity,
    /// after sweeping out anything already expired.
    pub fn open(&self) -> Result<Arc<Session>, ServerError> {
        if self.sessions.len() >= self.max_sessions {
            self.close_expired();
            if self.sessions.len() >= self.max_sessions {
                return Err(ServerError::SessionLimit);
            }
        }

        let id = uuid::Uuid::new_v4().to_string();
        let session = Arc::new(Session::new(id.clone()));
        self.sessions.insert(id.clone(), session.clone());
        info!(session_id = %id, live = self.sessions.len(), "session opened");
        Ok(session)
    }

    pub fn get(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions.get(id).map(|s| s.clone())
    }

    pub fn touch(&self, id: &str) {
        if let Some(session) = self.sessions.get(id) {
            session.touch();
        }
    }

    /// Tear a session down. Idempotent: double-close is a no-op.
    pub fn close(&self, id: &str) {
        if let Some((_, session)) = self.sessions.remove(id) {
            session.cancel.cancel();
            info!(session_id = %id, live = self.sessions.len(), "session closed");
        } else {
            debug!(session_id = %id, "close on unknown session ignored");
        }
    }

    pub fn count(&self) -> usize {
        self.sessions.len()
    }

    fn close_expired(&self) {
        let expired: Vec<String> = self
            .sessions
            .iter()
            .filter(|entry| entry.value().is_expired(self.inactivity_timeout))
            .map(|entry| entry.key().clone())
            .collect();
        for id in expired {
            debug!(session_id = %id, "closing inactive session");
            self.close(&id);
        }
    }

    /// Background sweep for sessions whose inactivity deadline passed.
    /// Returns a shutdown sender that stops the task.
    pub fn start_cleanup_task(self: &Arc<Self>) -> watch::Sender<bool> {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let registry = Arc::clone(self);
        // Sweep a few times per timeout window so deadlines are not overshot
        // by much.
        let interval = (registry.inactivity_timeout / 4).max(Duration::from_secs(1));

        tokio::spawn(async move {
            let mut timer = tokio::time::interval(interval);
            timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = timer.tick() => {
                        registry.close_expired();
                    }
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            debug!("session cleanup task shutting down");
                            break;
                        }
                    }
                }
            }
        });

        shutdown_tx
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> SessionRegistry {
        SessionRegistry::new(4, Duration::from_secs(300))
    }

    #[test]
    fn test_open_get_close() {
        let registry = registry();
        let session = registry.open().unwrap();
        assert_eq!(registry.count(), 1);

        let found = registry.get(&session.id).unwrap();
        assert_eq!(found.id, session.id);

        registry.close(&session.id);
        assert_eq!(registry.count(), 0);
        assert!(registry.get(&session.id).is_none());
        assert!(session.is_closed());
    }

    #[test]
    fn test_double_close_is_noop() {
        let registry = registry();
        let session = registry.open().unwrap();
        registry.close(&session.id);
        registry.close(&session.id);
        assert_eq!(registry.count(), 0);
    }

    #[test]
    fn test_close_cancels_child_tokens() {
        let registry = registry();
        let session = registry.open().unwrap();
        let child = session.cancellation().child_token();
        registry.close(&session.id);
        assert!(child.is_cancelled());
    }

    #[test]
    fn test_capacity_limit() {
        let registry = SessionRegistry::new(2, Duration::from_secs(300));
        let _a = registry.open().unwrap();
        let _b = registry.open().unwrap();
        assert!(matches!(registry.open(), Err(ServerError::SessionLimit)));
    }

    #[test]
    fn test_expired_sessions_swept_on_open() {
        let registry = SessionRegistry::new(1, Duration::from_millis(0));
        let stale = registry.open().unwrap();
        std::thread::sleep(Duration::from_millis(5));
        assert!(stale.is_expired(Duration::from_millis(0)));

        // At capacity, but the stale session is reclaimed.
        let fresh = registry.open().unwrap();
        assert_ne!(fresh.id, stale.id);
        assert!(stale.is_closed());
    }

    #[test]
    fn test_sessions_are_not_shared_across_connections() {
        let registry = registry();
        let first = registry.open().unwrap();
        let first_id = first.id.clone();
        registry.close(&first_id);

        let second = registry.open().unwrap();
        assert_ne!(second.id, first_id);
    }
}
