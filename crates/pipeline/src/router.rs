//! LLM streaming router with ordered provider fallback
//!
//! Walks a fixed, ordered provider list for one request. A recoverable
//! failure before any text has been forwarded moves to the next provider;
//! once chunks are flowing downstream the reply is committed to that
//! provider, since re-running it would interleave two replies.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use tracing::{info, warn};
use voice_relay_core::{Error, GenerateRequest, LanguageModel, Result};

const CHUNK_CHANNEL_DEPTH: usize = 32;

/// Ordered-fallback router over the configured LLM chain.
pub struct ReplyRouter {
    chain: Vec<Arc<dyn LanguageModel>>,
}

impl ReplyRouter {
    pub fn new(chain: Vec<Arc<dyn LanguageModel>>) -> Self {
        Self { chain }
    }

    /// Provider names in fallback order, for `setProvider` validation.
    pub fn provider_names(&self) -> Vec<String> {
        self.chain.iter().map(|p| p.name().to_string()).collect()
    }

    /// Stream one reply, forwarding text chunks to `tx` as they arrive.
    /// Returns the full reply text once the stream completes.
    ///
    /// `preferred` rotates the chain so the named provider is attempted
    /// first; the rest keep their configured order.
    pub async fn stream_reply(
        &self,
        request: &GenerateRequest,
        preferred: Option<&str>,
        tx: mpsc::Sender<String>,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let order = self.attempt_order(preferred);
        let mut last_error = Error::Internal("no LLM providers configured".to_string());

        for provider in order {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }

            // Per-attempt relay so we know whether this provider got any
            // text downstream before it failed.
            let (attempt_tx, mut attempt_rx) = mpsc::channel::<String>(CHUNK_CHANNEL_DEPTH);
            let outer_tx = tx.clone();
            let relay = tokio::spawn(async move {
                let mut forwarded = 0usize;
                while let Some(chunk) = attempt_rx.recv().await {
                    if outer_tx.send(chunk).await.is_err() {
                        break;
                    }
                    forwarded += 1;
                }
                forwarded
            });

            let result = provider.generate_stream(request, attempt_tx, cancel).await;
            let forwarded = relay.await.unwrap_or(0);

            match result {
                Ok(full_text) => {
                    info!(provider = provider.name(), chars = full_text.len(), "reply generated");
                    return Ok(full_text);
                }
                Err(Error::Cancelled) => return Err(Error::Cancelled),
                Err(e) if e.triggers_fallback() && forwarded == 0 => {
                    warn!(provider = provider.name(), error = %e, "provider failed, trying next");
                    last_error = e;
                }
                Err(e) => return Err(e),
            }
        }

        Err(Error::AllProvidersFailed(last_error.to_string()))
    }

    fn attempt_order(&self, preferred: Option<&str>) -> Vec<Arc<dyn LanguageModel>> {
        let mut order: Vec<Arc<dyn LanguageModel>> = Vec::with_capacity(self.chain.len());
        if let Some(name) = preferred {
            if let Some(p) = self.chain.iter().find(|p| p.name() == name) {
                order.push(p.clone());
            }
        }
        for p in &self.chain {
            if order.first().map(|f| f.name()) != Some(p.name()) {
                order.push(p.clone());
            }
        }
        order
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct ScriptedLlm {
        name: String,
        chunks: Vec<&'static str>,
        fail: Option<fn() -> Error>,
        calls: AtomicUsize,
    }

    impl ScriptedLlm {
        fn ok(name: &str, chunks: Vec<&'static str>) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                chunks,
                fail: None,
                calls: AtomicUsize::new(0),
            })
        }

        fn failing(name: &str, fail: fn() -> Error) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                chunks: vec![],
                fail: Some(fail),
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl LanguageModel for ScriptedLlm {
        async fn generate_stream(
            &self,
            _request: &GenerateRequest,
            tx: mpsc::Sender<String>,
            _cancel: &CancellationToken,
        ) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(fail) = self.fail {
                return Err(fail());
            }
            let mut full = String::new();
            for chunk in &self.chunks {
                full.push_str(chunk);
                if tx.send(chunk.to_string()).await.is_err() {
                    return Err(Error::Cancelled);
                }
            }
            Ok(full)
        }

        fn name(&self) -> &str {
            &self.name
        }
    }

    fn request() -> GenerateRequest {
        GenerateRequest::new(vec![voice_relay_core::Message::user("hola")])
    }

    #[tokio::test]
    async fn test_chunks_forwarded_in_order() {
        let router = ReplyRouter::new(vec![ScriptedLlm::ok("a", vec!["Hola", ", ", "buenas"])]);
        let (tx, mut rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();

        let full = router
            .stream_reply(&request(), None, tx, &cancel)
            .await
            .unwrap();
        assert_eq!(full, "Hola, buenas");

        let mut received = Vec::new();
        while let Some(chunk) = rx.recv().await {
            received.push(chunk);
        }
        assert_eq!(received, vec!["Hola", ", ", "buenas"]);
    }

    #[tokio::test]
    async fn test_fallback_on_recoverable_failure() {
        let primary = ScriptedLlm::failing("primary", || {
            Error::TemporaryUnavailable("503".to_string())
        });
        let backup = ScriptedLlm::ok("backup", vec!["ok"]);
        let router = ReplyRouter::new(vec![primary.clone(), backup.clone()]);
        let (tx, _rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();

        let full = router
            .stream_reply(&request(), None, tx, &cancel)
            .await
            .unwrap();
        assert_eq!(full, "ok");
        assert_eq!(primary.calls.load(Ordering::SeqCst), 1);
        assert_eq!(backup.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_exhausted_chain_is_all_providers_failed() {
        let router = ReplyRouter::new(vec![
            ScriptedLlm::failing("a", || Error::RateLimited("429".to_string())),
            ScriptedLlm::failing("b", || Error::TemporaryUnavailable("503".to_string())),
        ]);
        let (tx, _rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();

        let err = router
            .stream_reply(&request(), None, tx, &cancel)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "ALL_PROVIDERS_FAILED");
    }

    #[tokio::test]
    async fn test_preferred_provider_attempted_first() {
        let a = ScriptedLlm::ok("a", vec!["from-a"]);
        let b = ScriptedLlm::ok("b", vec!["from-b"]);
        let router = ReplyRouter::new(vec![a.clone(), b.clone()]);
        let (tx, _rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();

        let full = router
            .stream_reply(&request(), Some("b"), tx, &cancel)
            .await
            .unwrap();
        assert_eq!(full, "from-b");
        assert_eq!(a.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_cancellation_is_not_a_provider_failure() {
        struct CancelledLlm;
        #[async_trait]
        impl LanguageModel for CancelledLlm {
            async fn generate_stream(
                &self,
                _request: &GenerateRequest,
                _tx: mpsc::Sender<String>,
                _cancel: &CancellationToken,
            ) -> Result<String> {
                Err(Error::Cancelled)
            }
            fn name(&self) -> &str {
                "cancelled"
            }
        }

        let router = ReplyRouter::new(vec![
            Arc::new(CancelledLlm) as Arc<dyn LanguageModel>,
            ScriptedLlm::ok("backup", vec!["x"]),
        ]);
        let (tx, _rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();

        let err = router
            .stream_reply(&request(), None, tx, &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Cancelled));
    }
}
