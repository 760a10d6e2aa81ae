//! TTS streaming synthesizer
//!
//! Strict pipeline over the configured provider chain: chunk synthesis may
//! run concurrently (bounded), but audio is emitted in chunk order. One
//! reply uses one provider; ordered fallback is only allowed before the
//! first audio bytes go out, so a reply never mixes voices.

use std::collections::VecDeque;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::stream::{FuturesOrdered, StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use voice_relay_core::{Error, Result, TextToSpeech, VoiceConfig};

/// Ordered synthesizer over the configured TTS chain.
pub struct ReplySynthesizer {
    chain: Vec<Arc<dyn TextToSpeech>>,
    concurrency: usize,
}

impl ReplySynthesizer {
    pub fn new(chain: Vec<Arc<dyn TextToSpeech>>, concurrency: usize) -> Self {
        Self {
            chain,
            concurrency: concurrency.max(1),
        }
    }

    /// Provider names in fallback order, for `setProvider` validation.
    pub fn provider_names(&self) -> Vec<String> {
        self.chain.iter().map(|p| p.name().to_string()).collect()
    }

    /// Synthesize a stream of text chunks into a stream of audio chunks.
    ///
    /// Returns once the inbound channel closes and every queued chunk has
    /// been emitted. On cancellation the chunk currently being synthesized
    /// is abandoned and nothing further is emitted.
    pub async fn stream(
        &self,
        mut chunks: mpsc::Receiver<String>,
        voice: &VoiceConfig,
        preferred: Option<&str>,
        audio_tx: mpsc::Sender<Vec<u8>>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let order = self.attempt_order(preferred);
        let mut provider_idx = 0usize;
        let mut emitted_any = false;
        let mut inbound_open = true;

        // Chunks accepted but not yet emitted, front first. in_flight[k]
        // always synthesizes queue[k], so a provider switch can rebuild the
        // pipeline from the queue alone.
        let mut queue: VecDeque<String> = VecDeque::new();
        let mut in_flight: FuturesOrdered<BoxFuture<'static, Result<Vec<u8>>>> =
            FuturesOrdered::new();

        loop {
            while in_flight.len() < self.concurrency && in_flight.len() < queue.len() {
                let text = queue[in_flight.len()].clone();
                let provider = order[provider_idx].clone();
                let voice = voice.clone();
                let cancel = cancel.clone();
                in_flight.push_back(Box::pin(async move {
                    provider.synthesize(&text, &voice, &cancel).await
                }));
            }

            if in_flight.is_empty() && !inbound_open {
                return Ok(());
            }

            tokio::select! {
                _ = cancel.cancelled() => return Err(Error::Cancelled),

                chunk = chunks.recv(), if inbound_open => match chunk {
                    Some(text) if !text.trim().is_empty() => queue.push_back(text),
                    Some(_) => {}
                    None => inbound_open = false,
                },

                result = in_flight.next(), if !in_flight.is_empty() => {
                    // in_flight is non-empty, so next() yields Some.
                    let result = result.unwrap_or(Err(Error::Cancelled));
                    match result {
                        Ok(audio) => {
                            queue.pop_front();
                            emitted_any = true;
                            if audio_tx.send(audio).await.is_err() {
                                return Err(Error::Cancelled);
                            }
                        }
                        Err(Error::Cancelled) => return Err(Error::Cancelled),
                        Err(e) if e.triggers_fallback()
                            && !emitted_any
                            && provider_idx + 1 < order.len() =>
                        {
                            warn!(
                                provider = order[provider_idx].name(),
                                error = %e,
                                "synthesis failed before playback, trying next provider"
                            );
                            provider_idx += 1;
                            // Drop in-flight work from the old provider and
                            // rebuild from the queue on the next iteration.
                            in_flight = FuturesOrdered::new();
                        }
                        Err(e) if e.triggers_fallback() && !emitted_any => {
                            return Err(Error::AllProvidersFailed(e.to_string()));
                        }
                        Err(e) => {
                            debug!(error = %e, "synthesis failed mid-reply");
                            return Err(e);
                        }
                    }
                }
            }
        }
    }

    fn attempt_order(&self, preferred: Option<&str>) -> Vec<Arc<dyn TextToSpeech>> {
        let mut order: Vec<Arc<dyn TextToSpeech>> = Vec::with_capacity(self.chain.len());
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
    use std::time::Duration;

    struct SlowFirstChunkTts;

    #[async_trait]
    impl TextToSpeech for SlowFirstChunkTts {
        async fn synthesize(
            &self,
            text: &str,
            _voice: &VoiceConfig,
            cancel: &CancellationToken,
        ) -> Result<Vec<u8>> {
            // First chunk takes longest, so unordered emission would flip
            // the order.
            let delay = if text == "chunk-0" { 50 } else { 5 };
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_millis(delay)) => {}
                _ = cancel.cancelled() => return Err(Error::Cancelled),
            }
            Ok(text.as_bytes().to_vec())
        }

        fn name(&self) -> &str {
            "slow-first"
        }
    }

    struct FailingTts {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl TextToSpeech for FailingTts {
        async fn synthesize(
            &self,
            _text: &str,
            _voice: &VoiceConfig,
            _cancel: &CancellationToken,
        ) -> Result<Vec<u8>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(Error::TemporaryUnavailable("down".to_string()))
        }

        fn name(&self) -> &str {
            "failing"
        }
    }

    async fn run_chunks(
        synth: &ReplySynthesizer,
        texts: Vec<&str>,
    ) -> (Result<()>, Vec<Vec<u8>>) {
        let (chunk_tx, chunk_rx) = mpsc::channel(8);
        let (audio_tx, mut audio_rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();
        let voice = VoiceConfig::default();

        for text in texts {
            chunk_tx.send(text.to_string()).await.unwrap();
        }
        drop(chunk_tx);

        let result = synth
            .stream(chunk_rx, &voice, None, audio_tx, &cancel)
            .await;

        let mut audio = Vec::new();
        while let Some(bytes) = audio_rx.recv().await {
            audio.push(bytes);
        }
        (result, audio)
    }

    #[tokio::test]
    async fn test_ordered_emission_despite_concurrency() {
        let synth = ReplySynthesizer::new(vec![Arc::new(SlowFirstChunkTts)], 3);
        let (result, audio) = run_chunks(&synth, vec!["chunk-0", "chunk-1", "chunk-2"]).await;
        result.unwrap();
        assert_eq!(
            audio,
            vec![
                b"chunk-0".to_vec(),
                b"chunk-1".to_vec(),
                b"chunk-2".to_vec()
            ]
        );
    }

    #[tokio::test]
    async fn test_fallback_before_first_audio() {
        let failing = Arc::new(FailingTts {
            calls: AtomicUsize::new(0),
        });
        let synth = ReplySynthesizer::new(
            vec![failing.clone(), Arc::new(SlowFirstChunkTts)],
            2,
        );
        let (result, audio) = run_chunks(&synth, vec!["chunk-1", "chunk-2"]).await;
        result.unwrap();
        // All audio comes from the fallback provider, in order.
        assert_eq!(audio, vec![b"chunk-1".to_vec(), b"chunk-2".to_vec()]);
        assert!(failing.calls.load(Ordering::SeqCst) >= 1);
    }

    #[tokio::test]
    async fn test_exhausted_chain_fails() {
        let synth = ReplySynthesizer::new(
            vec![Arc::new(FailingTts {
                calls: AtomicUsize::new(0),
            })],
            2,
        );
        let (result, audio) = run_chunks(&synth, vec!["hola"]).await;
        assert_eq!(result.unwrap_err().code(), "ALL_PROVIDERS_FAILED");
        assert!(audio.is_empty());
    }

    #[tokio::test]
    async fn test_cancellation_stops_emission() {
        let synth = ReplySynthesizer::new(vec![Arc::new(SlowFirstChunkTts)], 2);
        let (chunk_tx, chunk_rx) = mpsc::channel(8);
        let (audio_tx, mut audio_rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();
        let voice = VoiceConfig::default();

        chunk_tx.send("chunk-0".to_string()).await.unwrap();
        chunk_tx.send("chunk-1".to_string()).await.unwrap();
        cancel.cancel();

        let result = synth
            .stream(chunk_rx, &voice, None, audio_tx, &cancel)
            .await;
        assert!(matches!(result, Err(Error::Cancelled)));
        assert!(audio_rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_empty_chunks_skipped() {
        let synth = ReplySynthesizer::new(vec![Arc::new(SlowFirstChunkTts)], 2);
        let (result, audio) = run_chunks(&synth, vec!["  ", "chunk-1"]).await;
        result.unwrap();
        assert_eq!(audio, vec![b"chunk-1".to_vec()]);
    }
}
