//! Reply pipeline
//!
//! Runs one user turn end to end: transcript → streamed LLM text → streamed
//! TTS audio. Text chunks are forwarded to synthesis as they are generated,
//! so speech starts before the full reply exists; this pipelining is the
//! latency-hiding core of the relay and must not be collapsed into a
//! buffer-then-speak pass.

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use voice_relay_core::{Error, GenerateRequest, Result, VoiceConfig};

use crate::router::ReplyRouter;
use crate::synth::ReplySynthesizer;

const CHANNEL_DEPTH: usize = 32;

/// Progress events for one reply cycle, in emission order.
#[derive(Debug, Clone)]
pub enum ReplyEvent {
    /// Final transcript the reply is answering.
    Transcription(String),
    /// One streamed LLM text chunk.
    Text(String),
    /// One synthesized audio chunk, in text-chunk order.
    Audio(Vec<u8>),
    /// Full reply text; the assistant turn may now be recorded.
    Complete { text: String },
}

/// Provider preferences for one reply.
#[derive(Debug, Clone, Default)]
pub struct ReplyOptions {
    pub llm_provider: Option<String>,
    pub tts_provider: Option<String>,
}

/// One router plus one synthesizer, shared by every session.
pub struct ReplyPipeline {
    router: ReplyRouter,
    synth: ReplySynthesizer,
}

impl ReplyPipeline {
    pub fn new(router: ReplyRouter, synth: ReplySynthesizer) -> Self {
        Self { router, synth }
    }

    pub fn router(&self) -> &ReplyRouter {
        &self.router
    }

    pub fn synthesizer(&self) -> &ReplySynthesizer {
        &self.synth
    }

    /// Run one reply cycle.
    ///
    /// Emits `Transcription`, then interleaved `Text`/`Audio`, then
    /// `Complete`. The caller appends the assistant turn on `Complete`; on
    /// `Err` nothing should be recorded. `Err(Cancelled)` means barge-in or
    /// reset and is not user-visible.
    pub async fn run_turn(
        &self,
        transcript: &str,
        request: &GenerateRequest,
        voice: &VoiceConfig,
        options: &ReplyOptions,
        events: mpsc::Sender<ReplyEvent>,
        cancel: CancellationToken,
    ) -> Result<()> {
        if events
            .send(ReplyEvent::Transcription(transcript.to_string()))
            .await
            .is_err()
        {
            return Err(Error::Cancelled);
        }

        let (chunk_tx, mut chunk_rx) = mpsc::channel::<String>(CHANNEL_DEPTH);
        let (synth_tx, synth_rx) = mpsc::channel::<String>(CHANNEL_DEPTH);
        let (audio_tx, mut audio_rx) = mpsc::channel::<Vec<u8>>(CHANNEL_DEPTH);

        // Tee LLM chunks to the client and to synthesis. If synthesis dies,
        // dropping its sender propagates back up and cancels generation.
        let tee_events = events.clone();
        let tee = async move {
            while let Some(chunk) = chunk_rx.recv().await {
                if tee_events
                    .send(ReplyEvent::Text(chunk.clone()))
                    .await
                    .is_err()
                {
                    break;
                }
                if synth_tx.send(chunk).await.is_err() {
                    break;
                }
            }
        };

        let audio_events = events.clone();
        let audio_relay = async move {
            while let Some(bytes) = audio_rx.recv().await {
                if audio_events.send(ReplyEvent::Audio(bytes)).await.is_err() {
                    break;
                }
            }
        };

        let router_fut = self.router.stream_reply(
            request,
            options.llm_provider.as_deref(),
            chunk_tx,
            &cancel,
        );
        let synth_fut = self.synth.stream(
            synth_rx,
            voice,
            options.tts_provider.as_deref(),
            audio_tx,
            &cancel,
        );

        let (router_res, synth_res, _, _) = tokio::join!(router_fut, synth_fut, tee, audio_relay);

        // A synthesis failure collapses the tee, which the router observes
        // as a closed channel; report the root cause, not the symptom.
        match synth_res {
            Err(Error::Cancelled) | Ok(()) => {}
            Err(e) => return Err(e),
        }
        let full_text = router_res?;

        debug!(chars = full_text.len(), "reply cycle complete");
        if events
            .send(ReplyEvent::Complete { text: full_text })
            .await
            .is_err()
        {
            return Err(Error::Cancelled);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Arc;
    use voice_relay_core::{LanguageModel, Message, TextToSpeech};

    struct EchoLlm;

    #[async_trait]
    impl LanguageModel for EchoLlm {
        async fn generate_stream(
            &self,
            request: &GenerateRequest,
            tx: mpsc::Sender<String>,
            _cancel: &CancellationToken,
        ) -> Result<String> {
            let last = request
                .messages
                .last()
                .map(|m| m.content.clone())
                .unwrap_or_default();
            let mut full = String::new();
            for word in last.split_whitespace() {
                let chunk = format!("{} ", word);
                full.push_str(&chunk);
                if tx.send(chunk).await.is_err() {
                    return Err(Error::Cancelled);
                }
            }
            Ok(full.trim_end().to_string())
        }

        fn name(&self) -> &str {
            "echo"
        }
    }

    struct BytesTts;

    #[async_trait]
    impl TextToSpeech for BytesTts {
        async fn synthesize(
            &self,
            text: &str,
            _voice: &VoiceConfig,
            _cancel: &CancellationToken,
        ) -> Result<Vec<u8>> {
            Ok(text.trim().as_bytes().to_vec())
        }

        fn name(&self) -> &str {
            "bytes"
        }
    }

    fn pipeline() -> ReplyPipeline {
        ReplyPipeline::new(
            ReplyRouter::new(vec![Arc::new(EchoLlm)]),
            ReplySynthesizer::new(vec![Arc::new(BytesTts)], 2),
        )
    }

    #[tokio::test]
    async fn test_full_cycle_event_order() {
        let pipeline = pipeline();
        let (events_tx, mut events_rx) = mpsc::channel(64);
        let request = GenerateRequest::new(vec![Message::user("hola buenas tardes")]);

        pipeline
            .run_turn(
                "hola buenas tardes",
                &request,
                &VoiceConfig::default(),
                &ReplyOptions::default(),
                events_tx,
                CancellationToken::new(),
            )
            .await
            .unwrap();

        let mut texts = Vec::new();
        let mut audio = Vec::new();
        let mut complete = None;
        let mut saw_transcription = false;
        while let Some(event) = events_rx.recv().await {
            match event {
                ReplyEvent::Transcription(t) => {
                    assert!(texts.is_empty(), "transcription must come first");
                    assert_eq!(t, "hola buenas tardes");
                    saw_transcription = true;
                }
                ReplyEvent::Text(t) => texts.push(t),
                ReplyEvent::Audio(a) => audio.push(a),
                ReplyEvent::Complete { text } => complete = Some(text),
            }
        }

        assert!(saw_transcription);
        assert_eq!(texts.join(""), "hola buenas tardes ");
        // Audio chunks mirror text chunks, in order.
        assert_eq!(
            audio,
            vec![b"hola".to_vec(), b"buenas".to_vec(), b"tardes".to_vec()]
        );
        assert_eq!(complete.as_deref(), Some("hola buenas tardes"));
    }

    #[tokio::test]
    async fn test_cancelled_turn_reports_cancelled() {
        let pipeline = pipeline();
        let (events_tx, _events_rx) = mpsc::channel(64);
        let request = GenerateRequest::new(vec![Message::user("hola")]);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = pipeline
            .run_turn(
                "hola",
                &request,
                &VoiceConfig::default(),
                &ReplyOptions::default(),
                events_tx,
                cancel,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Cancelled));
    }

    #[tokio::test]
    async fn test_llm_failure_surfaces_all_providers_failed() {
        struct DownLlm;
        #[async_trait]
        impl LanguageModel for DownLlm {
            async fn generate_stream(
                &self,
                _request: &GenerateRequest,
                _tx: mpsc::Sender<String>,
                _cancel: &CancellationToken,
            ) -> Result<String> {
                Err(Error::TemporaryUnavailable("down".to_string()))
            }
            fn name(&self) -> &str {
                "down"
            }
        }

        let pipeline = ReplyPipeline::new(
            ReplyRouter::new(vec![Arc::new(DownLlm)]),
            ReplySynthesizer::new(vec![Arc::new(BytesTts)], 2),
        );
        let (events_tx, _events_rx) = mpsc::channel(64);
        let request = GenerateRequest::new(vec![Message::user("hola")]);

        let err = pipeline
            .run_turn(
                "hola",
                &request,
                &VoiceConfig::default(),
                &ReplyOptions::default(),
                events_tx,
                CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert_eq!(err.code(), "ALL_PROVIDERS_FAILED");
    }
}
