//! Capability traits for the streaming collaborators
//!
//! The relay depends on capability contracts for streaming speech-to-text,
//! text generation, and text-to-speech, not on any specific vendor.
//! Concrete backends live in the providers crate; tests use in-process
//! mocks.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::audio::AudioFrame;
use crate::error::Result;
use crate::language::Language;
use crate::llm::GenerateRequest;
use crate::transcript::TranscriptEvent;

/// Configuration for one STT streaming session.
#[derive(Debug, Clone)]
pub struct SttStreamConfig {
    pub language: Language,
    /// Trailing silence after which the backend emits an utterance-final
    /// event. The VAD decision is delegated to the backend's endpointing.
    pub silence_threshold: Duration,
    /// Emit advisory interim results.
    pub interim_results: bool,
}

impl Default for SttStreamConfig {
    fn default() -> Self {
        Self {
            language: Language::default(),
            silence_threshold: Duration::from_millis(300),
            interim_results: true,
        }
    }
}

/// Handle to a live STT stream: push audio in, receive transcript events out.
///
/// Dropping `audio_tx` or firing `cancel` ends the stream; the backend then
/// closes the event channel. An `Err` on the event channel means the stream
/// is dead and must be reopened by the caller.
pub struct SttStream {
    pub audio_tx: mpsc::Sender<AudioFrame>,
    pub events: mpsc::Receiver<Result<TranscriptEvent>>,
    pub cancel: CancellationToken,
}

impl SttStream {
    /// Tear the stream down. Idempotent.
    pub fn close(&self) {
        self.cancel.cancel();
    }
}

/// Streaming speech-to-text capability.
#[async_trait]
pub trait SpeechToText: Send + Sync + 'static {
    /// Open a streaming transcription session. Opened lazily by the ingest
    /// layer on the first audio frame after listening starts.
    async fn open_stream(&self, config: SttStreamConfig) -> Result<SttStream>;

    /// Provider name for logging and fallback bookkeeping.
    fn name(&self) -> &str;
}

/// Streaming text-generation capability.
#[async_trait]
pub trait LanguageModel: Send + Sync + 'static {
    /// Stream a reply. Text chunks are sent to `tx` as they are generated
    /// (pipelined, never buffered into one string) and the full reply text
    /// is returned once the stream completes.
    ///
    /// Implementations must watch `cancel` and abandon the call promptly,
    /// returning `Error::Cancelled`.
    async fn generate_stream(
        &self,
        request: &GenerateRequest,
        tx: mpsc::Sender<String>,
        cancel: &CancellationToken,
    ) -> Result<String>;

    fn name(&self) -> &str;
}

/// Voice parameters for synthesis.
#[derive(Debug, Clone)]
pub struct VoiceConfig {
    pub language: Language,
    pub voice_id: Option<String>,
    /// 1.0 = normal speed.
    pub speaking_rate: f32,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            language: Language::default(),
            voice_id: None,
            speaking_rate: 1.0,
        }
    }
}

/// Streaming text-to-speech capability.
///
/// Synthesis is per text chunk; the synthesizer enforces ordered emission
/// across chunks, so implementations only handle one chunk at a time.
#[async_trait]
pub trait TextToSpeech: Send + Sync + 'static {
    /// Synthesize one text chunk into encoded audio bytes.
    async fn synthesize(
        &self,
        text: &str,
        voice: &VoiceConfig,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>>;

    fn name(&self) -> &str;
}
