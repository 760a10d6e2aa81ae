//! Audio ingest and STT stream management
//!
//! Validates inbound frames and forwards them, in arrival order, to the
//! session's STT stream. The stream is opened lazily on the first frame
//! after listening starts; the VAD decision is delegated to the backend's
//! silence endpointing rather than reimplemented here.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use voice_relay_core::{
    AudioFrame, Error, FrameBounds, Language, Result, SpeechToText, SttStream, SttStreamConfig,
    TranscriptEvent,
};

/// Per-session audio ingest.
///
/// Owned exclusively by the session task; frames and events flow through
/// the one STT stream it manages.
pub struct AudioIngest {
    stt: Arc<dyn SpeechToText>,
    bounds: FrameBounds,
    silence_threshold: Duration,
    interim_results: bool,
    stream: Option<SttStream>,
    sequence: u64,
}

impl AudioIngest {
    pub fn new(stt: Arc<dyn SpeechToText>, audio: &voice_relay_config::AudioConfig, stt_config: &voice_relay_config::SttConfig) -> Self {
        Self {
            stt,
            bounds: FrameBounds {
                min_bytes: audio.min_frame_bytes,
                max_bytes: audio.max_frame_bytes,
            },
            silence_threshold: Duration::from_millis(stt_config.silence_threshold_ms),
            interim_results: stt_config.interim_results,
            stream: None,
            sequence: 0,
        }
    }

    pub fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    /// Validate and forward one inbound frame.
    ///
    /// Opens the STT stream lazily on the first frame. A send failure means
    /// the stream died underneath us; it is torn down and the caller should
    /// mark the session not-listening.
    pub async fn push_frame(&mut self, payload: Vec<u8>, language: Language) -> Result<()> {
        self.bounds.check(payload.len())?;

        if self.stream.is_none() {
            debug!(language = language.code(), "opening transcription stream");
            let stream = self
                .stt
                .open_stream(SttStreamConfig {
                    language,
                    silence_threshold: self.silence_threshold,
                    interim_results: self.interim_results,
                })
                .await?;
            self.stream = Some(stream);
        }

        let frame = AudioFrame::new(payload, self.sequence);
        self.sequence += 1;

        // Stream is always Some here.
        if let Some(stream) = &self.stream {
            if stream.audio_tx.send(frame).await.is_err() {
                warn!("transcription stream closed mid-utterance");
                self.close();
                return Err(Error::TemporaryUnavailable(
                    "transcription stream closed".to_string(),
                ));
            }
        }
        Ok(())
    }

    /// Wait for the next transcript event.
    ///
    /// Pends forever while no stream is open, so it composes into a session
    /// `select!` loop without a guard. `None` means the stream ended and has
    /// been torn down.
    pub async fn next_event(&mut self) -> Option<Result<TranscriptEvent>> {
        match &mut self.stream {
            Some(stream) => {
                let event = stream.events.recv().await;
                if event.is_none() {
                    self.close();
                }
                event
            }
            None => std::future::pending().await,
        }
    }

    /// Tear down the current STT stream, if any. Idempotent.
    pub fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            stream.close();
        }
    }
}

impl Drop for AudioIngest {
    fn drop(&mut self) {
        self.close();
    }
}
