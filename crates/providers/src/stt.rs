//! Buffering HTTP transcription backend
//!
//! Generic speech-to-text over a plain POST endpoint. Audio frames are
//! buffered in a background task; trailing silence (no frame within the
//! configured threshold) closes the utterance and sends the buffered audio
//! for transcription. Interim results are produced by transcribing the
//! buffer-so-far at a fixed cadence while speech is ongoing.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use voice_relay_core::{
    AudioFrame, Error, Result, SpeechToText, SttStream, SttStreamConfig, TranscriptEvent,
};

use crate::{map_reqwest_error, map_status, resolve_api_key};

/// How often to produce an interim result while an utterance accumulates.
const INTERIM_INTERVAL: Duration = Duration::from_millis(500);

/// Channel depth for inbound audio frames. Sized to absorb network jitter
/// without letting an unbounded backlog build up.
const AUDIO_CHANNEL_DEPTH: usize = 64;

/// Configuration for the HTTP transcription endpoint.
#[derive(Debug, Clone)]
pub struct HttpSttConfig {
    pub name: String,
    /// Base URL; `/transcribe` is appended.
    pub endpoint: String,
    pub api_key: Option<String>,
    pub timeout: Duration,
}

/// HTTP transcription backend.
pub struct HttpSttBackend {
    config: HttpSttConfig,
    client: Client,
}

impl HttpSttBackend {
    pub fn new(config: HttpSttConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| Error::Internal(e.to_string()))?;
        Ok(Self { config, client })
    }

    pub fn from_config(stt: &voice_relay_config::SttConfig) -> Result<Self> {
        Self::new(HttpSttConfig {
            name: "http-stt".to_string(),
            endpoint: stt.endpoint.clone(),
            api_key: resolve_api_key(stt.api_key_env.as_deref()),
            timeout: Duration::from_secs(stt.timeout_secs),
        })
    }

    async fn transcribe(
        client: &Client,
        config: &HttpSttConfig,
        audio: &[u8],
        language: &str,
        partial: bool,
    ) -> Result<TranscriptEvent> {
        let mut req = client
            .post(format!("{}/transcribe", config.endpoint))
            .query(&[("language", language), ("partial", if partial { "true" } else { "false" })])
            .header("content-type", "application/octet-stream")
            .body(audio.to_vec());
        if let Some(key) = &config.api_key {
            req = req.bearer_auth(key);
        }

        let response = req
            .send()
            .await
            .map_err(|e| map_reqwest_error(e, config.timeout))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(map_status(status, &body));
        }

        let body: TranscribeResponse = response.json().await.map_err(|e| {
            Error::TemporaryUnavailable(format!("malformed transcription payload: {}", e))
        })?;

        Ok(if partial {
            TranscriptEvent::interim(body.text, body.confidence)
        } else {
            TranscriptEvent::utterance_final(body.text, body.confidence)
        })
    }
}

#[async_trait]
impl SpeechToText for HttpSttBackend {
    async fn open_stream(&self, config: SttStreamConfig) -> Result<SttStream> {
        let (audio_tx, mut audio_rx) = mpsc::channel::<AudioFrame>(AUDIO_CHANNEL_DEPTH);
        let (event_tx, event_rx) = mpsc::channel::<Result<TranscriptEvent>>(AUDIO_CHANNEL_DEPTH);
        let cancel = CancellationToken::new();

        let task_cancel = cancel.clone();
        let client = self.client.clone();
        let backend_config = self.config.clone();

        tokio::spawn(async move {
            let language = config.language.code().to_string();
            let mut buffer: Vec<u8> = Vec::new();
            let mut last_interim = Instant::now();

            loop {
                let silence = tokio::time::sleep(config.silence_threshold);
                tokio::pin!(silence);

                tokio::select! {
                    _ = task_cancel.cancelled() => return,
                    frame = audio_rx.recv() => {
                        let Some(frame) = frame else {
                            // Caller dropped the sender; flush what we have.
                            if !buffer.is_empty() {
                                let result = Self::transcribe(
                                    &client, &backend_config, &buffer, &language, false,
                                ).await;
                                let _ = event_tx.send(result).await;
                            }
                            return;
                        };
                        buffer.extend_from_slice(&frame.payload);

                        if config.interim_results
                            && last_interim.elapsed() >= INTERIM_INTERVAL
                            && !buffer.is_empty()
                        {
                            last_interim = Instant::now();
                            match Self::transcribe(
                                &client, &backend_config, &buffer, &language, true,
                            ).await {
                                Ok(event) => {
                                    if event_tx.send(Ok(event)).await.is_err() {
                                        return;
                                    }
                                }
                                // Interim failures are advisory; log and keep
                                // the utterance accumulating.
                                Err(e) => warn!("interim transcription failed: {}", e),
                            }
                        }
                    }
                    _ = &mut silence, if !buffer.is_empty() => {
                        debug!(bytes = buffer.len(), "utterance endpointed by silence");
                        let result = Self::transcribe(
                            &client, &backend_config, &buffer, &language, false,
                        ).await;
                        buffer.clear();
                        last_interim = Instant::now();
                        let failed = result.is_err();
                        if event_tx.send(result).await.is_err() || failed {
                            // A final-transcription failure kills this stream;
                            // the ingest layer reopens on the next utterance.
                            return;
                        }
                    }
                }
            }
        });

        Ok(SttStream {
            audio_tx,
            events: event_rx,
            cancel,
        })
    }

    fn name(&self) -> &str {
        &self.config.name
    }
}

#[derive(Debug, Deserialize)]
struct TranscribeResponse {
    text: String,
    #[serde(default = "default_confidence")]
    confidence: f32,
}

fn default_confidence() -> f32 {
    1.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_parsing() {
        let body: TranscribeResponse =
            serde_json::from_str(r#"{"text":"hola buenas","confidence":0.93}"#).unwrap();
        assert_eq!(body.text, "hola buenas");
        assert!((body.confidence - 0.93).abs() < f32::EPSILON);

        // Confidence is optional on the wire.
        let body: TranscribeResponse = serde_json::from_str(r#"{"text":""}"#).unwrap();
        assert!((body.confidence - 1.0).abs() < f32::EPSILON);
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let backend = HttpSttBackend::new(HttpSttConfig {
            name: "test".to_string(),
            endpoint: "http://localhost:1".to_string(),
            api_key: None,
            timeout: Duration::from_secs(1),
        })
        .unwrap();

        let stream = backend.open_stream(SttStreamConfig::default()).await.unwrap();
        stream.close();
        stream.close();
        assert!(stream.cancel.is_cancelled());
    }
}
