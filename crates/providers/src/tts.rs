//! Per-chunk HTTP synthesis backend
//!
//! One POST per text chunk returning encoded audio bytes. Ordering across
//! chunks is the synthesizer's job; this backend only handles a single
//! chunk and honors cancellation mid-flight.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use voice_relay_core::{Error, Result, TextToSpeech, VoiceConfig};

use crate::{map_reqwest_error, map_status, resolve_api_key};

/// Configuration for one synthesis endpoint.
#[derive(Debug, Clone)]
pub struct HttpTtsConfig {
    pub name: String,
    /// Base URL; `/synthesize` is appended.
    pub endpoint: String,
    /// Provider-specific voice identifier. Overrides the per-session voice
    /// when the session does not name one.
    pub voice_id: Option<String>,
    pub api_key: Option<String>,
    pub timeout: Duration,
}

/// HTTP synthesis backend.
pub struct HttpTtsBackend {
    config: HttpTtsConfig,
    client: Client,
}

impl HttpTtsBackend {
    pub fn new(config: HttpTtsConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| Error::Internal(e.to_string()))?;
        Ok(Self { config, client })
    }

    pub fn from_provider_config(
        provider: &voice_relay_config::TtsProviderConfig,
        timeout: Duration,
    ) -> Result<Self> {
        Self::new(HttpTtsConfig {
            name: provider.name.clone(),
            endpoint: provider.endpoint.clone(),
            voice_id: provider.voice_id.clone(),
            api_key: resolve_api_key(provider.api_key_env.as_deref()),
            timeout,
        })
    }
}

#[async_trait]
impl TextToSpeech for HttpTtsBackend {
    async fn synthesize(
        &self,
        text: &str,
        voice: &VoiceConfig,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>> {
        let body = SynthesizeRequest {
            text,
            language: voice.language.code(),
            voice_id: voice
                .voice_id
                .as_deref()
                .or(self.config.voice_id.as_deref()),
            speaking_rate: voice.speaking_rate,
        };

        let mut req = self
            .client
            .post(format!("{}/synthesize", self.config.endpoint))
            .json(&body);
        if let Some(key) = &self.config.api_key {
            req = req.bearer_auth(key);
        }

        let response = tokio::select! {
            res = req.send() => res.map_err(|e| map_reqwest_error(e, self.config.timeout))?,
            _ = cancel.cancelled() => return Err(Error::Cancelled),
        };

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(map_status(status, &body));
        }

        let audio = tokio::select! {
            bytes = response.bytes() => {
                bytes.map_err(|e| map_reqwest_error(e, self.config.timeout))?
            }
            _ = cancel.cancelled() => return Err(Error::Cancelled),
        };

        Ok(audio.to_vec())
    }

    fn name(&self) -> &str {
        &self.config.name
    }
}

#[derive(Debug, Serialize)]
struct SynthesizeRequest<'a> {
    text: &'a str,
    language: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    voice_id: Option<&'a str>,
    speaking_rate: f32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_serialization() {
        let body = SynthesizeRequest {
            text: "Bienvenido a GuestsValencia",
            language: "es",
            voice_id: Some("nova"),
            speaking_rate: 1.0,
        };
        let json = serde_json::to_string(&body).unwrap();
        assert!(json.contains("Bienvenido"));
        assert!(json.contains("\"language\":\"es\""));
        assert!(json.contains("nova"));
    }

    #[test]
    fn test_voice_id_omitted_when_absent() {
        let body = SynthesizeRequest {
            text: "hola",
            language: "es",
            voice_id: None,
            speaking_rate: 1.2,
        };
        let json = serde_json::to_string(&body).unwrap();
        assert!(!json.contains("voice_id"));
    }
}
