//! OpenAI-compatible streaming LLM backend
//!
//! Speaks the chat-completions wire shape with SSE streaming, which local
//! runtimes (Ollama, vLLM) and most hosted vendors expose. Text deltas are
//! forwarded to the caller's channel as they arrive.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use voice_relay_core::{Error, GenerateRequest, LanguageModel, Result, Role};

use crate::{map_reqwest_error, map_status, resolve_api_key};

/// Configuration for one OpenAI-compatible endpoint.
#[derive(Debug, Clone)]
pub struct HttpLlmConfig {
    pub name: String,
    /// Base URL; `/chat/completions` is appended.
    pub endpoint: String,
    pub model: String,
    pub api_key: Option<String>,
    pub timeout: Duration,
}

/// OpenAI-compatible streaming backend.
pub struct HttpLlmBackend {
    config: HttpLlmConfig,
    client: Client,
}

impl HttpLlmBackend {
    pub fn new(config: HttpLlmConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| Error::Internal(e.to_string()))?;
        Ok(Self { config, client })
    }

    pub fn from_provider_config(
        provider: &voice_relay_config::LlmProviderConfig,
        timeout: Duration,
    ) -> Result<Self> {
        Self::new(HttpLlmConfig {
            name: provider.name.clone(),
            endpoint: provider.endpoint.clone(),
            model: provider.model.clone(),
            api_key: resolve_api_key(provider.api_key_env.as_deref()),
            timeout,
        })
    }

    fn build_request(&self, request: &GenerateRequest) -> ChatRequest {
        ChatRequest {
            model: self.config.model.clone(),
            messages: request
                .messages
                .iter()
                .map(|m| ChatMessage {
                    role: match m.role {
                        Role::System => "system",
                        Role::User => "user",
                        Role::Assistant => "assistant",
                    }
                    .to_string(),
                    content: m.content.clone(),
                })
                .collect(),
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            stream: true,
        }
    }
}

#[async_trait]
impl LanguageModel for HttpLlmBackend {
    async fn generate_stream(
        &self,
        request: &GenerateRequest,
        tx: mpsc::Sender<String>,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let body = self.build_request(request);

        let mut req = self
            .client
            .post(format!("{}/chat/completions", self.config.endpoint))
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

        // Process the SSE stream line by line. Lines are split at the byte
        // level before decoding, so a multi-byte character straddling two
        // network chunks stays intact.
        let mut stream = response.bytes_stream();
        let mut buffer: Vec<u8> = Vec::new();
        let mut full_text = String::new();

        loop {
            let chunk = tokio::select! {
                chunk = stream.next() => match chunk {
                    Some(chunk) => chunk.map_err(|e| map_reqwest_error(e, self.config.timeout))?,
                    None => break,
                },
                _ = cancel.cancelled() => return Err(Error::Cancelled),
            };
            buffer.extend_from_slice(&chunk);

            while let Some(line) = take_line(&mut buffer) {
                if line.is_empty() {
                    continue;
                }

                if let Some(json_str) = line.strip_prefix("data: ") {
                    if json_str == "[DONE]" {
                        continue;
                    }

                    let event: ChatStreamChunk = serde_json::from_str(json_str)
                        .map_err(|e| {
                            Error::TemporaryUnavailable(format!(
                                "malformed streaming payload: {}",
                                e
                            ))
                        })?;

                    if let Some(choice) = event.choices.first() {
                        if let Some(content) = &choice.delta.content {
                            if !content.is_empty() {
                                full_text.push_str(content);
                                // A closed receiver means the consumer is gone
                                // (barge-in raced the token); stop generating.
                                if tx.send(content.clone()).await.is_err() {
                                    return Err(Error::Cancelled);
                                }
                            }
                        }
                    }
                }
            }
        }

        Ok(full_text)
    }

    fn name(&self) -> &str {
        &self.config.name
    }
}

/// Pop the next complete `\n`-terminated line off the byte buffer, decoded
/// and trimmed. Incomplete trailing bytes stay buffered.
fn take_line(buffer: &mut Vec<u8>) -> Option<String> {
    let pos = buffer.iter().position(|&b| b == b'\n')?;
    let line: Vec<u8> = buffer.drain(..=pos).collect();
    Some(String::from_utf8_lossy(&line).trim().to_string())
}

// =============================================================================
// Wire types
// =============================================================================

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
    temperature: f32,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatStreamChunk {
    choices: Vec<ChatStreamChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatStreamChoice {
    delta: ChatDelta,
}

#[derive(Debug, Deserialize, Default)]
struct ChatDelta {
    #[serde(default)]
    content: Option<String>,
}
