//! Build provider backends from configuration
//!
//! Fallback chains are ordered, primary first; the pipeline's router walks
//! them on recoverable failures. Chain order is fixed at startup and the
//! `setProvider` control message selects within it.

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use voice_relay_core::{
    Error, LanguageModel, Result, SpeechToText, TextToSpeech,
};

use crate::llm::HttpLlmBackend;
use crate::stt::HttpSttBackend;
use crate::tts::HttpTtsBackend;

/// Build the ordered LLM fallback chain.
pub fn build_llm_chain(
    config: &voice_relay_config::LlmConfig,
) -> Result<Vec<Arc<dyn LanguageModel>>> {
    if config.providers.is_empty() {
        return Err(Error::Internal("no LLM providers configured".to_string()));
    }

    let timeout = Duration::from_secs(config.timeout_secs);
    let mut chain: Vec<Arc<dyn LanguageModel>> = Vec::with_capacity(config.providers.len());
    for provider in &config.providers {
        let backend = HttpLlmBackend::from_provider_config(provider, timeout)?;
        info!(provider = %provider.name, model = %provider.model, "registered LLM provider");
        chain.push(Arc::new(backend));
    }
    Ok(chain)
}

/// Build the ordered TTS fallback chain.
pub fn build_tts_chain(
    config: &voice_relay_config::TtsConfig,
) -> Result<Vec<Arc<dyn TextToSpeech>>> {
    if config.providers.is_empty() {
        return Err(Error::Internal("no TTS providers configured".to_string()));
    }

    let timeout = Duration::from_secs(config.timeout_secs);
    let mut chain: Vec<Arc<dyn TextToSpeech>> = Vec::with_capacity(config.providers.len());
    for provider in &config.providers {
        let backend = HttpTtsBackend::from_provider_config(provider, timeout)?;
        info!(provider = %provider.name, "registered TTS provider");
        chain.push(Arc::new(backend));
    }
    Ok(chain)
}

/// Build the transcription backend.
pub fn build_stt_backend(
    config: &voice_relay_config::SttConfig,
) -> Result<Arc<dyn SpeechToText>> {
    let backend = HttpSttBackend::from_config(config)?;
    info!(endpoint = %config.endpoint, "registered STT backend");
    Ok(Arc::new(backend))
}
