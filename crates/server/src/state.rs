//! Application state
//!
//! Shared state across all handlers. Provider backends are built once at
//! startup and shared by every session; per-session state lives in the
//! session task, never here.

use std::sync::Arc;
use std::time::Duration;

use voice_relay_config::Settings;
use voice_relay_core::SpeechToText;
use voice_relay_pipeline::{ReplyPipeline, ReplyRouter, ReplySynthesizer};
use voice_relay_providers::{build_llm_chain, build_stt_backend, build_tts_chain};

use crate::auth::TokenStore;
use crate::session::SessionRegistry;
use crate::ServerError;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Settings>,
    pub sessions: Arc<SessionRegistry>,
    pub pipeline: Arc<ReplyPipeline>,
    pub stt: Arc<dyn SpeechToText>,
    pub tokens: Arc<TokenStore>,
}

impl AppState {
    /// Build state with HTTP provider backends from configuration.
    pub fn new(config: Settings) -> Result<Self, ServerError> {
        let llm_chain =
            build_llm_chain(&config.llm).map_err(|e| ServerError::Internal(e.to_string()))?;
        let tts_chain =
            build_tts_chain(&config.tts).map_err(|e| ServerError::Internal(e.to_string()))?;
        let stt =
            build_stt_backend(&config.stt).map_err(|e| ServerError::Internal(e.to_string()))?;

        let pipeline = ReplyPipeline::new(
            ReplyRouter::new(llm_chain),
            ReplySynthesizer::new(tts_chain, config.tts.synth_concurrency),
        );

        Ok(Self::with_providers(config, stt, pipeline))
    }

    /// Build state around pre-built backends. Tests use this with mocks.
    pub fn with_providers(
        config: Settings,
        stt: Arc<dyn SpeechToText>,
        pipeline: ReplyPipeline,
    ) -> Self {
        let sessions = Arc::new(SessionRegistry::new(
            config.server.max_sessions,
            Duration::from_secs(config.server.inactivity_timeout_secs),
        ));
        let tokens = Arc::new(TokenStore::new(Duration::from_secs(
            config.auth.token_ttl_secs,
        )));

        Self {
            config: Arc::new(config),
            sessions,
            pipeline: Arc::new(pipeline),
            stt,
            tokens,
        }
    }
}
