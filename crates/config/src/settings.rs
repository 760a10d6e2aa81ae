//! Main settings module

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use voice_relay_core::Language;

use crate::ConfigError;

/// Runtime environment enum
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeEnvironment {
    #[default]
    Development,
    Staging,
    Production,
}

impl RuntimeEnvironment {
    pub fn is_production(&self) -> bool {
        matches!(self, Self::Production)
    }
}

/// Main application settings
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Settings {
    #[serde(default)]
    pub environment: RuntimeEnvironment,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub audio: AudioConfig,

    #[serde(default)]
    pub stt: SttConfig,

    #[serde(default)]
    pub turn: TurnConfig,

    #[serde(default)]
    pub llm: LlmConfig,

    #[serde(default)]
    pub tts: TtsConfig,

    #[serde(default)]
    pub auth: AuthConfig,

    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    #[serde(default)]
    pub observability: ObservabilityConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    /// Maximum concurrent live sessions.
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,

    /// Seconds of no inbound frames/messages before the session is closed.
    #[serde(default = "default_inactivity_timeout_secs")]
    pub inactivity_timeout_secs: u64,

    /// Heartbeat probe interval in seconds. Two missed probes terminate
    /// the connection.
    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,

    /// Capacity of the per-session outbound queue. A full queue pauses
    /// the producers rather than dropping items.
    #[serde(default = "default_outbound_queue_depth")]
    pub outbound_queue_depth: usize,
}

fn default_port() -> u16 {
    8080
}

fn default_max_sessions() -> usize {
    256
}

fn default_inactivity_timeout_secs() -> u64 {
    300
}

fn default_heartbeat_interval_secs() -> u64 {
    30
}

fn default_outbound_queue_depth() -> usize {
    128
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            max_sessions: default_max_sessions(),
            inactivity_timeout_secs: default_inactivity_timeout_secs(),
            heartbeat_interval_secs: default_heartbeat_interval_secs(),
            outbound_queue_depth: default_outbound_queue_depth(),
        }
    }
}

/// Inbound audio configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfig {
    /// Minimum accepted binary frame size in bytes.
    #[serde(default = "default_min_frame_bytes")]
    pub min_frame_bytes: usize,

    /// Maximum accepted binary frame size in bytes.
    #[serde(default = "default_max_frame_bytes")]
    pub max_frame_bytes: usize,
}

fn default_min_frame_bytes() -> usize {
    1
}

fn default_max_frame_bytes() -> usize {
    64 * 1024
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            min_frame_bytes: default_min_frame_bytes(),
            max_frame_bytes: default_max_frame_bytes(),
        }
    }
}

/// STT collaborator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SttConfig {
    /// Endpoint of the streaming transcription service.
    #[serde(default = "default_stt_endpoint")]
    pub endpoint: String,

    /// Trailing silence (ms) after which the STT endpointing emits an
    /// utterance-final event.
    #[serde(default = "default_silence_threshold_ms")]
    pub silence_threshold_ms: u64,

    /// Request interim (advisory) results.
    #[serde(default = "default_true")]
    pub interim_results: bool,

    /// Environment variable holding the API key, if the endpoint needs one.
    #[serde(default)]
    pub api_key_env: Option<String>,

    /// Per-request transcription timeout.
    #[serde(default = "default_stt_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_stt_endpoint() -> String {
    "http://127.0.0.1:9000".to_string()
}

fn default_silence_threshold_ms() -> u64 {
    300
}

fn default_true() -> bool {
    true
}

fn default_stt_timeout_secs() -> u64 {
    10
}

impl Default for SttConfig {
    fn default() -> Self {
        Self {
            endpoint: default_stt_endpoint(),
            silence_threshold_ms: default_silence_threshold_ms(),
            interim_results: true,
            api_key_env: None,
            timeout_secs: default_stt_timeout_secs(),
        }
    }
}

/// Turn controller (echo suppression) configuration
///
/// The thresholds are heuristic and tuned empirically; they are kept
/// configurable rather than hard-coded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnConfig {
    /// Minimum normalized length for the containment check to classify a
    /// transcript as echo.
    #[serde(default = "default_echo_containment_min_chars")]
    pub echo_containment_min_chars: usize,

    /// Similarity ratio (1 - distance/maxLen) above which a transcript is
    /// classified as echo.
    #[serde(default = "default_echo_similarity_threshold")]
    pub echo_similarity_threshold: f64,

    /// Practical cap on stored conversation turns.
    #[serde(default = "default_max_history_turns")]
    pub max_history_turns: usize,
}

fn default_echo_containment_min_chars() -> usize {
    10
}

fn default_echo_similarity_threshold() -> f64 {
    0.8
}

fn default_max_history_turns() -> usize {
    100
}

impl Default for TurnConfig {
    fn default() -> Self {
        Self {
            echo_containment_min_chars: default_echo_containment_min_chars(),
            echo_similarity_threshold: default_echo_similarity_threshold(),
            max_history_turns: default_max_history_turns(),
        }
    }
}

/// One configured LLM provider endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmProviderConfig {
    /// Name used by `setProvider` and in logs.
    pub name: String,
    /// OpenAI-compatible chat completions endpoint.
    pub endpoint: String,
    pub model: String,
    /// Environment variable holding the API key, if the endpoint needs one.
    #[serde(default)]
    pub api_key_env: Option<String>,
}

/// LLM router configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Ordered fallback list, primary first.
    #[serde(default = "default_llm_providers")]
    pub providers: Vec<LlmProviderConfig>,

    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Per-call deadline in seconds; exceeding it counts as that
    /// provider's failure.
    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_llm_providers() -> Vec<LlmProviderConfig> {
    vec![LlmProviderConfig {
        name: "local".to_string(),
        endpoint: "http://127.0.0.1:11434/v1".to_string(),
        model: "llama3.1:8b".to_string(),
        api_key_env: None,
    }]
}

fn default_system_prompt() -> String {
    "You are a helpful voice concierge. Respond concisely and naturally; \
     your replies will be spoken aloud."
        .to_string()
}

fn default_max_tokens() -> u32 {
    512
}

fn default_temperature() -> f32 {
    0.7
}

fn default_llm_timeout_secs() -> u64 {
    30
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            providers: default_llm_providers(),
            system_prompt: default_system_prompt(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            timeout_secs: default_llm_timeout_secs(),
        }
    }
}

/// One configured TTS provider endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TtsProviderConfig {
    pub name: String,
    pub endpoint: String,
    #[serde(default)]
    pub voice_id: Option<String>,
    #[serde(default)]
    pub api_key_env: Option<String>,
}

/// TTS synthesizer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TtsConfig {
    /// Ordered fallback list, primary first.
    #[serde(default = "default_tts_providers")]
    pub providers: Vec<TtsProviderConfig>,

    /// Per-chunk synthesis deadline in seconds.
    #[serde(default = "default_tts_timeout_secs")]
    pub timeout_secs: u64,

    /// Maximum chunk synthesis tasks in flight per reply. Emission stays
    /// strictly ordered regardless.
    #[serde(default = "default_synth_concurrency")]
    pub synth_concurrency: usize,
}

fn default_tts_providers() -> Vec<TtsProviderConfig> {
    vec![TtsProviderConfig {
        name: "local".to_string(),
        endpoint: "http://127.0.0.1:9100".to_string(),
        voice_id: None,
        api_key_env: None,
    }]
}

fn default_tts_timeout_secs() -> u64 {
    15
}

fn default_synth_concurrency() -> usize {
    2
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            providers: default_tts_providers(),
            timeout_secs: default_tts_timeout_secs(),
            synth_concurrency: default_synth_concurrency(),
        }
    }
}

/// Token bootstrap configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Require a valid token at connection open. Disabled by default for
    /// development.
    #[serde(default)]
    pub require_token: bool,

    /// Token lifetime in seconds.
    #[serde(default = "default_token_ttl_secs")]
    pub token_ttl_secs: u64,
}

fn default_token_ttl_secs() -> u64 {
    600
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            require_token: false,
            token_ttl_secs: default_token_ttl_secs(),
        }
    }
}

/// Per-connection rate limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Control messages allowed per window.
    #[serde(default = "default_messages_per_window")]
    pub messages_per_window: u32,

    /// Audio bytes allowed per window.
    #[serde(default = "default_audio_bytes_per_window")]
    pub audio_bytes_per_window: usize,

    /// Window length in seconds.
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
}

fn default_messages_per_window() -> u32 {
    120
}

fn default_audio_bytes_per_window() -> usize {
    2 * 1024 * 1024
}

fn default_window_secs() -> u64 {
    10
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            messages_per_window: default_messages_per_window(),
            audio_bytes_per_window: default_audio_bytes_per_window(),
            window_secs: default_window_secs(),
        }
    }
}

/// Observability configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Emit logs as JSON lines.
    #[serde(default)]
    pub log_json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_json: false,
        }
    }
}

impl Settings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Default language for new sessions. Kept on the core type so the
    /// fixed allow-list lives in one place.
    pub fn default_language(&self) -> Language {
        Language::default()
    }

    /// Validate settings
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.validate_audio()?;
        self.validate_turn()?;
        self.validate_providers()?;
        self.validate_server()?;
        Ok(())
    }

    fn validate_audio(&self) -> Result<(), ConfigError> {
        if self.audio.min_frame_bytes == 0 {
            return Err(ConfigError::InvalidValue {
                field: "audio.min_frame_bytes".to_string(),
                message: "Must be at least 1 (empty frames are rejected)".to_string(),
            });
        }
        if self.audio.max_frame_bytes <= self.audio.min_frame_bytes {
            return Err(ConfigError::InvalidValue {
                field: "audio.max_frame_bytes".to_string(),
                message: format!(
                    "Must be greater than min_frame_bytes ({})",
                    self.audio.min_frame_bytes
                ),
            });
        }
        Ok(())
    }

    fn validate_turn(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.turn.echo_similarity_threshold) {
            return Err(ConfigError::InvalidValue {
                field: "turn.echo_similarity_threshold".to_string(),
                message: format!(
                    "Must be between 0.0 and 1.0, got {}",
                    self.turn.echo_similarity_threshold
                ),
            });
        }
        if self.turn.max_history_turns == 0 {
            return Err(ConfigError::InvalidValue {
                field: "turn.max_history_turns".to_string(),
                message: "Must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    fn validate_providers(&self) -> Result<(), ConfigError> {
        if self.llm.providers.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "llm.providers".to_string(),
                message: "At least one provider is required".to_string(),
            });
        }
        if self.tts.providers.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "tts.providers".to_string(),
                message: "At least one provider is required".to_string(),
            });
        }
        if self.tts.synth_concurrency == 0 {
            return Err(ConfigError::InvalidValue {
                field: "tts.synth_concurrency".to_string(),
                message: "Must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    fn validate_server(&self) -> Result<(), ConfigError> {
        if self.server.heartbeat_interval_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "server.heartbeat_interval_secs".to_string(),
                message: "Must be at least 1 second".to_string(),
            });
        }
        if self.server.inactivity_timeout_secs < self.server.heartbeat_interval_secs {
            return Err(ConfigError::InvalidValue {
                field: "server.inactivity_timeout_secs".to_string(),
                message: "Must not be shorter than the heartbeat interval".to_string(),
            });
        }
        if self.server.outbound_queue_depth == 0 {
            return Err(ConfigError::InvalidValue {
                field: "server.outbound_queue_depth".to_string(),
                message: "Must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

/// Load settings from files and environment.
///
/// Priority: env vars > config/{env}.yaml > config/default.yaml > defaults.
pub fn load_settings(env: Option<&str>) -> Result<Settings, ConfigError> {
    let mut builder = Config::builder();

    builder = builder.add_source(File::with_name("config/default").required(false));

    if let Some(env_name) = env {
        builder =
            builder.add_source(File::with_name(&format!("config/{}", env_name)).required(false));
    }

    builder = builder.add_source(
        Environment::with_prefix("VOICE_RELAY")
            .separator("__")
            .try_parsing(true),
    );

    let config = builder.build()?;
    let settings: Settings = config.try_deserialize()?;

    settings.validate()?;

    Ok(settings)
}
