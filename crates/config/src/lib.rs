//! Configuration management for the voice relay
//!
//! Supports loading configuration from:
//! - YAML/TOML files (config/default, config/{env})
//! - Environment variables (VOICE_RELAY_ prefix, `__` separator)

pub mod settings;

pub use settings::{
    load_settings, AudioConfig, AuthConfig, LlmConfig, LlmProviderConfig, ObservabilityConfig,
    RateLimitConfig, RuntimeEnvironment, ServerConfig, Settings, SttConfig, TtsConfig,
    TtsProviderConfig, TurnConfig,
};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    FileNotFound(String),

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}

impl From<config::ConfigError> for ConfigError {
    fn from(err: config::ConfigError) -> Self {
        ConfigError::ParseError(err.to_string())
    }
}
