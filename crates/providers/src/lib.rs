//! HTTP streaming provider backends
//!
//! One backend per capability contract:
//! - `HttpLlmBackend` - OpenAI-compatible chat completions with SSE streaming
//! - `HttpTtsBackend` - per-chunk synthesis endpoint returning audio bytes
//! - `HttpSttBackend` - buffering transcription endpoint with silence endpointing
//!
//! The registry builds ordered fallback chains from configuration. Vendors
//! beyond these generic wire shapes are out of scope; the pipeline depends
//! only on the core capability traits.

pub mod llm;
pub mod registry;
pub mod stt;
pub mod tts;

pub use llm::HttpLlmBackend;
pub use registry::{build_llm_chain, build_stt_backend, build_tts_chain};
pub use stt::HttpSttBackend;
pub use tts::HttpTtsBackend;

use voice_relay_core::Error;

/// Map a transport-level failure onto the relay taxonomy.
///
/// Timeouts count as the provider's failure (fallback); everything else
/// transport-ish is a temporary unavailability.
pub(crate) fn map_reqwest_error(err: reqwest::Error, timeout: std::time::Duration) -> Error {
    if err.is_timeout() {
        Error::Timeout(timeout)
    } else {
        Error::TemporaryUnavailable(err.to_string())
    }
}

/// Map a non-2xx status onto the relay taxonomy.
pub(crate) fn map_status(status: reqwest::StatusCode, body: &str) -> Error {
    if status.as_u16() == 429 {
        Error::RateLimited(format!("HTTP 429: {}", body))
    } else {
        Error::TemporaryUnavailable(format!("HTTP {}: {}", status, body))
    }
}

/// Resolve an API key from the environment variable named in config.
pub(crate) fn resolve_api_key(api_key_env: Option<&str>) -> Option<String> {
    api_key_env.and_then(|var| std::env::var(var).ok())
}
