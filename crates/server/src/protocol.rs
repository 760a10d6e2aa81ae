//! Control-channel wire protocol
//!
//! Inbound JSON control frames are validated against a closed set of
//! message types; an unknown type or malformed payload is rejected as a
//! whole, never partially applied. Binary frames carry audio and bypass
//! this module entirely.

use serde::{Deserialize, Serialize};

use voice_relay_core::{Error, Language, Result};

/// Inbound control frames (client → server).
///
/// Adding a message kind here forces every dispatch site to handle it;
/// there is deliberately no catch-all variant.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum InboundMessage {
    SetLanguage { language: String },
    SetProvider { provider: String },
    Reset,
    Ping,
}

impl InboundMessage {
    /// Parse and validate one inbound control frame.
    pub fn parse(raw: &str) -> Result<Self> {
        serde_json::from_str(raw)
            .map_err(|e| Error::InvalidInput(format!("malformed control message: {}", e)))
    }

    /// Resolve a `setLanguage` code against the fixed allow-list.
    pub fn resolve_language(code: &str) -> Result<Language> {
        Language::from_code(code).ok_or_else(|| {
            Error::InvalidInput(format!(
                "unsupported language '{}' (supported: {})",
                code,
                Language::all()
                    .iter()
                    .map(|l| l.code())
                    .collect::<Vec<_>>()
                    .join(", ")
            ))
        })
    }
}

/// Outbound control frames (server → client). Audio goes out as separate
/// binary frames.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundMessage {
    Connected {
        #[serde(rename = "sessionId")]
        session_id: String,
    },
    /// Final transcript only; interim results stay server-side.
    Transcription { text: String },
    /// One streamed LLM text chunk.
    Text { content: String },
    ResponseComplete {
        text: String,
        /// Unix epoch milliseconds.
        timestamp: i64,
    },
    Error {
        code: String,
        message: String,
    },
    Pong,
    /// The utterance contained no recognizable speech.
    NoSpeech,
    /// The transcription stream died; the client may restart listening.
    ListeningStopped { reason: String },
}

impl OutboundMessage {
    pub fn error(err: &Error) -> Self {
        Self::Error {
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }

    pub fn response_complete(text: String) -> Self {
        Self::ResponseComplete {
            text,
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }

    /// Serialize for the wire. Serialization of these variants cannot fail;
    /// a failure here is a programming error worth surfacing loudly in logs.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| {
            tracing::error!(error = %e, "failed to serialize outbound message");
            r#"{"type":"error","code":"INTERNAL","message":"serialization failure"}"#.to_string()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inbound_allow_list() {
        assert_eq!(
            InboundMessage::parse(r#"{"type":"setLanguage","language":"es"}"#).unwrap(),
            InboundMessage::SetLanguage {
                language: "es".to_string()
            }
        );
        assert_eq!(
            InboundMessage::parse(r#"{"type":"setProvider","provider":"local"}"#).unwrap(),
            InboundMessage::SetProvider {
                provider: "local".to_string()
            }
        );
        assert_eq!(
            InboundMessage::parse(r#"{"type":"reset"}"#).unwrap(),
            InboundMessage::Reset
        );
        assert_eq!(
            InboundMessage::parse(r#"{"type":"ping"}"#).unwrap(),
            InboundMessage::Ping
        );
    }

    #[test]
    fn test_unknown_type_rejected() {
        let err = InboundMessage::parse(r#"{"type":"shutdown"}"#).unwrap_err();
        assert_eq!(err.code(), "INVALID_INPUT");
    }

    #[test]
    fn test_missing_field_rejected() {
        let err = InboundMessage::parse(r#"{"type":"setLanguage"}"#).unwrap_err();
        assert_eq!(err.code(), "INVALID_INPUT");
    }

    #[test]
    fn test_language_allow_list() {
        assert!(InboundMessage::resolve_language("es").is_ok());
        assert!(InboundMessage::resolve_language("EN").is_ok());
        assert!(InboundMessage::resolve_language("xx").is_err());
    }

    #[test]
    fn test_outbound_wire_shapes() {
        let json = OutboundMessage::Connected {
            session_id: "abc".to_string(),
        }
        .to_json();
        assert_eq!(json, r#"{"type":"connected","sessionId":"abc"}"#);

        let json = OutboundMessage::Text {
            content: "hola".to_string(),
        }
        .to_json();
        assert_eq!(json, r#"{"type":"text","content":"hola"}"#);

        let json = OutboundMessage::response_complete("hola".to_string()).to_json();
        assert!(json.starts_with(r#"{"type":"response_complete","text":"hola","#));

        assert_eq!(OutboundMessage::Pong.to_json(), r#"{"type":"pong"}"#);
    }
}
