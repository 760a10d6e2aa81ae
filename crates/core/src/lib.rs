//! Core types and capability traits for the voice relay
//!
//! This crate provides the foundational pieces shared by every other crate:
//! - Capability traits for the streaming collaborators (STT, LLM, TTS)
//! - Audio frame and transcript event types
//! - Conversation history types
//! - The error taxonomy with stable wire codes

pub mod audio;
pub mod conversation;
pub mod error;
pub mod language;
pub mod llm;
pub mod traits;
pub mod transcript;

pub use audio::{AudioFrame, FrameBounds};
pub use conversation::{ConversationHistory, Turn, TurnRole};
pub use error::{Error, Result};
pub use language::Language;
pub use llm::{GenerateRequest, Message, Role};
pub use traits::{
    LanguageModel, SpeechToText, SttStream, SttStreamConfig, TextToSpeech, VoiceConfig,
};
pub use transcript::TranscriptEvent;
