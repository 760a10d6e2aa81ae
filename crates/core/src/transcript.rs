//! Transcript events emitted by the STT collaborator

use serde::{Deserialize, Serialize};

/// A transcription result for the current utterance.
///
/// Interim events are advisory (UI feedback only); only an utterance-final
/// event may trigger turn completion. At most one utterance accumulates per
/// session at a time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptEvent {
    /// Transcribed text so far (interim) or for the whole utterance (final).
    pub text: String,
    /// True for advisory partial results.
    pub is_interim: bool,
    /// True when the STT endpointing decided the utterance is complete.
    /// This is the authoritative turn boundary.
    pub is_utterance_final: bool,
    /// Recognition confidence in [0, 1].
    pub confidence: f32,
}

impl TranscriptEvent {
    pub fn interim(text: impl Into<String>, confidence: f32) -> Self {
        Self {
            text: text.into(),
            is_interim: true,
            is_utterance_final: false,
            confidence,
        }
    }

    pub fn utterance_final(text: impl Into<String>, confidence: f32) -> Self {
        Self {
            text: text.into(),
            is_interim: false,
            is_utterance_final: true,
            confidence,
        }
    }

    /// Empty or whitespace-only transcript counts as "no speech".
    pub fn is_no_speech(&self) -> bool {
        self.text.trim().is_empty()
    }
}
