//! Transcript turn control
//!
//! Decides whether an utterance-final transcript is genuine user speech or
//! an echo of the assistant's own just-played audio. Acoustic echo
//! cancellation happens upstream in hardware/OS; this guards the residual
//! case where the microphone partially re-captures speaker output.

use tracing::debug;

/// Outcome for one utterance-final transcript.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnDecision {
    /// Empty or whitespace-only transcript. The client is notified; this is
    /// not an error.
    NoSpeech,
    /// Self-heard playback; dropped without notification.
    Echo,
    /// Genuine user speech, ready for the language model.
    Genuine,
}

/// Echo-suppression controller.
///
/// Thresholds are heuristic and tuned empirically, so they come from
/// configuration rather than constants.
#[derive(Debug, Clone)]
pub struct TurnController {
    containment_min_chars: usize,
    similarity_threshold: f64,
}

impl TurnController {
    pub fn new(config: &voice_relay_config::TurnConfig) -> Self {
        Self {
            containment_min_chars: config.echo_containment_min_chars,
            similarity_threshold: config.echo_similarity_threshold,
        }
    }

    /// Classify one utterance-final transcript against the most recently
    /// played assistant text.
    pub fn classify(&self, transcript: &str, last_assistant_text: Option<&str>) -> TurnDecision {
        if transcript.trim().is_empty() {
            return TurnDecision::NoSpeech;
        }

        let candidate = normalize(transcript);
        if candidate.is_empty() {
            return TurnDecision::NoSpeech;
        }

        let Some(played) = last_assistant_text else {
            return TurnDecision::Genuine;
        };
        let played = normalize(played);
        if played.is_empty() {
            return TurnDecision::Genuine;
        }

        if candidate.chars().count() > self.containment_min_chars && played.contains(&candidate) {
            debug!("transcript contained in last assistant text, dropped as echo");
            return TurnDecision::Echo;
        }

        let similarity = similarity_ratio(&candidate, &played);
        if similarity > self.similarity_threshold {
            debug!(similarity, "transcript too similar to last assistant text, dropped as echo");
            return TurnDecision::Echo;
        }

        TurnDecision::Genuine
    }
}

/// Lowercase, strip punctuation, collapse whitespace.
fn normalize(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut last_was_space = true;
    for c in text.chars() {
        if c.is_alphanumeric() {
            for lower in c.to_lowercase() {
                out.push(lower);
            }
            last_was_space = false;
        } else if c.is_whitespace() && !last_was_space {
            out.push(' ');
            last_was_space = true;
        }
    }
    while out.ends_with(' ') {
        out.pop();
    }
    out
}

/// `1 - distance/maxLen`, on normalized strings.
fn similarity_ratio(a: &str, b: &str) -> f64 {
    let a_len = a.chars().count();
    let b_len = b.chars().count();
    let max_len = a_len.max(b_len);
    if max_len == 0 {
        return 1.0;
    }
    1.0 - (levenshtein(a, b) as f64 / max_len as f64)
}

/// Two-row Levenshtein distance over characters.
fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();

    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0usize; b.len() + 1];

    for (i, ca) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != cb);
            curr[j + 1] = (prev[j + 1] + 1).min(curr[j] + 1).min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[b.len()]
}
