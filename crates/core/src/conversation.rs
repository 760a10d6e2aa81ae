//! Conversation turns and in-memory history

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::llm::{Message, Role};

/// Role of the speaker in a turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnRole {
    User,
    Assistant,
}

impl TurnRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            TurnRole::User => "user",
            TurnRole::Assistant => "assistant",
        }
    }
}

impl std::fmt::Display for TurnRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One complete exchange unit stored in conversation history.
///
/// User turns are appended only after the utterance is confirmed non-echo;
/// assistant turns only after the full reply text is known, even though
/// audio may still be streaming.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    pub role: TurnRole,
    pub text: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

impl Turn {
    pub fn new(role: TurnRole, text: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            role,
            text: text.into(),
            started_at: now,
            completed_at: now,
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::new(TurnRole::User, text)
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new(TurnRole::Assistant, text)
    }

    pub fn with_started_at(mut self, started_at: DateTime<Utc>) -> Self {
        self.started_at = started_at;
        self
    }
}

/// Ordered conversation history, insertion order significant.
///
/// Unbounded in principle but practically capped: once `max_turns` is
/// reached the oldest turns are dropped, keeping the recent window intact.
#[derive(Debug, Clone, Default)]
pub struct ConversationHistory {
    turns: Vec<Turn>,
    max_turns: usize,
}

impl ConversationHistory {
    pub fn new(max_turns: usize) -> Self {
        Self {
            turns: Vec::new(),
            max_turns,
        }
    }

    pub fn push(&mut self, turn: Turn) {
        self.turns.push(turn);
        if self.max_turns > 0 && self.turns.len() > self.max_turns {
            let overflow = self.turns.len() - self.max_turns;
            self.turns.drain(..overflow);
        }
    }

    pub fn clear(&mut self) {
        self.turns.clear();
    }

    pub fn turn_count(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    /// Text of the most recent assistant turn, if any. Used by the echo
    /// suppressor as the "just played" reference.
    pub fn last_assistant_text(&self) -> Option<&str> {
        self.turns
            .iter()
            .rev()
            .find(|t| t.role == TurnRole::Assistant)
            .map(|t| t.text.as_str())
    }

    /// Render the history as LLM messages, oldest first.
    pub fn messages(&self) -> Vec<Message> {
        self.turns
            .iter()
            .map(|t| Message {
                role: match t.role {
                    TurnRole::User => Role::User,
                    TurnRole::Assistant => Role::Assistant,
                },
                content: t.text.clone(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_history_cap_drops_oldest() {
        let mut history = ConversationHistory::new(3);
        for i in 0..5 {
            history.push(Turn::user(format!("turn {}", i)));
        }
        assert_eq!(history.turn_count(), 3);
        assert_eq!(history.turns()[0].text, "turn 2");
    }

    #[test]
    fn test_last_assistant_text() {
        let mut history = ConversationHistory::new(10);
        assert!(history.last_assistant_text().is_none());

        history.push(Turn::user("hola"));
        history.push(Turn::assistant("Bienvenido a GuestsValencia"));
        history.push(Turn::user("quiero reservar"));

        assert_eq!(
            history.last_assistant_text(),
            Some("Bienvenido a GuestsValencia")
        );
    }

    #[test]
    fn test_messages_preserve_order() {
        let mut history = ConversationHistory::new(10);
        history.push(Turn::user("a"));
        history.push(Turn::assistant("b"));

        let messages = history.messages();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, Role::User);
        assert_eq!(messages[1].role, Role::Assistant);
    }
}
