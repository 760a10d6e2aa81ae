//! Supported conversation languages

use serde::{Deserialize, Serialize};

/// The fixed set of languages the relay accepts via `setLanguage`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    #[default]
    Spanish,
    English,
    French,
    German,
    Italian,
    Portuguese,
}

impl Language {
    /// ISO 639-1 code used on the wire and in provider requests.
    pub fn code(&self) -> &'static str {
        match self {
            Language::Spanish => "es",
            Language::English => "en",
            Language::French => "fr",
            Language::German => "de",
            Language::Italian => "it",
            Language::Portuguese => "pt",
        }
    }

    /// Parse a wire code. Unknown codes are a validation error for the
    /// protocol handler, so this returns `None` rather than defaulting.
    pub fn from_code(code: &str) -> Option<Self> {
        match code.to_ascii_lowercase().as_str() {
            "es" => Some(Language::Spanish),
            "en" => Some(Language::English),
            "fr" => Some(Language::French),
            "de" => Some(Language::German),
            "it" => Some(Language::Italian),
            "pt" => Some(Language::Portuguese),
            _ => None,
        }
    }

    pub fn all() -> &'static [Language] {
        &[
            Language::Spanish,
            Language::English,
            Language::French,
            Language::German,
            Language::Italian,
            Language::Portuguese,
        ]
    }
}

impl std::fmt::Display for Language {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.code())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_round_trip() {
        for lang in Language::all() {
            assert_eq!(Language::from_code(lang.code()), Some(*lang));
        }
    }

    #[test]
    fn test_unknown_code_rejected() {
        assert_eq!(Language::from_code("xx"), None);
        assert_eq!(Language::from_code(""), None);
    }

    #[test]
    fn test_case_insensitive() {
        assert_eq!(Language::from_code("ES"), Some(Language::Spanish));
    }
}
