//! Document class domain model

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

/// A category of medical document (lab report, discharge letter, ...)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentClass {
    pub id: String,

    /// Unique upper-case key emitted by the branching step
    pub key: String,

    pub display_name: String,

    #[serde(default = "default_true")]
    pub enabled: bool,

    /// System classes keep their key and cannot be deleted
    #[serde(default)]
    pub is_system: bool,

    #[serde(default)]
    pub description: Option<String>,

    /// Keywords that strongly suggest this class
    #[serde(default)]
    pub strong_indicators: Vec<String>,

    /// Keywords that weakly suggest this class
    #[serde(default)]
    pub weak_indicators: Vec<String>,

    /// Short example snippets
    #[serde(default)]
    pub examples: Vec<String>,
}

fn default_true() -> bool {
    true
}

impl DocumentClass {
    pub fn new(id: impl Into<String>, key: &str, display_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            key: normalize_key(key),
            display_name: display_name.into(),
            enabled: true,
            is_system: false,
            description: None,
            strong_indicators: Vec::new(),
            weak_indicators: Vec::new(),
            examples: Vec::new(),
        }
    }

    pub fn system(mut self) -> Self {
        self.is_system = true;
        self
    }

    pub fn with_indicators(mut self, strong: &[&str], weak: &[&str]) -> Self {
        self.strong_indicators = strong.iter().map(|s| s.to_string()).collect();
        self.weak_indicators = weak.iter().map(|s| s.to_string()).collect();
        self
    }
}

/// Upper-case a key and replace separators with underscores
pub fn normalize_key(key: &str) -> String {
    key.trim()
        .split(|c: char| c.is_whitespace() || c == '-')
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("_")
        .to_uppercase()
}

/// Keys are upper-case ASCII identifiers starting with a letter
pub fn is_valid_key(key: &str) -> bool {
    static KEY: OnceLock<Regex> = OnceLock::new();
    KEY.get_or_init(|| Regex::new(r"^[A-Z][A-Z0-9_]*$").expect("key pattern is valid"))
        .is_match(key)
}
