//! Incoming questions and their classification
//!
//! A `Query` is built once per question and never mutated afterwards; the
//! classifier produces exactly one `Classification` for it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

// ============================================================================
// QUERY - A user question plus its conversation context
// ============================================================================

/// Speaker of a previous conversation turn
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
}

impl std::fmt::Display for ChatRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::User => write!(f, "user"),
            Self::Assistant => write!(f, "assistant"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatTurn {
    pub role: ChatRole,
    pub content: String,
}

impl ChatTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self { role: ChatRole::User, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: ChatRole::Assistant, content: content.into() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Query {
    pub text: String,
    pub received_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// Earlier turns of the same conversation, oldest first
    #[serde(default)]
    pub history: Vec<ChatTurn>,
}

impl Query {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            received_at: Utc::now(),
            session_id: None,
            user_id: None,
            history: Vec::new(),
        }
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_history(mut self, history: Vec<ChatTurn>) -> Self {
        self.history = history;
        self
    }

    pub fn is_blank(&self) -> bool {
        self.text.trim().is_empty()
    }

    /// Whether the structured store can be scoped to this caller
    pub fn has_identity(&self) -> bool {
        self.user_id.is_some() || self.session_id.is_some()
    }

    /// The last `window` turns, oldest first.
    pub fn recent_history(&self, window: usize) -> &[ChatTurn] {
        let start = self.history.len().saturating_sub(window);
        &self.history[start..]
    }
}

// ============================================================================
// CATEGORY - Closed set of question intents
// ============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    /// Account data, tickets, personal records
    Account,
    /// Technical problems needing how-to or diagnostic content
    Troubleshooting,
    /// Policies, procedures, internal documentation
    Knowledge,
}

impl Category {
    pub const ALL: [Category; 3] = [Category::Account, Category::Troubleshooting, Category::Knowledge];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Account => "account",
            Self::Troubleshooting => "troubleshooting",
            Self::Knowledge => "knowledge",
        }
    }
}

impl Default for Category {
    fn default() -> Self {
        Self::Knowledge
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "account" => Ok(Self::Account),
            "troubleshooting" => Ok(Self::Troubleshooting),
            "knowledge" => Ok(Self::Knowledge),
            other => Err(format!("unknown category '{}'", other)),
        }
    }
}

// ============================================================================
// CLASSIFICATION
// ============================================================================

/// Which step produced a classification
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ClassificationMethod {
    Heuristic,
    Generative,
    FallbackDefault,
}

impl ClassificationMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Heuristic => "heuristic",
            Self::Generative => "generative",
            Self::FallbackDefault => "fallback_default",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Classification {
    pub category: Category,
    /// Always within [0, 1]
    pub confidence: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rationale: Option<String>,
    pub method: ClassificationMethod,
}

impl Classification {
    pub fn new(category: Category, confidence: f32, method: ClassificationMethod) -> Self {
        let confidence = if confidence.is_finite() { confidence.clamp(0.0, 1.0) } else { 0.0 };
        Self { category, confidence, rationale: None, method }
    }

    pub fn with_rationale(mut self, rationale: impl Into<String>) -> Self {
        self.rationale = Some(rationale.into());
        self
    }

    /// Used when no step could produce a usable label.
    pub fn fallback_default() -> Self {
        Self::new(Category::default(), 0.0, ClassificationMethod::FallbackDefault)
            .with_rationale("fallback-default")
    }
}
