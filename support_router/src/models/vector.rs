//! Records stored in the vector indexes

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Scalar metadata value. The index stores these verbatim and only compares
/// them for equality when filtering.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum MetadataValue {
    Bool(bool),
    Integer(i64),
    Float(f64),
    Text(String),
}

impl MetadataValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl From<&str> for MetadataValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for MetadataValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<i64> for MetadataValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<bool> for MetadataValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

pub type Metadata = HashMap<String, MetadataValue>;

/// Equality filter: every key must be present with an equal value.
pub type MetadataFilter = HashMap<String, MetadataValue>;

pub fn matches_filter(metadata: &Metadata, filter: &MetadataFilter) -> bool {
    filter
        .iter()
        .all(|(key, expected)| metadata.get(key) == Some(expected))
}

/// Metadata keys that may hold the record's text, in lookup order
pub const CONTENT_KEYS: [&str; 3] = ["text", "content", "chunk"];

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VectorRecord {
    pub id: String,
    pub embedding: Vec<f32>,
    #[serde(default)]
    pub metadata: Metadata,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VectorMatch {
    pub id: String,
    pub score: f32,
    #[serde(default)]
    pub metadata: Metadata,
}

impl VectorMatch {
    /// Text stored alongside the vector, if any.
    pub fn content(&self) -> Option<&str> {
        CONTENT_KEYS
            .iter()
            .find_map(|key| self.metadata.get(*key).and_then(MetadataValue::as_text))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BackendHealth {
    pub available: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl BackendHealth {
    pub fn up() -> Self {
        Self { available: true, detail: None }
    }

    pub fn down(detail: impl Into<String>) -> Self {
        Self { available: false, detail: Some(detail.into()) }
    }
}

/// Which index answered a query
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BackendRole {
    Primary,
    Secondary,
}

impl BackendRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Primary => "primary",
            Self::Secondary => "secondary",
        }
    }
}
