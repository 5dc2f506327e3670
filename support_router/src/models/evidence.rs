//! Source-agnostic retrieval results

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Where a piece of evidence came from. Declaration order is tie-break priority.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EvidenceSource {
    StructuredDb,
    VectorIndex,
    WebSearch,
}

impl EvidenceSource {
    /// Lower ranks win ties on equal relevance.
    pub fn priority(&self) -> u8 {
        match self {
            Self::StructuredDb => 0,
            Self::VectorIndex => 1,
            Self::WebSearch => 2,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::StructuredDb => "structured_db",
            Self::VectorIndex => "vector_index",
            Self::WebSearch => "web_search",
        }
    }
}

impl std::fmt::Display for EvidenceSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EvidenceItem {
    pub source: EvidenceSource,
    pub content: String,
    /// Normalized to [0, 1] across all sources
    pub relevance_score: f32,
    pub reference_id: String,
}

impl EvidenceItem {
    pub fn new(
        source: EvidenceSource,
        reference_id: impl Into<String>,
        content: impl Into<String>,
        relevance_score: f32,
    ) -> Self {
        Self {
            source,
            content: content.into(),
            relevance_score: normalize_score(relevance_score),
            reference_id: reference_id.into(),
        }
    }
}

/// Clamp a raw score into [0, 1]; non-finite values count as no relevance.
///
/// Negative cosine similarities are not rescaled, so they tie at 0.0.
pub fn normalize_score(score: f32) -> f32 {
    if score.is_finite() {
        score.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

/// What happened to one source during a retrieval pass
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AttemptStatus {
    Succeeded { hits: usize },
    Empty,
    Failed { reason: String },
    /// Not called at all (no identifier, unembeddable text)
    Skipped { reason: String },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SourceAttempt {
    pub source: EvidenceSource,
    #[serde(flatten)]
    pub status: AttemptStatus,
}

impl SourceAttempt {
    pub fn was_attempted(&self) -> bool {
        !matches!(self.status, AttemptStatus::Skipped { .. })
    }

    pub fn produced_evidence(&self) -> bool {
        matches!(self.status, AttemptStatus::Succeeded { hits } if hits > 0)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RetrievalOutcome {
    /// Descending relevance, ties by source priority, unique reference ids
    pub evidence: Vec<EvidenceItem>,
    pub attempts: Vec<SourceAttempt>,
    /// Served by a fallback path or by fewer sources than the route planned
    pub degraded: bool,
}

impl RetrievalOutcome {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.evidence.is_empty()
    }

    /// Sources that were actually called, in attempt order.
    pub fn sources_queried(&self) -> Vec<EvidenceSource> {
        self.attempts
            .iter()
            .filter(|a| a.was_attempted())
            .map(|a| a.source)
            .collect()
    }
}

/// Deduplicate by reference id (highest score wins), then order by
/// descending relevance with source priority as the tie-break.
pub fn rank_evidence(items: Vec<EvidenceItem>) -> Vec<EvidenceItem> {
    let mut best: HashMap<String, EvidenceItem> = HashMap::with_capacity(items.len());

    for item in items {
        match best.get(&item.reference_id) {
            Some(existing) if !outranks(&item, existing) => {}
            _ => {
                best.insert(item.reference_id.clone(), item);
            }
        }
    }

    let mut ranked: Vec<EvidenceItem> = best.into_values().collect();
    ranked.sort_by(|a, b| {
        b.relevance_score
            .total_cmp(&a.relevance_score)
            .then_with(|| a.source.priority().cmp(&b.source.priority()))
            .then_with(|| a.reference_id.cmp(&b.reference_id))
    });
    ranked
}

fn outranks(candidate: &EvidenceItem, existing: &EvidenceItem) -> bool {
    candidate.relevance_score > existing.relevance_score
        || (candidate.relevance_score == existing.relevance_score
            && candidate.source.priority() < existing.source.priority())
}
