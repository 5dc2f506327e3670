//! Retrieval routing: which sources a category consults, how their results
//! are merged and when a partial failure still counts as an answer.

use futures::future::join_all;
use std::sync::Arc;
use std::time::{Duration, Instant};

use support_config::PipelineSettings;
use support_observability::log_feature;

use crate::errors::{PipelineError, PipelineResult};
use crate::models::{
    rank_evidence, AttemptStatus, Category, Classification, EvidenceItem, EvidenceSource, Query,
    RetrievalOutcome, SourceAttempt,
};
use crate::services::embedding::EmbeddingProvider;
use crate::services::recorder::{QualitySink, QualityStage};
use crate::services::structured_source::{RecordFilter, StructuredDataSource};
use crate::services::vector_backend::FailoverVectorIndex;
use crate::services::web_search::WebSearchProvider;

/// Relevance of an exact structured match; ranks above any similarity score
/// except a perfect one, where source priority breaks the tie.
///
/// Vector scores are raw cosine similarity and are clamped, not rescaled, into
/// [0, 1]: anti-correlated matches all land on 0.0 and rank last, ordered by
/// source priority then reference id. Rescaling with `(s + 1) / 2` would put an
/// unrelated chunk at 0.5, level with an unscored web result.
pub const STRUCTURED_MATCH_SCORE: f32 = 1.0;

/// Relevance for web results that carry no score
pub const DEFAULT_WEB_SCORE: f32 = 0.5;

// ============================================================================
// ROUTING TABLE
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteMode {
    /// Try sources in order, stop at the first one that returns evidence
    FirstSuccess,
    /// Query every source concurrently and merge
    Combine,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Route {
    pub sources: Vec<EvidenceSource>,
    pub mode: RouteMode,
    /// Consulted when the route yields fewer items than the configured minimum
    pub supplement: Option<EvidenceSource>,
}

pub fn route_for(category: Category, query: &Query) -> Route {
    match category {
        Category::Account => Route {
            sources: vec![EvidenceSource::StructuredDb],
            mode: RouteMode::FirstSuccess,
            supplement: None,
        },
        Category::Troubleshooting => {
            let mut sources = vec![EvidenceSource::VectorIndex];
            if query.has_identity() {
                sources.push(EvidenceSource::StructuredDb);
            }
            Route {
                sources,
                mode: RouteMode::Combine,
                supplement: None,
            }
        }
        Category::Knowledge => Route {
            sources: vec![EvidenceSource::VectorIndex],
            mode: RouteMode::FirstSuccess,
            supplement: Some(EvidenceSource::WebSearch),
        },
    }
}

/// `ticket:<n>` key for a question mentioning "ticket 42" or "#42".
pub fn ticket_reference(text: &str) -> Option<String> {
    let words: Vec<&str> = text
        .split_whitespace()
        .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric() && c != '#'))
        .collect();

    let numeric = |s: &str| !s.is_empty() && s.chars().all(|c| c.is_ascii_digit());

    for (i, word) in words.iter().enumerate() {
        if let Some(number) = word.strip_prefix('#') {
            if numeric(number) {
                return Some(format!("ticket:{}", number));
            }
        }
        if word.eq_ignore_ascii_case("ticket") {
            if let Some(next) = words.get(i + 1) {
                let number = next.trim_start_matches('#');
                if numeric(number) {
                    return Some(format!("ticket:{}", number));
                }
            }
        }
    }
    None
}

// ============================================================================
// ROUTER
// ============================================================================

#[derive(Debug, Clone)]
pub struct RouterSettings {
    pub vector_top_k: usize,
    pub min_knowledge_evidence: usize,
    pub source_timeout: Duration,
    pub structured_row_limit: usize,
    pub web_max_results: usize,
}

impl From<&PipelineSettings> for RouterSettings {
    fn from(settings: &PipelineSettings) -> Self {
        Self {
            vector_top_k: settings.vector_top_k,
            min_knowledge_evidence: settings.min_knowledge_evidence,
            source_timeout: Duration::from_millis(settings.source_timeout_ms),
            structured_row_limit: settings.structured_row_limit,
            web_max_results: 5,
        }
    }
}

impl Default for RouterSettings {
    fn default() -> Self {
        Self::from(&PipelineSettings::default())
    }
}

/// Result of consulting one source
struct SourceFetch {
    attempt: SourceAttempt,
    evidence: Vec<EvidenceItem>,
    degraded: bool,
}

impl SourceFetch {
    fn succeeded(source: EvidenceSource, evidence: Vec<EvidenceItem>, degraded: bool) -> Self {
        let status = if evidence.is_empty() {
            AttemptStatus::Empty
        } else {
            AttemptStatus::Succeeded { hits: evidence.len() }
        };
        Self {
            attempt: SourceAttempt { source, status },
            evidence,
            degraded,
        }
    }

    fn failed(source: EvidenceSource, reason: impl Into<String>) -> Self {
        Self {
            attempt: SourceAttempt {
                source,
                status: AttemptStatus::Failed { reason: reason.into() },
            },
            evidence: Vec::new(),
            degraded: true,
        }
    }

    fn skipped(source: EvidenceSource, reason: impl Into<String>, degraded: bool) -> Self {
        Self {
            attempt: SourceAttempt {
                source,
                status: AttemptStatus::Skipped { reason: reason.into() },
            },
            evidence: Vec::new(),
            degraded,
        }
    }
}

pub struct RetrievalRouter {
    embedder: Arc<dyn EmbeddingProvider>,
    vectors: Arc<FailoverVectorIndex>,
    structured: Arc<dyn StructuredDataSource>,
    web: Option<Arc<dyn WebSearchProvider>>,
    settings: RouterSettings,
    quality: QualitySink,
}

impl RetrievalRouter {
    pub fn new(
        embedder: Arc<dyn EmbeddingProvider>,
        vectors: Arc<FailoverVectorIndex>,
        structured: Arc<dyn StructuredDataSource>,
        web: Option<Arc<dyn WebSearchProvider>>,
        settings: RouterSettings,
    ) -> Self {
        Self {
            embedder,
            vectors,
            structured,
            web,
            settings,
            quality: QualitySink::disabled(),
        }
    }

    pub fn with_quality_sink(mut self, quality: QualitySink) -> Self {
        self.quality = quality;
        self
    }

    pub async fn retrieve(&self, query: &Query, classification: &Classification) -> PipelineResult<RetrievalOutcome> {
        let start = Instant::now();
        let route = route_for(classification.category, query);

        let mut fetches: Vec<SourceFetch> = match route.mode {
            RouteMode::FirstSuccess => {
                let mut fetches = Vec::with_capacity(route.sources.len());
                for &source in &route.sources {
                    let fetch = self.fetch_with_timeout(source, query).await;
                    let found = !fetch.evidence.is_empty();
                    fetches.push(fetch);
                    if found {
                        break;
                    }
                }
                fetches
            }
            RouteMode::Combine => {
                join_all(route.sources.iter().map(|&source| self.fetch_with_timeout(source, query))).await
            }
        };

        if let Some(extra) = route.supplement {
            let found: usize = fetches.iter().map(|f| f.evidence.len()).sum();
            if found < self.settings.min_knowledge_evidence {
                if self.is_configured(extra) {
                    tracing::debug!(found, minimum = self.settings.min_knowledge_evidence, source = %extra, "Supplementing thin evidence");
                    fetches.push(self.fetch_with_timeout(extra, query).await);
                } else {
                    log_feature!("WebSearch", false);
                }
            }
        }

        let degraded = fetches.iter().any(|f| f.degraded);
        let mut attempts = Vec::with_capacity(fetches.len());
        let mut evidence = Vec::new();
        for fetch in fetches {
            attempts.push(fetch.attempt);
            evidence.extend(fetch.evidence);
        }

        let outcome = RetrievalOutcome {
            evidence: rank_evidence(evidence),
            attempts,
            degraded,
        };
        let duration_ms = start.elapsed().as_millis() as u64;

        self.quality.emit(
            QualityStage::Retrieval,
            serde_json::json!({
                "category": classification.category,
                "attempts": outcome.attempts,
                "evidence_count": outcome.evidence.len(),
                "degraded": outcome.degraded,
                "duration_ms": duration_ms,
            }),
        );

        if outcome.is_empty() {
            let summary = outcome
                .attempts
                .iter()
                .map(|a| format!("{}: {}", a.source, describe(&a.status)))
                .collect::<Vec<_>>()
                .join("; ");
            tracing::warn!(category = %classification.category, attempts = %summary, "No evidence from any source");
            return Err(PipelineError::NoEvidenceAvailable(if summary.is_empty() {
                "no source could be queried".to_string()
            } else {
                summary
            }));
        }

        tracing::info!(
            category = %classification.category,
            evidence = outcome.evidence.len(),
            degraded = outcome.degraded,
            duration_ms,
            "Retrieval completed"
        );
        Ok(outcome)
    }

    fn is_configured(&self, source: EvidenceSource) -> bool {
        match source {
            EvidenceSource::StructuredDb | EvidenceSource::VectorIndex => true,
            EvidenceSource::WebSearch => self.web.is_some(),
        }
    }

    async fn fetch_with_timeout(&self, source: EvidenceSource, query: &Query) -> SourceFetch {
        match tokio::time::timeout(self.settings.source_timeout, self.fetch(source, query)).await {
            Ok(fetch) => fetch,
            Err(_) => {
                tracing::warn!(source = %source, timeout_ms = self.settings.source_timeout.as_millis() as u64, "Source timed out");
                SourceFetch::failed(
                    source,
                    format!("timed out after {} ms", self.settings.source_timeout.as_millis()),
                )
            }
        }
    }

    async fn fetch(&self, source: EvidenceSource, query: &Query) -> SourceFetch {
        match source {
            EvidenceSource::VectorIndex => self.fetch_vector(query).await,
            EvidenceSource::StructuredDb => self.fetch_structured(query).await,
            EvidenceSource::WebSearch => self.fetch_web(query).await,
        }
    }

    async fn fetch_vector(&self, query: &Query) -> SourceFetch {
        let source = EvidenceSource::VectorIndex;

        let embedding = match self.embedder.embed(&query.text).await {
            Ok(embedding) => embedding,
            Err(e) => {
                tracing::warn!(error = %e, "Question could not be embedded, skipping vector search");
                return SourceFetch::skipped(source, format!("unembeddable: {}", e), true);
            }
        };

        match self.vectors.query(&embedding, self.settings.vector_top_k, None).await {
            Ok(result) => {
                let degraded = result.is_degraded();
                let returned = result.matches.len();
                let evidence: Vec<EvidenceItem> = result
                    .matches
                    .iter()
                    .filter_map(|m| m.content().map(|text| EvidenceItem::new(source, m.id.clone(), text, m.score)))
                    .collect();

                let dropped = returned - evidence.len();
                if dropped > 0 {
                    tracing::warn!(
                        backend = result.served_by.as_str(),
                        returned,
                        dropped,
                        "Vector matches have no stored text, check ingestion"
                    );
                }
                if evidence.is_empty() && dropped > 0 {
                    return SourceFetch::failed(source, format!("{} matches had no stored text", dropped));
                }
                SourceFetch::succeeded(source, evidence, degraded)
            }
            // Zero evidence from vector search, not a pipeline failure
            Err(e) => SourceFetch::failed(source, e.to_string()),
        }
    }

    async fn fetch_structured(&self, query: &Query) -> SourceFetch {
        let source = EvidenceSource::StructuredDb;

        if !query.has_identity() {
            return SourceFetch::skipped(source, "no user or session identifier", false);
        }

        let mut rows = Vec::new();
        let mut errors = Vec::new();

        // A ticket named in the question is only looked up for its owner
        if let (Some(key), Some(user_id)) = (ticket_reference(&query.text), query.user_id.as_deref()) {
            match self.structured.lookup(&key).await {
                Ok(Some(row)) if row.belongs_to(user_id) => rows.push(row),
                Ok(Some(_)) => tracing::warn!(key = %key, user_id, "Referenced ticket belongs to another user, ignoring"),
                Ok(None) => tracing::debug!(key = %key, "Referenced ticket not found"),
                Err(e) => errors.push(e.to_string()),
            }
        }

        let filter = RecordFilter {
            user_id: query.user_id.clone(),
            session_id: query.session_id.clone(),
            kind: None,
            limit: self.settings.structured_row_limit,
        };
        match self.structured.query(&filter).await {
            Ok(found) => rows.extend(found),
            Err(e) => errors.push(e.to_string()),
        }

        if rows.is_empty() && !errors.is_empty() {
            return SourceFetch::failed(source, errors.join("; "));
        }
        for error in &errors {
            tracing::warn!(error = %error, "Partial structured lookup failure");
        }

        let evidence = rows
            .into_iter()
            .map(|row| EvidenceItem::new(source, row.id, row.content, STRUCTURED_MATCH_SCORE))
            .collect();
        SourceFetch::succeeded(source, evidence, !errors.is_empty())
    }

    async fn fetch_web(&self, query: &Query) -> SourceFetch {
        let source = EvidenceSource::WebSearch;
        let Some(web) = &self.web else {
            return SourceFetch::skipped(source, "web search not configured", false);
        };

        match web.search(&query.text, self.settings.web_max_results).await {
            Ok(results) => {
                let evidence = results
                    .into_iter()
                    .map(|r| {
                        let content = if r.title.is_empty() {
                            r.content
                        } else {
                            format!("{}\n{}", r.title, r.content)
                        };
                        EvidenceItem::new(source, r.url, content, r.score.unwrap_or(DEFAULT_WEB_SCORE))
                    })
                    .collect();
                SourceFetch::succeeded(source, evidence, false)
            }
            Err(e) => SourceFetch::failed(source, e.to_string()),
        }
    }
}

fn describe(status: &AttemptStatus) -> String {
    match status {
        AttemptStatus::Succeeded { hits } => format!("{} hits", hits),
        AttemptStatus::Empty => "empty".to_string(),
        AttemptStatus::Failed { reason } => format!("failed ({})", reason),
        AttemptStatus::Skipped { reason } => format!("skipped ({})", reason),
    }
}
