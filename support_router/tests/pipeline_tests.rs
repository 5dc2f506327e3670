//! End-to-end pipeline behaviour with in-process collaborators.
//!
//! Every external capability (model, embeddings, vector indexes, support
//! database, web search, quality recorder) is replaced by a fake so the
//! routing, failover and merge rules can be checked deterministically.

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use support_router::errors::{PipelineError, ProviderError, ProviderResult};
use support_router::models::{
    AttemptStatus, BackendHealth, Category, Classification, ClassificationMethod, EvidenceSource, Metadata, MetadataFilter,
    MetadataValue, Query, VectorMatch, VectorRecord,
};
use support_router::services::health_cache::HealthState;
use support_router::services::vector_backend::PRIMARY_BACKEND;
use support_router::services::{
    AnswerSynthesizer, BackendHealthCache, ClassifierSettings, CompletionOptions, CompletionProvider,
    EmbeddingProvider, FailoverVectorIndex, LocalVectorIndex, ManualClock, QualityEvent, QualityRecorder,
    QualitySink, QueryClassifier, RecordFilter, RecordKind, RetrievalRouter, RouterSettings, StructuredDataSource,
    StructuredRow, SupportPipeline, SynthesizerSettings, VectorIndex, WebResult, WebSearchProvider,
    NOT_FOUND_ANSWER,
};

// ============================================================================
// FAKES
// ============================================================================

struct FakeCompletion {
    reply: Option<String>,
    calls: AtomicUsize,
}

impl FakeCompletion {
    fn replying(text: &str) -> Arc<Self> {
        Arc::new(Self { reply: Some(text.to_string()), calls: AtomicUsize::new(0) })
    }

    fn failing() -> Arc<Self> {
        Arc::new(Self { reply: None, calls: AtomicUsize::new(0) })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CompletionProvider for FakeCompletion {
    async fn complete(&self, _prompt: &str, _options: &CompletionOptions) -> ProviderResult<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.reply {
            Some(text) => Ok(text.clone()),
            None => Err(ProviderError::Quota("rate limited".into())),
        }
    }
}

struct FakeEmbedder;

/// Rejects every input, as a provider does for oversized or empty text
struct RejectingEmbedder;

#[async_trait]
impl EmbeddingProvider for RejectingEmbedder {
    async fn embed(&self, _text: &str) -> ProviderResult<Vec<f32>> {
        Err(ProviderError::InvalidRequest("input exceeds the model context".into()))
    }

    fn dimension(&self) -> usize {
        3
    }
}

#[async_trait]
impl EmbeddingProvider for FakeEmbedder {
    async fn embed(&self, _text: &str) -> ProviderResult<Vec<f32>> {
        Ok(vec![1.0, 0.0, 0.0])
    }

    fn dimension(&self) -> usize {
        3
    }
}

enum PrimaryBehaviour {
    Serves(Vec<VectorMatch>),
    TimesOut,
    Down,
}

struct FakePrimary {
    behaviour: PrimaryBehaviour,
    queries: AtomicUsize,
}

impl FakePrimary {
    fn new(behaviour: PrimaryBehaviour) -> Arc<Self> {
        Arc::new(Self { behaviour, queries: AtomicUsize::new(0) })
    }
}

#[async_trait]
impl VectorIndex for FakePrimary {
    fn name(&self) -> &str {
        "fake-remote"
    }

    async fn upsert(&self, records: &[VectorRecord]) -> ProviderResult<usize> {
        Ok(records.len())
    }

    async fn query(&self, _: &[f32], top_k: usize, _: Option<&MetadataFilter>) -> ProviderResult<Vec<VectorMatch>> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        match &self.behaviour {
            PrimaryBehaviour::Serves(matches) => Ok(matches.iter().take(top_k).cloned().collect()),
            PrimaryBehaviour::TimesOut => Err(ProviderError::Timeout("query exceeded 5s".into())),
            PrimaryBehaviour::Down => Err(ProviderError::Unavailable("503".into())),
        }
    }

    async fn delete(&self, ids: &[String]) -> ProviderResult<usize> {
        Ok(ids.len())
    }

    async fn health(&self) -> BackendHealth {
        match self.behaviour {
            PrimaryBehaviour::Down => BackendHealth::down("connection refused"),
            _ => BackendHealth::up(),
        }
    }
}

#[derive(Default)]
struct FakeSupportDb {
    records: HashMap<String, StructuredRow>,
    user_rows: Vec<StructuredRow>,
    fail_queries: bool,
    lookups: AtomicUsize,
}

#[async_trait]
impl StructuredDataSource for FakeSupportDb {
    async fn lookup(&self, key: &str) -> ProviderResult<Option<StructuredRow>> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        Ok(self.records.get(key).cloned())
    }

    async fn query(&self, filter: &RecordFilter) -> ProviderResult<Vec<StructuredRow>> {
        if self.fail_queries {
            return Err(ProviderError::Unavailable("connection pool exhausted".into()));
        }
        if filter.user_id.is_none() {
            return Ok(Vec::new());
        }
        Ok(self.user_rows.iter().take(filter.limit).cloned().collect())
    }
}

struct FakeWeb(Vec<WebResult>);

#[async_trait]
impl WebSearchProvider for FakeWeb {
    async fn search(&self, _query: &str, max_results: usize) -> ProviderResult<Vec<WebResult>> {
        Ok(self.0.iter().take(max_results).cloned().collect())
    }
}

/// Answers only after the router has given up on it
struct StalledWeb;

#[async_trait]
impl WebSearchProvider for StalledWeb {
    async fn search(&self, _query: &str, _max_results: usize) -> ProviderResult<Vec<WebResult>> {
        tokio::time::sleep(Duration::from_secs(5)).await;
        Ok(vec![web_result("https://example.com/late", Some(0.9))])
    }
}

struct CollectingRecorder(Mutex<Vec<QualityEvent>>);

#[async_trait]
impl QualityRecorder for CollectingRecorder {
    async fn record(&self, event: QualityEvent) -> anyhow::Result<()> {
        self.0.lock().push(event);
        Ok(())
    }
}

struct BrokenRecorder;

#[async_trait]
impl QualityRecorder for BrokenRecorder {
    async fn record(&self, _event: QualityEvent) -> anyhow::Result<()> {
        anyhow::bail!("quality store unreachable")
    }
}

// ============================================================================
// HELPERS
// ============================================================================

fn vector_match(id: &str, score: f32, text: &str) -> VectorMatch {
    VectorMatch {
        id: id.to_string(),
        score,
        metadata: Metadata::from([("text".to_string(), MetadataValue::from(text))]),
    }
}

fn row(id: &str, kind: RecordKind, content: &str) -> StructuredRow {
    StructuredRow {
        id: id.to_string(),
        content: content.to_string(),
        timestamp: Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap(),
        kind,
        owner_id: None,
    }
}

fn owned_by(owner: &str, row: StructuredRow) -> StructuredRow {
    StructuredRow { owner_id: Some(owner.to_string()), ..row }
}

fn web_result(url: &str, score: Option<f32>) -> WebResult {
    WebResult {
        url: url.to_string(),
        title: "Result".to_string(),
        content: format!("content of {}", url),
        score,
    }
}

async fn local_index(records: &[(&str, Vec<f32>, &str)]) -> Arc<LocalVectorIndex> {
    let index = LocalVectorIndex::new(3);
    let records: Vec<VectorRecord> = records
        .iter()
        .map(|(id, embedding, text)| VectorRecord {
            id: id.to_string(),
            embedding: embedding.clone(),
            metadata: Metadata::from([("text".to_string(), MetadataValue::from(*text))]),
        })
        .collect();
    index.upsert(&records).await.unwrap();
    Arc::new(index)
}

fn failover(
    primary: Arc<FakePrimary>,
    secondary: Arc<LocalVectorIndex>,
    fallback_enabled: bool,
    clock: Arc<ManualClock>,
) -> Arc<FailoverVectorIndex> {
    let health = Arc::new(BackendHealthCache::new(Duration::from_secs(30), clock));
    Arc::new(FailoverVectorIndex::new(primary, Some(secondary as Arc<dyn VectorIndex>), fallback_enabled, health))
}

fn clock() -> Arc<ManualClock> {
    Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()))
}

fn router(
    vectors: Arc<FailoverVectorIndex>,
    db: FakeSupportDb,
    web: Option<Arc<dyn WebSearchProvider>>,
) -> RetrievalRouter {
    RetrievalRouter::new(Arc::new(FakeEmbedder), vectors, Arc::new(db), web, RouterSettings::default())
}

fn classified(category: Category) -> Classification {
    Classification::new(category, 0.95, ClassificationMethod::Heuristic)
}

fn pipeline(
    classifier_model: Arc<FakeCompletion>,
    router: RetrievalRouter,
    synthesis_model: Arc<FakeCompletion>,
    quality: QualitySink,
) -> SupportPipeline {
    SupportPipeline::new(
        QueryClassifier::new(classifier_model, ClassifierSettings::default()).with_quality_sink(quality.clone()),
        router.with_quality_sink(quality.clone()),
        AnswerSynthesizer::new(synthesis_model, SynthesizerSettings::default()).with_quality_sink(quality),
    )
}

async fn healthy_vectors(matches: Vec<VectorMatch>) -> Arc<FailoverVectorIndex> {
    failover(
        FakePrimary::new(PrimaryBehaviour::Serves(matches)),
        local_index(&[]).await,
        true,
        clock(),
    )
}

// ============================================================================
// CLASSIFICATION
// ============================================================================

#[tokio::test]
async fn classification_confidence_is_always_in_unit_range() {
    let model = FakeCompletion::replying(r#"{"category": "troubleshooting", "confidence": 7.5}"#);
    let classifier = QueryClassifier::new(model, ClassifierSettings::default());

    for text in [
        "I forgot my password",
        "my laptop is slow and the printer is broken",
        "hello?",
        "What is the vacation policy?",
        "🙂",
    ] {
        let classification = classifier.classify(&Query::new(text)).await.unwrap();
        assert!(
            (0.0..=1.0).contains(&classification.confidence),
            "{} -> {}",
            text,
            classification.confidence
        );
    }
}

#[tokio::test]
async fn empty_question_is_rejected_before_any_model_call() {
    let classifier_model = FakeCompletion::replying("{}");
    let synthesis_model = FakeCompletion::replying("answer");
    let pipeline = pipeline(
        classifier_model.clone(),
        router(healthy_vectors(vec![]).await, FakeSupportDb::default(), None),
        synthesis_model.clone(),
        QualitySink::disabled(),
    );

    let err = pipeline.answer(Query::new("   \n")).await.unwrap_err();

    assert!(matches!(err, PipelineError::InvalidInput(_)));
    assert_eq!(classifier_model.calls(), 0);
    assert_eq!(synthesis_model.calls(), 0);
}

#[tokio::test]
async fn confident_keyword_match_skips_the_model() {
    let model = FakeCompletion::replying(r#"{"category": "knowledge", "confidence": 0.9}"#);
    let classifier = QueryClassifier::new(model.clone(), ClassifierSettings::default());

    let classification = classifier.classify(&Query::new("I forgot my password")).await.unwrap();

    assert_eq!(classification.category, Category::Account);
    assert_eq!(classification.method, ClassificationMethod::Heuristic);
    assert!(classification.confidence >= 0.85);
    assert_eq!(model.calls(), 0);
}

#[tokio::test]
async fn failed_model_call_falls_back_to_default_category() {
    let classifier = QueryClassifier::new(FakeCompletion::failing(), ClassifierSettings::default());

    let classification = classifier.classify(&Query::new("hello there")).await.unwrap();

    assert_eq!(classification.category, Category::Knowledge);
    assert_eq!(classification.confidence, 0.0);
    assert_eq!(classification.rationale.as_deref(), Some("fallback-default"));
}

// ============================================================================
// RETRIEVAL
// ============================================================================

#[tokio::test]
async fn unavailable_primary_is_served_by_secondary_in_degraded_mode() {
    let primary = FakePrimary::new(PrimaryBehaviour::Down);
    let secondary = local_index(&[("kb-vpn", vec![1.0, 0.0, 0.0], "Reinstall the VPN profile")]).await;
    let router = router(failover(primary.clone(), secondary, true, clock()), FakeSupportDb::default(), None);

    for _ in 0..2 {
        let outcome = router
            .retrieve(&Query::new("vpn keeps dropping"), &classified(Category::Troubleshooting))
            .await
            .unwrap();

        assert!(outcome.degraded);
        assert_eq!(outcome.evidence.len(), 1);
        assert_eq!(outcome.evidence[0].reference_id, "kb-vpn");
    }
    // Health probe said down; the Primary was never queried
    assert_eq!(primary.queries.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn primary_timeout_fails_over_and_marks_primary_unavailable() {
    let clock = clock();
    let primary = FakePrimary::new(PrimaryBehaviour::TimesOut);
    let secondary = local_index(&[("kb-1", vec![1.0, 0.0, 0.0], "Restart the print spooler")]).await;
    let vectors = failover(primary.clone(), secondary, true, clock.clone());
    let router = router(vectors.clone(), FakeSupportDb::default(), None);

    let outcome = router
        .retrieve(&Query::new("printer is broken"), &classified(Category::Troubleshooting))
        .await
        .unwrap();

    assert!(outcome.degraded);
    assert_eq!(outcome.evidence[0].source, EvidenceSource::VectorIndex);

    let entry = vectors.health_cache().last_known(PRIMARY_BACKEND).unwrap();
    assert_eq!(entry.state, HealthState::Unavailable);
    assert_eq!(entry.checked_at, Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap());

    // Within the TTL the Primary is not retried
    clock.advance(chrono::Duration::seconds(10));
    router
        .retrieve(&Query::new("printer is broken"), &classified(Category::Troubleshooting))
        .await
        .unwrap();
    assert_eq!(primary.queries.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn disabled_fallback_leaves_other_sources_to_answer() {
    let primary = FakePrimary::new(PrimaryBehaviour::Down);
    let secondary = local_index(&[("kb-1", vec![1.0, 0.0, 0.0], "unused")]).await;
    let web: Arc<dyn WebSearchProvider> = Arc::new(FakeWeb(vec![web_result("https://example.com/policy", Some(0.7))]));
    let router = router(failover(primary, secondary, false, clock()), FakeSupportDb::default(), Some(web));

    let outcome = router
        .retrieve(&Query::new("remote work policy"), &classified(Category::Knowledge))
        .await
        .unwrap();

    assert!(outcome.degraded);
    assert_eq!(outcome.evidence.len(), 1);
    assert_eq!(outcome.evidence[0].source, EvidenceSource::WebSearch);
}

#[tokio::test]
async fn evidence_is_sorted_by_relevance_then_source_priority() {
    let vectors = healthy_vectors(vec![vector_match("kb-remote", 0.8, "Remote work is allowed two days a week")]).await;
    let web: Arc<dyn WebSearchProvider> = Arc::new(FakeWeb(vec![
        web_result("https://example.com/a", Some(0.8)),
        web_result("https://example.com/b", Some(0.9)),
    ]));
    let router = router(vectors, FakeSupportDb::default(), Some(web));

    let outcome = router
        .retrieve(&Query::new("remote work policy"), &classified(Category::Knowledge))
        .await
        .unwrap();

    let order: Vec<(&str, EvidenceSource)> = outcome
        .evidence
        .iter()
        .map(|e| (e.reference_id.as_str(), e.source))
        .collect();
    assert_eq!(
        order,
        vec![
            ("https://example.com/b", EvidenceSource::WebSearch),
            ("kb-remote", EvidenceSource::VectorIndex),
            ("https://example.com/a", EvidenceSource::WebSearch),
        ]
    );
    for pair in outcome.evidence.windows(2) {
        assert!(pair[0].relevance_score >= pair[1].relevance_score);
    }
}

#[tokio::test]
async fn knowledge_question_merges_vector_and_web_evidence() {
    let vectors = healthy_vectors(vec![vector_match("kb-remote", 0.82, "Remote work policy v3")]).await;
    let web: Arc<dyn WebSearchProvider> = Arc::new(FakeWeb(vec![
        web_result("https://example.com/remote", Some(0.6)),
        web_result("https://example.com/hybrid", None),
    ]));
    let router = router(vectors, FakeSupportDb::default(), Some(web));

    let outcome = router
        .retrieve(&Query::new("What is the remote work policy?"), &classified(Category::Knowledge))
        .await
        .unwrap();

    assert_eq!(outcome.evidence.len(), 3);
    assert!(!outcome.degraded);
    assert_eq!(outcome.evidence[0].source, EvidenceSource::VectorIndex);
    assert_eq!(outcome.evidence[1].reference_id, "https://example.com/remote");
    assert_eq!(outcome.evidence[2].relevance_score, 0.5);
    assert_eq!(
        outcome.sources_queried(),
        vec![EvidenceSource::VectorIndex, EvidenceSource::WebSearch]
    );
}

#[tokio::test]
async fn account_question_returns_the_single_structured_record() {
    let db = FakeSupportDb {
        user_rows: vec![row("ticket:42", RecordKind::Ticket, "Ticket #42: VPN access (open)")],
        ..FakeSupportDb::default()
    };
    let router = router(healthy_vectors(vec![]).await, db, None);

    let outcome = router
        .retrieve(&Query::new("What's the status of my ticket?").with_user("7"), &classified(Category::Account))
        .await
        .unwrap();

    assert_eq!(outcome.evidence.len(), 1);
    assert_eq!(outcome.evidence[0].source, EvidenceSource::StructuredDb);
    assert!(!outcome.degraded);
}

#[tokio::test]
async fn duplicate_references_are_merged() {
    let ticket = owned_by("7", row("ticket:42", RecordKind::Ticket, "Ticket #42: VPN access (open)"));
    let db = FakeSupportDb {
        records: HashMap::from([("ticket:42".to_string(), ticket.clone())]),
        user_rows: vec![row("user:7", RecordKind::UserProfile, "User jdoe"), ticket],
        ..FakeSupportDb::default()
    };
    let router = router(healthy_vectors(vec![]).await, db, None);

    let outcome = router
        .retrieve(&Query::new("status of ticket #42").with_user("7"), &classified(Category::Account))
        .await
        .unwrap();

    let mut ids: Vec<&str> = outcome.evidence.iter().map(|e| e.reference_id.as_str()).collect();
    ids.sort();
    assert_eq!(ids, vec!["ticket:42", "user:7"]);
}

#[tokio::test]
async fn ticket_number_without_identity_is_never_looked_up() {
    let db = Arc::new(FakeSupportDb {
        records: HashMap::from([(
            "ticket:42".to_string(),
            owned_by("9", row("ticket:42", RecordKind::Ticket, "Ticket #42: payroll export for user 9 (open)")),
        )]),
        ..FakeSupportDb::default()
    });
    let router = RetrievalRouter::new(
        Arc::new(FakeEmbedder),
        healthy_vectors(vec![]).await,
        db.clone(),
        None,
        RouterSettings::default(),
    );

    let err = router
        .retrieve(&Query::new("what's the status of ticket 42"), &classified(Category::Account))
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::NoEvidenceAvailable(_)));

    // A session alone does not establish who owns a ticket
    let err = router
        .retrieve(&Query::new("what's the status of ticket 42").with_session("s-1"), &classified(Category::Account))
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::NoEvidenceAvailable(_)));

    assert_eq!(db.lookups.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn ticket_of_another_user_is_not_returned() {
    let db = FakeSupportDb {
        records: HashMap::from([(
            "ticket:42".to_string(),
            owned_by("9", row("ticket:42", RecordKind::Ticket, "Ticket #42: payroll export for user 9 (open)")),
        )]),
        user_rows: vec![owned_by("7", row("user:7", RecordKind::UserProfile, "User jdoe"))],
        ..FakeSupportDb::default()
    };
    let router = router(healthy_vectors(vec![]).await, db, None);

    let outcome = router
        .retrieve(&Query::new("what's the status of ticket 42").with_user("7"), &classified(Category::Account))
        .await
        .unwrap();

    let ids: Vec<&str> = outcome.evidence.iter().map(|e| e.reference_id.as_str()).collect();
    assert_eq!(ids, vec!["user:7"]);
    assert!(outcome.evidence.iter().all(|e| !e.content.contains("payroll")));
    assert!(!outcome.degraded);
}

#[tokio::test]
async fn slow_source_times_out_without_holding_up_the_answer() {
    let vectors = healthy_vectors(vec![vector_match("kb-remote", 0.8, "Remote work is allowed two days a week")]).await;
    let settings = RouterSettings { source_timeout: Duration::from_millis(50), ..RouterSettings::default() };
    let router = RetrievalRouter::new(
        Arc::new(FakeEmbedder),
        vectors,
        Arc::new(FakeSupportDb::default()),
        Some(Arc::new(StalledWeb) as Arc<dyn WebSearchProvider>),
        settings,
    );

    let start = Instant::now();
    let outcome = router
        .retrieve(&Query::new("remote work policy"), &classified(Category::Knowledge))
        .await
        .unwrap();

    assert!(start.elapsed() < Duration::from_secs(1), "took {:?}", start.elapsed());
    assert!(outcome.degraded);
    assert_eq!(outcome.evidence.len(), 1);
    assert_eq!(outcome.evidence[0].reference_id, "kb-remote");

    let web = outcome
        .attempts
        .iter()
        .find(|a| a.source == EvidenceSource::WebSearch)
        .unwrap();
    assert_eq!(web.status, AttemptStatus::Failed { reason: "timed out after 50 ms".to_string() });
}

#[tokio::test]
async fn unembeddable_question_skips_vector_search() {
    let db = FakeSupportDb {
        user_rows: vec![owned_by("7", row("ticket:12", RecordKind::Ticket, "Ticket #12: laptop overheating (open)"))],
        ..FakeSupportDb::default()
    };
    let router = RetrievalRouter::new(
        Arc::new(RejectingEmbedder),
        healthy_vectors(vec![vector_match("kb-fan", 0.9, "Clean the fan vents")]).await,
        Arc::new(db),
        None,
        RouterSettings::default(),
    );

    let outcome = router
        .retrieve(&Query::new("laptop fan is loud").with_user("7"), &classified(Category::Troubleshooting))
        .await
        .unwrap();

    assert!(outcome.degraded);
    assert_eq!(outcome.evidence.len(), 1);
    assert_eq!(outcome.evidence[0].source, EvidenceSource::StructuredDb);

    let vector = outcome
        .attempts
        .iter()
        .find(|a| a.source == EvidenceSource::VectorIndex)
        .unwrap();
    assert!(matches!(vector.status, AttemptStatus::Skipped { .. }));
}

#[tokio::test]
async fn unembeddable_question_with_no_other_source_has_no_evidence() {
    let router = RetrievalRouter::new(
        Arc::new(RejectingEmbedder),
        healthy_vectors(vec![vector_match("kb-1", 0.9, "unused")]).await,
        Arc::new(FakeSupportDb::default()),
        None,
        RouterSettings::default(),
    );

    let err = router
        .retrieve(&Query::new("what is the parking policy"), &classified(Category::Knowledge))
        .await
        .unwrap_err();

    match err {
        PipelineError::NoEvidenceAvailable(summary) => assert!(summary.contains("vector_index: skipped"), "{}", summary),
        other => panic!("unexpected error: {:?}", other),
    }
}

#[tokio::test]
async fn matches_without_stored_text_are_reported_as_a_failed_attempt() {
    let bare = |id: &str| VectorMatch { id: id.to_string(), score: 0.9, metadata: Metadata::default() };
    let db = FakeSupportDb {
        user_rows: vec![owned_by("7", row("user:7", RecordKind::UserProfile, "User jdoe"))],
        ..FakeSupportDb::default()
    };
    let router = router(healthy_vectors(vec![bare("kb-1"), bare("kb-2")]).await, db, None);

    let outcome = router
        .retrieve(&Query::new("vpn keeps dropping").with_user("7"), &classified(Category::Troubleshooting))
        .await
        .unwrap();

    let vector = outcome
        .attempts
        .iter()
        .find(|a| a.source == EvidenceSource::VectorIndex)
        .unwrap();
    assert_eq!(vector.status, AttemptStatus::Failed { reason: "2 matches had no stored text".to_string() });
    assert!(outcome.degraded);
    assert_eq!(outcome.evidence.len(), 1);
}

#[tokio::test]
async fn combined_route_survives_a_failing_source() {
    let vectors = healthy_vectors(vec![vector_match("kb-bsod", 0.77, "Update the display driver")]).await;
    let db = FakeSupportDb { fail_queries: true, ..FakeSupportDb::default() };
    let router = router(vectors, db, None);

    let outcome = router
        .retrieve(
            &Query::new("laptop crashes with a blue screen").with_user("7"),
            &classified(Category::Troubleshooting),
        )
        .await
        .unwrap();

    assert!(outcome.degraded);
    assert_eq!(outcome.evidence.len(), 1);
    assert_eq!(outcome.evidence[0].reference_id, "kb-bsod");
    assert_eq!(outcome.attempts.len(), 2);
}

#[tokio::test]
async fn every_source_empty_is_no_evidence() {
    let router = router(healthy_vectors(vec![]).await, FakeSupportDb::default(), None);

    let err = router
        .retrieve(&Query::new("parking rules"), &classified(Category::Knowledge))
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::NoEvidenceAvailable(_)));
}

// ============================================================================
// PIPELINE
// ============================================================================

#[tokio::test]
async fn nothing_found_still_produces_an_answer() {
    let pipeline = pipeline(
        FakeCompletion::replying("{}"),
        router(healthy_vectors(vec![]).await, FakeSupportDb::default(), None),
        FakeCompletion::replying(""),
        QualitySink::disabled(),
    );

    let response = pipeline.answer(Query::new("What is the vacation policy?")).await.unwrap();

    assert_eq!(response.classification.category, Category::Knowledge);
    assert!(!response.answer.found);
    assert_eq!(response.answer.text, NOT_FOUND_ANSWER);
    assert!(response.retrieval.is_empty());
    assert!(response.retrieval_note.is_some());
}

#[tokio::test]
async fn answer_cites_the_evidence_it_was_given() {
    let quality = Arc::new(CollectingRecorder(Mutex::new(Vec::new())));
    let pipeline = pipeline(
        FakeCompletion::replying("{}"),
        router(
            healthy_vectors(vec![vector_match("kb-bsod", 0.9, "Update the display driver")]).await,
            FakeSupportDb::default(),
            None,
        ),
        FakeCompletion::replying("Update your display driver [1]."),
        QualitySink::new(quality.clone()),
    );

    let response = pipeline
        .answer(Query::new("My laptop crashes with a blue screen error"))
        .await
        .unwrap();

    assert_eq!(response.classification.category, Category::Troubleshooting);
    assert!(response.answer.found);
    assert_eq!(response.answer.citations.len(), 1);
    assert_eq!(response.answer.citations[0].reference_id, "kb-bsod");

    // Quality events are delivered on spawned tasks
    for _ in 0..50 {
        if quality.0.lock().len() == 3 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(quality.0.lock().len(), 3);
}

#[tokio::test]
async fn broken_quality_recorder_does_not_change_the_answer() {
    let pipeline = pipeline(
        FakeCompletion::replying("{}"),
        router(
            healthy_vectors(vec![vector_match("kb-1", 0.9, "Clear the browser cache")]).await,
            FakeSupportDb::default(),
            None,
        ),
        FakeCompletion::replying("Clear the cache [1]."),
        QualitySink::new(Arc::new(BrokenRecorder)),
    );

    let response = pipeline.answer(Query::new("the portal is slow")).await.unwrap();

    assert_eq!(response.answer.text, "Clear the cache [1].");
}

#[tokio::test]
async fn generation_failure_aborts_the_pipeline() {
    let pipeline = pipeline(
        FakeCompletion::replying("{}"),
        router(
            healthy_vectors(vec![vector_match("kb-1", 0.9, "Clear the browser cache")]).await,
            FakeSupportDb::default(),
            None,
        ),
        FakeCompletion::failing(),
        QualitySink::disabled(),
    );

    let err = pipeline.answer(Query::new("the portal is slow")).await.unwrap_err();

    assert!(matches!(err, PipelineError::SynthesisUnavailable(_)));
}
