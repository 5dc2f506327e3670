//! classify -> retrieve -> synthesize

use serde::Serialize;
use std::time::Instant;
use uuid::Uuid;

use support_observability::{log_answer_synthesized, log_question_classified, log_retrieval_completed};

use crate::errors::{PipelineError, PipelineResult};
use crate::models::{Classification, Query, RetrievalOutcome};
use crate::services::classifier::QueryClassifier;
use crate::services::router::RetrievalRouter;
use crate::services::synthesizer::{Answer, AnswerSynthesizer};

const SERVICE: &str = "support-router";

#[derive(Debug, Clone, Serialize)]
pub struct PipelineResponse {
    pub request_id: Uuid,
    pub answer: Answer,
    pub classification: Classification,
    pub retrieval: RetrievalOutcome,
    /// Why retrieval came back empty, when it did
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retrieval_note: Option<String>,
    pub took_ms: u64,
}

pub struct SupportPipeline {
    classifier: QueryClassifier,
    router: RetrievalRouter,
    synthesizer: AnswerSynthesizer,
}

impl SupportPipeline {
    pub fn new(classifier: QueryClassifier, router: RetrievalRouter, synthesizer: AnswerSynthesizer) -> Self {
        Self {
            classifier,
            router,
            synthesizer,
        }
    }

    pub async fn answer(&self, query: Query) -> PipelineResult<PipelineResponse> {
        let request_id = Uuid::new_v4();
        let start = Instant::now();

        let step = Instant::now();
        let classification = self.classifier.classify(&query).await?;
        log_question_classified(
            SERVICE,
            request_id,
            query.session_id.as_deref(),
            classification.category.as_str(),
            classification.method.as_str(),
            classification.confidence,
            step.elapsed().as_millis() as u64,
        );

        let step = Instant::now();
        let (retrieval, retrieval_note) = match self.router.retrieve(&query, &classification).await {
            Ok(outcome) => (outcome, None),
            Err(PipelineError::NoEvidenceAvailable(summary)) => (RetrievalOutcome::empty(), Some(summary)),
            Err(e) => return Err(e),
        };
        log_retrieval_completed(
            SERVICE,
            request_id,
            classification.category.as_str(),
            retrieval.evidence.len(),
            retrieval.degraded,
            step.elapsed().as_millis() as u64,
        );

        let step = Instant::now();
        let answer = self.synthesizer.synthesize(&query, &retrieval).await?;
        log_answer_synthesized(
            SERVICE,
            request_id,
            answer.evidence_used,
            answer.found,
            step.elapsed().as_millis() as u64,
        );

        let took_ms = start.elapsed().as_millis() as u64;
        tracing::info!(
            request_id = %request_id,
            category = %classification.category,
            found = answer.found,
            degraded = answer.degraded,
            took_ms,
            "Question answered"
        );

        Ok(PipelineResponse {
            request_id,
            answer,
            classification,
            retrieval,
            retrieval_note,
            took_ms,
        })
    }
}
