//! Answer generation over the retrieved evidence.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};

use support_config::PipelineSettings;

use crate::errors::{PipelineError, PipelineResult};
use crate::models::{EvidenceItem, EvidenceSource, Query, RetrievalOutcome};
use crate::services::completion::{CompletionOptions, CompletionProvider};
use crate::services::recorder::{QualitySink, QualityStage};

/// Returned when nothing was found and the model produced no text either
pub const NOT_FOUND_ANSWER: &str =
    "I couldn't find any information about that in our support resources. Please rephrase your question or contact the support team.";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Citation {
    pub reference_id: String,
    pub source: EvidenceSource,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Answer {
    pub text: String,
    pub citations: Vec<Citation>,
    pub evidence_used: usize,
    pub degraded: bool,
    /// False when the answer says no information was found
    pub found: bool,
}

#[derive(Debug, Clone)]
pub struct SynthesizerSettings {
    pub max_evidence: usize,
    /// Approximate prompt tokens the evidence may use
    pub token_budget: usize,
    pub history_window: usize,
    pub timeout: Duration,
}

impl From<&PipelineSettings> for SynthesizerSettings {
    fn from(settings: &PipelineSettings) -> Self {
        Self {
            max_evidence: settings.max_evidence,
            token_budget: settings.evidence_token_budget,
            history_window: settings.history_window,
            timeout: Duration::from_millis(settings.synthesis_timeout_ms),
        }
    }
}

impl Default for SynthesizerSettings {
    fn default() -> Self {
        Self::from(&PipelineSettings::default())
    }
}

/// Rough token estimate (~4 chars per token)
fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(4)
}

pub struct AnswerSynthesizer {
    completion: Arc<dyn CompletionProvider>,
    settings: SynthesizerSettings,
    quality: QualitySink,
}

impl AnswerSynthesizer {
    pub fn new(completion: Arc<dyn CompletionProvider>, settings: SynthesizerSettings) -> Self {
        Self {
            completion,
            settings,
            quality: QualitySink::disabled(),
        }
    }

    pub fn with_quality_sink(mut self, quality: QualitySink) -> Self {
        self.quality = quality;
        self
    }

    /// Highest-relevance prefix of `evidence` that fits the count and token budget.
    ///
    /// Expects evidence already ranked; the lowest-relevance items are dropped first.
    pub fn select_evidence<'a>(&self, evidence: &'a [EvidenceItem]) -> Vec<&'a EvidenceItem> {
        let mut selected = Vec::new();
        let mut used_tokens = 0;

        for item in evidence.iter().take(self.settings.max_evidence) {
            let tokens = estimate_tokens(&item.content);
            if used_tokens + tokens > self.settings.token_budget && !selected.is_empty() {
                break;
            }
            used_tokens += tokens;
            selected.push(item);
        }

        selected
    }

    fn build_prompt(&self, query: &Query, selected: &[&EvidenceItem], degraded: bool) -> String {
        let mut prompt = String::from(
            "You are a technical support assistant. Answer the user's question using only the context below.\n",
        );

        let recent = query.recent_history(self.settings.history_window);
        if !recent.is_empty() {
            prompt.push_str("\nPrevious conversation:\n");
            for turn in recent {
                prompt.push_str(&format!("{}: {}\n", turn.role, turn.content));
            }
        }

        if selected.is_empty() {
            prompt.push_str(
                "\nNo context was found for this question. Tell the user that the information was not found \
                 in the available support resources and suggest contacting the support team. Do not invent an answer.\n",
            );
        } else {
            prompt.push_str("\nContext:\n");
            // Bound the first item when it alone exceeds the budget
            let budget_chars = self.settings.token_budget.saturating_mul(4);
            for (i, item) in selected.iter().enumerate() {
                let content: String = if selected.len() == 1 {
                    item.content.chars().take(budget_chars).collect()
                } else {
                    item.content.clone()
                };
                prompt.push_str(&format!(
                    "[{}] ({}, ref {}, relevance {:.2})\n{}\n\n",
                    i + 1,
                    item.source,
                    item.reference_id,
                    item.relevance_score,
                    content
                ));
            }
            prompt.push_str(
                "Cite the context entries you used by their [number]. If the context does not answer the question, say so.\n",
            );
            if degraded {
                prompt.push_str("Some sources were unavailable; the context may be incomplete.\n");
            }
        }

        prompt.push_str(&format!("\nUser question: {}\n", query.text));
        prompt
    }

    pub async fn synthesize(&self, query: &Query, outcome: &RetrievalOutcome) -> PipelineResult<Answer> {
        let start = Instant::now();
        let selected = self.select_evidence(&outcome.evidence);
        let prompt = self.build_prompt(query, &selected, outcome.degraded);

        let text = match tokio::time::timeout(
            self.settings.timeout,
            self.completion.complete(&prompt, &CompletionOptions::default()),
        )
        .await
        {
            Ok(Ok(text)) => text.trim().to_string(),
            Ok(Err(e)) => {
                tracing::error!(error = %e, "Answer generation failed");
                return Err(PipelineError::SynthesisUnavailable(e.to_string()));
            }
            Err(_) => {
                tracing::error!(timeout_ms = self.settings.timeout.as_millis() as u64, "Answer generation timed out");
                return Err(PipelineError::SynthesisUnavailable(format!(
                    "generation timed out after {} ms",
                    self.settings.timeout.as_millis()
                )));
            }
        };

        let found = !selected.is_empty();
        let text = match (text.is_empty(), found) {
            (false, _) => text,
            (true, false) => NOT_FOUND_ANSWER.to_string(),
            (true, true) => {
                return Err(PipelineError::SynthesisUnavailable("generation returned no text".to_string()))
            }
        };

        let answer = Answer {
            text,
            citations: selected
                .iter()
                .map(|item| Citation {
                    reference_id: item.reference_id.clone(),
                    source: item.source,
                })
                .collect(),
            evidence_used: selected.len(),
            degraded: outcome.degraded,
            found,
        };
        let duration_ms = start.elapsed().as_millis() as u64;

        self.quality.emit(
            QualityStage::Synthesis,
            serde_json::json!({
                "evidence_used": answer.evidence_used,
                "citations": answer.citations,
                "found": answer.found,
                "degraded": answer.degraded,
                "duration_ms": duration_ms,
            }),
        );

        Ok(answer)
    }
}
