//! Question intent classification.
//!
//! A keyword pass answers the clear cases without a model call; anything it
//! is not confident about goes to the generative classifier. Classification
//! never fails for non-empty text: when the model call fails the result is
//! the default category with zero confidence.

use serde::Deserialize;
use std::sync::Arc;
use std::time::{Duration, Instant};

use support_config::PipelineSettings;

use crate::errors::{PipelineError, PipelineResult};
use crate::models::{Category, Classification, ClassificationMethod, Query};
use crate::services::completion::{CompletionOptions, CompletionProvider};
use crate::services::recorder::{QualitySink, QualityStage};

const STRONG: f32 = 0.9;
const WEAK: f32 = 0.35;

/// Weight of the runner-up category subtracted from the winner's score
const AMBIGUITY_PENALTY: f32 = 0.5;

/// Confidence assumed when the model omits one
const DEFAULT_GENERATIVE_CONFIDENCE: f32 = 0.5;

// ============================================================================
// KEYWORD HEURISTIC
// ============================================================================

const ACCOUNT_KEYWORDS: &[(&str, f32)] = &[
    ("password", STRONG),
    ("my account", STRONG),
    ("my ticket", STRONG),
    ("my tickets", STRONG),
    ("ticket status", STRONG),
    ("login", STRONG),
    ("log in", STRONG),
    ("sign in", STRONG),
    ("username", STRONG),
    ("my email", STRONG),
    ("my profile", STRONG),
    ("subscription", STRONG),
    ("billing", STRONG),
    ("account", WEAK),
    ("ticket", WEAK),
    ("email", WEAK),
    ("profile", WEAK),
    ("access", WEAK),
];

const TROUBLESHOOTING_KEYWORDS: &[(&str, f32)] = &[
    ("error", STRONG),
    ("crash", STRONG),
    ("crashes", STRONG),
    ("not working", STRONG),
    ("doesn't work", STRONG),
    ("won't start", STRONG),
    ("broken", STRONG),
    ("freezes", STRONG),
    ("troubleshoot", STRONG),
    ("blue screen", STRONG),
    ("slow", STRONG),
    ("fix", WEAK),
    ("issue", WEAK),
    ("problem", WEAK),
    ("install", WEAK),
    ("update", WEAK),
    ("wifi", WEAK),
    ("printer", WEAK),
    ("laptop", WEAK),
];

const KNOWLEDGE_KEYWORDS: &[(&str, f32)] = &[
    ("policy", STRONG),
    ("policies", STRONG),
    ("procedure", STRONG),
    ("guideline", STRONG),
    ("guidelines", STRONG),
    ("handbook", STRONG),
    ("remote work", STRONG),
    ("vacation", STRONG),
    ("benefits", STRONG),
    ("onboarding", STRONG),
    ("what is", WEAK),
    ("company", WEAK),
    ("rules", WEAK),
    ("allowed", WEAK),
];

fn keyword_table(category: Category) -> &'static [(&'static str, f32)] {
    match category {
        Category::Account => ACCOUNT_KEYWORDS,
        Category::Troubleshooting => TROUBLESHOOTING_KEYWORDS,
        Category::Knowledge => KNOWLEDGE_KEYWORDS,
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct HeuristicVerdict {
    pub category: Category,
    pub confidence: f32,
    pub matched: Vec<&'static str>,
}

/// Deterministic keyword scorer.
///
/// Keyword weights within a category combine as independent evidence
/// (`1 - Π(1 - w)`); the winner's confidence is reduced by half the runner-up
/// score so mixed questions fall through to the model.
#[derive(Debug, Default, Clone, Copy)]
pub struct KeywordHeuristic;

impl KeywordHeuristic {
    pub fn evaluate(&self, text: &str) -> Option<HeuristicVerdict> {
        let tokens = tokenize(text);
        if tokens.is_empty() {
            return None;
        }

        let mut scored: Vec<(Category, f32, Vec<&'static str>)> = Category::ALL
            .iter()
            .map(|&category| {
                let mut miss = 1.0f32;
                let mut matched = Vec::new();
                for &(phrase, weight) in keyword_table(category) {
                    if contains_phrase(&tokens, phrase) {
                        miss *= 1.0 - weight;
                        matched.push(phrase);
                    }
                }
                (category, 1.0 - miss, matched)
            })
            .collect();

        scored.sort_by(|a, b| b.1.total_cmp(&a.1));
        let (category, best, matched) = scored.swap_remove(0);
        if matched.is_empty() {
            return None;
        }
        let runner_up = scored.iter().map(|s| s.1).fold(0.0f32, f32::max);

        Some(HeuristicVerdict {
            category,
            confidence: (best - AMBIGUITY_PENALTY * runner_up).clamp(0.0, 1.0),
            matched,
        })
    }
}

fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !(c.is_alphanumeric() || c == '\'' || c == '\u{2019}'))
        .filter(|t| !t.is_empty())
        .map(|t| t.replace('\u{2019}', "'"))
        .collect()
}

fn contains_phrase(tokens: &[String], phrase: &str) -> bool {
    let needle: Vec<&str> = phrase.split_whitespace().collect();
    if needle.is_empty() || needle.len() > tokens.len() {
        return false;
    }
    tokens
        .windows(needle.len())
        .any(|window| window.iter().zip(&needle).all(|(t, n)| t == n))
}

// ============================================================================
// GENERATIVE CLASSIFICATION
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct GenerativeReply {
    pub category: Category,
    pub confidence: f32,
    pub explanation: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawReply {
    category: String,
    #[serde(default)]
    confidence: Option<serde_json::Value>,
    #[serde(default, alias = "rationale")]
    explanation: Option<String>,
}

/// Parse the model's JSON reply; `None` means malformed.
pub fn parse_generative_reply(text: &str) -> Option<GenerativeReply> {
    let body = strip_code_fence(text.trim());
    let start = body.find('{')?;
    let end = body.rfind('}')?;
    if end < start {
        return None;
    }

    let raw: RawReply = serde_json::from_str(&body[start..=end]).ok()?;
    let category = raw.category.parse::<Category>().ok()?;
    let confidence = match raw.confidence {
        Some(serde_json::Value::Number(n)) => n.as_f64().map(|v| v as f32),
        Some(serde_json::Value::String(s)) => s.trim().parse::<f32>().ok(),
        _ => None,
    }
    .filter(|c| c.is_finite())
    .unwrap_or(DEFAULT_GENERATIVE_CONFIDENCE)
    .clamp(0.0, 1.0);

    Some(GenerativeReply {
        category,
        confidence,
        explanation: raw.explanation.filter(|e| !e.trim().is_empty()),
    })
}

fn strip_code_fence(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    // Drop the language tag line, then the closing fence
    let rest = rest.split_once('\n').map_or("", |(_, body)| body);
    rest.trim_end().strip_suffix("```").unwrap_or(rest).trim()
}

fn classification_prompt(query: &Query, history_window: usize) -> String {
    let mut context = String::new();
    let recent = query.recent_history(history_window);
    if !recent.is_empty() {
        context.push_str("Previous conversation:\n");
        for turn in recent {
            context.push_str(&format!("{}: {}\n", turn.role, turn.content));
        }
        context.push('\n');
    }

    format!(
        "Classify the following user query into ONE of these categories:\n\
         - account: related to the user's account, support tickets or personal data (e.g. \"What's my ticket status?\")\n\
         - troubleshooting: technical issues that need diagnostic or how-to information (e.g. \"How do I fix a slow laptop?\")\n\
         - knowledge: company policies, procedures and internal information (e.g. \"What is our remote work policy?\")\n\n\
         {}User query: {}\n\n\
         Respond with a JSON object with the keys \"category\" (one of \"account\", \"troubleshooting\", \"knowledge\"), \
         \"confidence\" (a number between 0 and 1) and \"explanation\" (one short sentence).",
        context, query.text
    )
}

// ============================================================================
// CLASSIFIER
// ============================================================================

#[derive(Debug, Clone)]
pub struct ClassifierSettings {
    /// Heuristic confidence at or above which the model is not consulted
    pub confidence_floor: f32,
    /// Model confidence below which the default category is used
    pub min_accepted_confidence: f32,
    pub history_window: usize,
    pub timeout: Duration,
}

impl From<&PipelineSettings> for ClassifierSettings {
    fn from(settings: &PipelineSettings) -> Self {
        Self {
            confidence_floor: settings.heuristic_confidence_floor,
            min_accepted_confidence: settings.min_accepted_confidence,
            history_window: settings.history_window,
            timeout: Duration::from_millis(settings.classifier_timeout_ms),
        }
    }
}

impl Default for ClassifierSettings {
    fn default() -> Self {
        Self::from(&PipelineSettings::default())
    }
}

pub struct QueryClassifier {
    heuristic: KeywordHeuristic,
    completion: Arc<dyn CompletionProvider>,
    settings: ClassifierSettings,
    quality: QualitySink,
}

impl QueryClassifier {
    pub fn new(completion: Arc<dyn CompletionProvider>, settings: ClassifierSettings) -> Self {
        Self {
            heuristic: KeywordHeuristic,
            completion,
            settings,
            quality: QualitySink::disabled(),
        }
    }

    pub fn with_quality_sink(mut self, quality: QualitySink) -> Self {
        self.quality = quality;
        self
    }

    pub async fn classify(&self, query: &Query) -> PipelineResult<Classification> {
        if query.is_blank() {
            return Err(PipelineError::InvalidInput("query text is empty".to_string()));
        }

        let start = Instant::now();
        let classification = match self.heuristic.evaluate(&query.text) {
            Some(verdict) if verdict.confidence >= self.settings.confidence_floor => {
                tracing::debug!(category = %verdict.category, confidence = verdict.confidence, "Heuristic accepted");
                Classification::new(verdict.category, verdict.confidence, ClassificationMethod::Heuristic)
                    .with_rationale(format!("keywords: {}", verdict.matched.join(", ")))
            }
            _ => self.classify_generative(query).await,
        };
        let duration_ms = start.elapsed().as_millis() as u64;

        tracing::info!(
            category = %classification.category,
            method = classification.method.as_str(),
            confidence = classification.confidence,
            duration_ms,
            "Question classified"
        );
        self.quality.emit(
            QualityStage::Classification,
            serde_json::json!({
                "category": classification.category,
                "confidence": classification.confidence,
                "method": classification.method,
                "rationale": classification.rationale,
                "duration_ms": duration_ms,
                "session_id": query.session_id,
            }),
        );

        Ok(classification)
    }

    async fn classify_generative(&self, query: &Query) -> Classification {
        let prompt = classification_prompt(query, self.settings.history_window);
        let options = CompletionOptions::json(0.3);

        let reply = match tokio::time::timeout(self.settings.timeout, self.completion.complete(&prompt, &options)).await {
            Ok(Ok(text)) => text,
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "Generative classification failed, using default category");
                return Classification::fallback_default();
            }
            Err(_) => {
                tracing::warn!(timeout_ms = self.settings.timeout.as_millis() as u64, "Generative classification timed out");
                return Classification::fallback_default();
            }
        };

        let Some(parsed) = parse_generative_reply(&reply) else {
            tracing::warn!(reply = %reply, "Malformed classification reply, using default category");
            return Classification::fallback_default();
        };

        if parsed.confidence < self.settings.min_accepted_confidence {
            return Classification::new(Category::default(), parsed.confidence, ClassificationMethod::FallbackDefault)
                .with_rationale(format!("below-threshold:{}", parsed.category));
        }

        let classification = Classification::new(parsed.category, parsed.confidence, ClassificationMethod::Generative);
        match parsed.explanation {
            Some(explanation) => classification.with_rationale(explanation),
            None => classification,
        }
    }
}
