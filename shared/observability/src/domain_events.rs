//! Domain event logging for the support pipeline.
//!
//! Every stage outcome is logged with the same schema so log processors can
//! filter on `category` and `event_type` without parsing messages.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Result of a domain operation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum OperationResult {
    Success,
    Failure,
    /// Completed, but from a fallback or with some sources missing
    Degraded,
    Skipped,
}

impl std::fmt::Display for OperationResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::Failure => write!(f, "failure"),
            Self::Degraded => write!(f, "degraded"),
            Self::Skipped => write!(f, "skipped"),
        }
    }
}

/// Categories of domain events for filtering and routing
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum EventCategory {
    Classification,
    Retrieval,
    Synthesis,
    VectorBackend,
    Pipeline,
    System,
}

impl std::fmt::Display for EventCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Classification => write!(f, "classification"),
            Self::Retrieval => write!(f, "retrieval"),
            Self::Synthesis => write!(f, "synthesis"),
            Self::VectorBackend => write!(f, "vector_backend"),
            Self::Pipeline => write!(f, "pipeline"),
            Self::System => write!(f, "system"),
        }
    }
}

/// A structured domain event for logging
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainEvent {
    pub timestamp: DateTime<Utc>,
    pub category: EventCategory,
    /// Specific event type (e.g., "question_classified", "primary_marked_down")
    pub event_type: String,
    pub entity_type: Option<String>,
    pub entity_id: Option<String>,
    pub result: OperationResult,
    pub duration_ms: Option<u64>,
    pub error: Option<String>,
    /// Correlates all events of one question
    pub request_id: Option<Uuid>,
    pub session_id: Option<String>,
    pub service: String,
    pub metadata: Option<serde_json::Value>,
}

impl DomainEvent {
    /// Create a new domain event builder
    pub fn new(service: impl Into<String>, category: EventCategory, event_type: impl Into<String>) -> DomainEventBuilder {
        DomainEventBuilder {
            service: service.into(),
            category,
            event_type: event_type.into(),
            entity_type: None,
            entity_id: None,
            result: OperationResult::Success,
            duration_ms: None,
            error: None,
            request_id: None,
            session_id: None,
            metadata: None,
        }
    }
}

/// Builder for constructing domain events
pub struct DomainEventBuilder {
    service: String,
    category: EventCategory,
    event_type: String,
    entity_type: Option<String>,
    entity_id: Option<String>,
    result: OperationResult,
    duration_ms: Option<u64>,
    error: Option<String>,
    request_id: Option<Uuid>,
    session_id: Option<String>,
    metadata: Option<serde_json::Value>,
}

impl DomainEventBuilder {
    pub fn entity(mut self, entity_type: impl Into<String>, entity_id: impl Into<String>) -> Self {
        self.entity_type = Some(entity_type.into());
        self.entity_id = Some(entity_id.into());
        self
    }

    pub fn result(mut self, result: OperationResult) -> Self {
        self.result = result;
        self
    }

    pub fn success(mut self) -> Self {
        self.result = OperationResult::Success;
        self
    }

    pub fn degraded(mut self) -> Self {
        self.result = OperationResult::Degraded;
        self
    }

    pub fn failure(mut self, error: impl Into<String>) -> Self {
        self.result = OperationResult::Failure;
        self.error = Some(error.into());
        self
    }

    pub fn duration_ms(mut self, ms: u64) -> Self {
        self.duration_ms = Some(ms);
        self
    }

    pub fn request(mut self, request_id: Uuid) -> Self {
        self.request_id = Some(request_id);
        self
    }

    pub fn session(mut self, session_id: Option<&str>) -> Self {
        self.session_id = session_id.map(str::to_string);
        self
    }

    pub fn metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Build and emit the event as a log
    pub fn emit(self) {
        let event = self.build();
        let json = serde_json::to_string(&event).unwrap_or_else(|_| "{}".to_string());

        match event.result {
            OperationResult::Success => tracing::info!(
                target: "domain_event",
                category = %event.category,
                event_type = %event.event_type,
                result = "success",
                "DomainEvent: {}", json
            ),
            OperationResult::Failure => tracing::error!(
                target: "domain_event",
                category = %event.category,
                event_type = %event.event_type,
                result = "failure",
                error = ?event.error,
                "DomainEvent: {}", json
            ),
            OperationResult::Degraded => tracing::warn!(
                target: "domain_event",
                category = %event.category,
                event_type = %event.event_type,
                result = "degraded",
                "DomainEvent: {}", json
            ),
            OperationResult::Skipped => tracing::debug!(
                target: "domain_event",
                category = %event.category,
                event_type = %event.event_type,
                result = "skipped",
                "DomainEvent: {}", json
            ),
        }
    }

    /// Build the event without emitting
    pub fn build(self) -> DomainEvent {
        DomainEvent {
            timestamp: Utc::now(),
            category: self.category,
            event_type: self.event_type,
            entity_type: self.entity_type,
            entity_id: self.entity_id,
            result: self.result,
            duration_ms: self.duration_ms,
            error: self.error,
            request_id: self.request_id,
            session_id: self.session_id,
            service: self.service,
            metadata: self.metadata,
        }
    }
}

// ============================================================================
// Convenience functions for pipeline events
// ============================================================================

/// Log the category picked for a question
pub fn log_question_classified(
    service: &str,
    request_id: Uuid,
    session_id: Option<&str>,
    category: &str,
    method: &str,
    confidence: f32,
    duration_ms: u64,
) {
    DomainEvent::new(service, EventCategory::Classification, "question_classified")
        .request(request_id)
        .session(session_id)
        .duration_ms(duration_ms)
        .metadata(serde_json::json!({
            "category": category,
            "method": method,
            "confidence": confidence
        }))
        .success()
        .emit();
}

/// Log the end of a retrieval pass
pub fn log_retrieval_completed(
    service: &str,
    request_id: Uuid,
    category: &str,
    evidence_count: usize,
    degraded: bool,
    duration_ms: u64,
) {
    let builder = DomainEvent::new(service, EventCategory::Retrieval, "retrieval_completed")
        .request(request_id)
        .duration_ms(duration_ms)
        .metadata(serde_json::json!({
            "category": category,
            "evidence_count": evidence_count
        }));

    if degraded {
        builder.degraded().emit();
    } else {
        builder.success().emit();
    }
}

/// Log a vector backend availability transition
pub fn log_backend_state_changed(service: &str, backend: &str, available: bool, detail: Option<&str>) {
    let builder = DomainEvent::new(service, EventCategory::VectorBackend, "backend_state_changed")
        .entity("vector_backend", backend)
        .metadata(serde_json::json!({ "available": available }));

    if available {
        builder.success().emit();
    } else {
        builder.failure(detail.unwrap_or("unavailable")).emit();
    }
}

/// Log a query the Secondary index answered because Primary was down
pub fn log_fallback_served(service: &str, match_count: usize) {
    DomainEvent::new(service, EventCategory::VectorBackend, "fallback_served")
        .entity("vector_backend", "secondary")
        .metadata(serde_json::json!({ "match_count": match_count }))
        .degraded()
        .emit();
}

/// Log a synthesized answer
pub fn log_answer_synthesized(
    service: &str,
    request_id: Uuid,
    evidence_used: usize,
    found: bool,
    duration_ms: u64,
) {
    DomainEvent::new(service, EventCategory::Synthesis, "answer_synthesized")
        .request(request_id)
        .duration_ms(duration_ms)
        .metadata(serde_json::json!({
            "evidence_used": evidence_used,
            "found": found
        }))
        .success()
        .emit();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_domain_event_builder() {
        let request_id = Uuid::new_v4();
        let event = DomainEvent::new("support-router", EventCategory::Retrieval, "retrieval_completed")
            .entity("source", "vector_index")
            .request(request_id)
            .session(Some("s-1"))
            .duration_ms(100)
            .degraded()
            .build();

        assert_eq!(event.service, "support-router");
        assert_eq!(event.event_type, "retrieval_completed");
        assert_eq!(event.entity_id, Some("vector_index".to_string()));
        assert_eq!(event.request_id, Some(request_id));
        assert_eq!(event.session_id.as_deref(), Some("s-1"));
        assert_eq!(event.result, OperationResult::Degraded);
    }

    #[test]
    fn failure_keeps_error_text() {
        let event = DomainEvent::new("support-router", EventCategory::VectorBackend, "backend_state_changed")
            .failure("connection refused")
            .build();

        assert_eq!(event.result, OperationResult::Failure);
        assert_eq!(event.error.as_deref(), Some("connection refused"));
        assert_eq!(event.category.to_string(), "vector_backend");
    }
}
