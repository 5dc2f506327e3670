//! Quality signal side channel.
//!
//! Stage outcomes are handed to a [`QualityRecorder`] on a spawned task; the
//! pipeline never waits on the recorder and never sees its errors.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use support_observability::{DomainEvent, EventCategory};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum QualityStage {
    Classification,
    Retrieval,
    Synthesis,
}

impl QualityStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Classification => "classification",
            Self::Retrieval => "retrieval",
            Self::Synthesis => "synthesis",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityEvent {
    pub stage: QualityStage,
    pub payload: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

impl QualityEvent {
    pub fn new(stage: QualityStage, payload: serde_json::Value) -> Self {
        Self {
            stage,
            payload,
            timestamp: Utc::now(),
        }
    }
}

#[async_trait]
pub trait QualityRecorder: Send + Sync {
    async fn record(&self, event: QualityEvent) -> anyhow::Result<()>;
}

/// Forwards quality events to the log stream as domain events.
#[derive(Debug, Default, Clone)]
pub struct TracingQualityRecorder {
    service: String,
}

impl TracingQualityRecorder {
    pub fn new(service: impl Into<String>) -> Self {
        Self { service: service.into() }
    }
}

#[async_trait]
impl QualityRecorder for TracingQualityRecorder {
    async fn record(&self, event: QualityEvent) -> anyhow::Result<()> {
        let category = match event.stage {
            QualityStage::Classification => EventCategory::Classification,
            QualityStage::Retrieval => EventCategory::Retrieval,
            QualityStage::Synthesis => EventCategory::Synthesis,
        };

        DomainEvent::new(&self.service, category, format!("{}_quality", event.stage.as_str()))
            .metadata(event.payload)
            .success()
            .emit();
        Ok(())
    }
}

/// Non-blocking handle the pipeline stages emit through
#[derive(Clone, Default)]
pub struct QualitySink {
    recorder: Option<Arc<dyn QualityRecorder>>,
}

impl QualitySink {
    pub fn new(recorder: Arc<dyn QualityRecorder>) -> Self {
        Self { recorder: Some(recorder) }
    }

    /// Sink that drops every event.
    pub fn disabled() -> Self {
        Self { recorder: None }
    }

    pub fn emit(&self, stage: QualityStage, payload: serde_json::Value) {
        let Some(recorder) = self.recorder.clone() else {
            return;
        };

        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            tracing::debug!(stage = stage.as_str(), "No runtime for quality event, dropping");
            return;
        };

        let event = QualityEvent::new(stage, payload);
        handle.spawn(async move {
            if let Err(e) = recorder.record(event).await {
                tracing::warn!(stage = stage.as_str(), error = %e, "Quality recorder failed");
            }
        });
    }
}
