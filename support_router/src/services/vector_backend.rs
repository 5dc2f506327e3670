//! Vector index capability and the Primary/Secondary failover wrapper.

use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;

use support_observability::{log_backend_state_changed, log_fallback_served, log_retry};

use crate::errors::{PipelineError, PipelineResult, ProviderResult};
use crate::models::{BackendHealth, BackendRole, MetadataFilter, VectorMatch, VectorRecord};
use crate::services::health_cache::{BackendHealthCache, HealthEntry};

const SERVICE: &str = "support-router";

/// Health-cache key of the Primary backend
pub const PRIMARY_BACKEND: &str = "primary";

#[async_trait]
pub trait VectorIndex: Send + Sync {
    fn name(&self) -> &str;

    /// Insert or replace records; returns how many were written.
    async fn upsert(&self, records: &[VectorRecord]) -> ProviderResult<usize>;

    /// Nearest neighbours, best first.
    async fn query(
        &self,
        embedding: &[f32],
        top_k: usize,
        filter: Option<&MetadataFilter>,
    ) -> ProviderResult<Vec<VectorMatch>>;

    async fn delete(&self, ids: &[String]) -> ProviderResult<usize>;

    async fn health(&self) -> BackendHealth;
}

/// Matches plus the backend that produced them
#[derive(Debug, Clone)]
pub struct FailoverQuery {
    pub matches: Vec<VectorMatch>,
    pub served_by: BackendRole,
}

impl FailoverQuery {
    pub fn is_degraded(&self) -> bool {
        self.served_by == BackendRole::Secondary
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub primary: BackendHealth,
    pub secondary: Option<BackendHealth>,
    pub fallback_enabled: bool,
}

pub struct FailoverVectorIndex {
    primary: Arc<dyn VectorIndex>,
    secondary: Option<Arc<dyn VectorIndex>>,
    fallback_enabled: bool,
    health: Arc<BackendHealthCache>,
}

impl FailoverVectorIndex {
    pub fn new(
        primary: Arc<dyn VectorIndex>,
        secondary: Option<Arc<dyn VectorIndex>>,
        fallback_enabled: bool,
        health: Arc<BackendHealthCache>,
    ) -> Self {
        Self {
            primary,
            secondary,
            fallback_enabled,
            health,
        }
    }

    pub fn health_cache(&self) -> &Arc<BackendHealthCache> {
        &self.health
    }

    fn fallback(&self) -> Option<&Arc<dyn VectorIndex>> {
        if self.fallback_enabled {
            self.secondary.as_ref()
        } else {
            None
        }
    }

    /// Cached Primary state, probing the backend when the entry is missing or stale.
    pub async fn primary_state(&self) -> HealthEntry {
        if let Some(entry) = self.health.get(PRIMARY_BACKEND) {
            return entry;
        }

        let probe = self.primary.health().await;
        let previous = self.health.last_known(PRIMARY_BACKEND);
        let entry = if probe.available {
            self.health.mark_available(PRIMARY_BACKEND)
        } else {
            self.health
                .mark_unavailable(PRIMARY_BACKEND, probe.detail.clone().unwrap_or_else(|| "probe failed".to_string()))
        };

        if previous.map(|p| p.state) != Some(entry.state) {
            log_backend_state_changed(SERVICE, self.primary.name(), probe.available, probe.detail.as_deref());
        }
        entry
    }

    /// Query Primary when it is believed available, else (or on failure) the Secondary.
    pub async fn query(
        &self,
        embedding: &[f32],
        top_k: usize,
        filter: Option<&MetadataFilter>,
    ) -> PipelineResult<FailoverQuery> {
        let state = self.primary_state().await;

        let primary_failure = if state.is_available() {
            match self.primary.query(embedding, top_k, filter).await {
                Ok(matches) => {
                    return Ok(FailoverQuery {
                        matches,
                        served_by: BackendRole::Primary,
                    })
                }
                Err(e) => {
                    if e.is_transient() {
                        self.health.mark_unavailable(PRIMARY_BACKEND, e.to_string());
                        log_backend_state_changed(SERVICE, self.primary.name(), false, Some(&e.to_string()));
                    }
                    e.to_string()
                }
            }
        } else {
            state
                .detail
                .clone()
                .unwrap_or_else(|| "primary marked unavailable".to_string())
        };

        let Some(secondary) = self.fallback() else {
            return Err(PipelineError::RetrievalBackendUnavailable(format!(
                "primary: {}; local fallback disabled",
                primary_failure
            )));
        };

        log_retry!("vector_query", 2, 2, &primary_failure);
        match secondary.query(embedding, top_k, filter).await {
            Ok(matches) => {
                log_fallback_served(SERVICE, matches.len());
                Ok(FailoverQuery {
                    matches,
                    served_by: BackendRole::Secondary,
                })
            }
            Err(e) => Err(PipelineError::RetrievalBackendUnavailable(format!(
                "primary: {}; secondary: {}",
                primary_failure, e
            ))),
        }
    }

    /// Write-through to Primary and, when fallback is enabled, Secondary.
    ///
    /// Returns the Primary's count, or the Secondary's when the Primary failed.
    pub async fn upsert(&self, records: &[VectorRecord]) -> PipelineResult<usize> {
        let primary = self.primary.upsert(records).await;
        let secondary = match self.fallback() {
            Some(index) => Some(index.upsert(records).await),
            None => None,
        };
        self.settle_write("upsert", primary, secondary)
    }

    pub async fn delete(&self, ids: &[String]) -> PipelineResult<usize> {
        let primary = self.primary.delete(ids).await;
        let secondary = match self.fallback() {
            Some(index) => Some(index.delete(ids).await),
            None => None,
        };
        self.settle_write("delete", primary, secondary)
    }

    fn settle_write(
        &self,
        operation: &str,
        primary: ProviderResult<usize>,
        secondary: Option<ProviderResult<usize>>,
    ) -> PipelineResult<usize> {
        match (primary, secondary) {
            (Ok(count), secondary) => {
                if let Some(Err(e)) = secondary {
                    tracing::warn!(operation, error = %e, "Secondary index write failed; indexes may diverge");
                }
                Ok(count)
            }
            (Err(primary_err), Some(Ok(count))) => {
                tracing::warn!(operation, error = %primary_err, "Primary index write failed; only the local index was updated");
                if primary_err.is_transient() {
                    self.health.mark_unavailable(PRIMARY_BACKEND, primary_err.to_string());
                }
                Ok(count)
            }
            (Err(primary_err), Some(Err(secondary_err))) => Err(PipelineError::RetrievalBackendUnavailable(
                format!("{} failed on primary: {}; secondary: {}", operation, primary_err, secondary_err),
            )),
            (Err(primary_err), None) => Err(PipelineError::RetrievalBackendUnavailable(format!(
                "{} failed on primary: {}",
                operation, primary_err
            ))),
        }
    }

    /// Probe both backends now and refresh the Primary cache entry.
    pub async fn health_report(&self) -> HealthReport {
        let primary = self.primary.health().await;
        if primary.available {
            self.health.mark_available(PRIMARY_BACKEND);
        } else {
            self.health.mark_unavailable(
                PRIMARY_BACKEND,
                primary.detail.clone().unwrap_or_else(|| "probe failed".to_string()),
            );
        }

        let secondary = match &self.secondary {
            Some(index) => Some(index.health().await),
            None => None,
        };

        HealthReport {
            primary,
            secondary,
            fallback_enabled: self.fallback_enabled,
        }
    }
}
