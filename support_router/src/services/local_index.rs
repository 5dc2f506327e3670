//! In-process brute-force cosine index used as the Secondary backend.

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

use crate::errors::{ProviderError, ProviderResult};
use crate::models::{matches_filter, BackendHealth, MetadataFilter, VectorMatch, VectorRecord};
use crate::services::vector_backend::VectorIndex;

pub struct LocalVectorIndex {
    dimension: usize,
    records: RwLock<HashMap<String, VectorRecord>>,
}

#[derive(Serialize, Deserialize)]
struct Snapshot {
    dimension: usize,
    records: Vec<VectorRecord>,
}

impl LocalVectorIndex {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            records: RwLock::new(HashMap::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    /// Load a JSON snapshot written by [`save`](Self::save).
    pub fn load(path: impl AsRef<Path>) -> ProviderResult<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let snapshot: Snapshot = serde_json::from_str(&content)?;

        let index = Self::new(snapshot.dimension);
        {
            let mut records = index.records.write();
            for record in snapshot.records {
                if record.embedding.len() != snapshot.dimension {
                    tracing::warn!(id = %record.id, "Skipping snapshot record with wrong dimension");
                    continue;
                }
                records.insert(record.id.clone(), record);
            }
        }

        tracing::info!(path = %path.as_ref().display(), records = index.len(), "Loaded local vector snapshot");
        Ok(index)
    }

    /// Load the snapshot if it exists, otherwise start empty.
    pub fn load_or_empty(path: impl AsRef<Path>, dimension: usize) -> Self {
        let path = path.as_ref();
        if !path.exists() {
            return Self::new(dimension);
        }
        match Self::load(path) {
            Ok(index) if index.dimension == dimension => index,
            Ok(index) => {
                tracing::warn!(snapshot = index.dimension, expected = dimension, "Snapshot dimension mismatch, starting empty");
                Self::new(dimension)
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Failed to load local vector snapshot, starting empty");
                Self::new(dimension)
            }
        }
    }

    pub fn save(&self, path: impl AsRef<Path>) -> ProviderResult<()> {
        let snapshot = {
            let records = self.records.read();
            let mut records: Vec<VectorRecord> = records.values().cloned().collect();
            records.sort_by(|a, b| a.id.cmp(&b.id));
            Snapshot {
                dimension: self.dimension,
                records,
            }
        };

        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(path.as_ref(), serde_json::to_vec(&snapshot)?)?;
        Ok(())
    }

    fn check_dimension(&self, len: usize) -> ProviderResult<()> {
        if len != self.dimension {
            return Err(ProviderError::InvalidRequest(format!(
                "expected {} dimensions, got {}",
                self.dimension, len
            )));
        }
        Ok(())
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

#[async_trait]
impl VectorIndex for LocalVectorIndex {
    fn name(&self) -> &str {
        "local"
    }

    async fn upsert(&self, records: &[VectorRecord]) -> ProviderResult<usize> {
        for record in records {
            self.check_dimension(record.embedding.len())?;
        }

        let mut stored = self.records.write();
        for record in records {
            stored.insert(record.id.clone(), record.clone());
        }
        Ok(records.len())
    }

    async fn query(
        &self,
        embedding: &[f32],
        top_k: usize,
        filter: Option<&MetadataFilter>,
    ) -> ProviderResult<Vec<VectorMatch>> {
        self.check_dimension(embedding.len())?;

        let records = self.records.read();
        let mut matches: Vec<VectorMatch> = records
            .values()
            .filter(|r| filter.map_or(true, |f| matches_filter(&r.metadata, f)))
            .map(|r| VectorMatch {
                id: r.id.clone(),
                score: cosine_similarity(embedding, &r.embedding),
                metadata: r.metadata.clone(),
            })
            .collect();

        matches.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.id.cmp(&b.id)));
        matches.truncate(top_k);
        Ok(matches)
    }

    async fn delete(&self, ids: &[String]) -> ProviderResult<usize> {
        let mut records = self.records.write();
        Ok(ids.iter().filter(|id| records.remove(*id).is_some()).count())
    }

    async fn health(&self) -> BackendHealth {
        BackendHealth {
            available: true,
            detail: Some(format!("{} records", self.len())),
        }
    }
}
