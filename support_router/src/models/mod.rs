//! Data model shared by the pipeline stages

pub mod evidence;
pub mod query;
pub mod vector;

pub use evidence::{
    normalize_score, rank_evidence, AttemptStatus, EvidenceItem, EvidenceSource, RetrievalOutcome,
    SourceAttempt,
};
pub use query::{Category, ChatRole, ChatTurn, Classification, ClassificationMethod, Query};
pub use vector::{
    matches_filter, BackendHealth, BackendRole, Metadata, MetadataFilter, MetadataValue, VectorMatch,
    VectorRecord,
};
