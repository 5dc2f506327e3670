pub mod classifier;
pub mod completion;
pub mod embedding;
pub mod health_cache;
pub mod local_index;
pub mod pipeline;
pub mod recorder;
pub mod remote_index;
pub mod router;
pub mod structured_source;
pub mod synthesizer;
pub mod vector_backend;
pub mod web_search;

pub use classifier::{ClassifierSettings, QueryClassifier};
pub use completion::{CompletionOptions, CompletionProvider, OpenAiCompletionClient};
pub use embedding::{EmbeddingProvider, OpenAiEmbeddingClient};
pub use health_cache::{BackendHealthCache, Clock, HealthEntry, HealthState, ManualClock, SystemClock};
pub use local_index::LocalVectorIndex;
pub use pipeline::{PipelineResponse, SupportPipeline};
pub use recorder::{QualityEvent, QualityRecorder, QualitySink, QualityStage, TracingQualityRecorder};
pub use remote_index::RemoteVectorIndex;
pub use router::{RetrievalRouter, RouterSettings};
pub use structured_source::{PgSupportRepository, RecordFilter, RecordKind, StructuredDataSource, StructuredRow};
pub use synthesizer::{Answer, AnswerSynthesizer, Citation, SynthesizerSettings, NOT_FOUND_ANSWER};
pub use vector_backend::{FailoverQuery, FailoverVectorIndex, HealthReport, VectorIndex};
pub use web_search::{TavilySearchClient, WebResult, WebSearchProvider};
