//! Support question pipeline
//!
//! Classifies a support question, gathers evidence from the vector index,
//! the structured support database and web search, and synthesizes a cited
//! answer. Vector queries fail over from the managed Primary index to a local
//! Secondary index while the Primary is unhealthy.

pub mod errors;
pub mod models;
pub mod services;

pub use errors::{PipelineError, PipelineResult, ProviderError, ProviderResult};
pub use services::pipeline::{PipelineResponse, SupportPipeline};
