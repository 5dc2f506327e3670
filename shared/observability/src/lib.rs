//! Support router observability
//!
//! Logging setup and structured domain events shared by the pipeline crates.
//!
//! # Features
//! - JSON or pretty log output selected by environment
//! - Domain events for classification, retrieval and synthesis outcomes
//! - Logging macros for timed sections, external calls and cache lookups

pub mod domain_events;
pub mod init;
pub mod macros;

pub use domain_events::*;
pub use init::*;

// Re-export tracing for convenience
pub use tracing::{debug, error, info, warn, trace, span, Level, Instrument};
pub use tracing::instrument;
