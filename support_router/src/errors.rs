use reqwest::StatusCode;
use thiserror::Error;

/// Failures the pipeline reports to its caller.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Empty or structurally invalid question, rejected before classification
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Every vector backend allowed to serve the call failed
    #[error("Retrieval backend unavailable: {0}")]
    RetrievalBackendUnavailable(String),

    /// Every source attempted for the route failed or came back empty
    #[error("No evidence available: {0}")]
    NoEvidenceAvailable(String),

    /// The generation call failed; no answer can be produced
    #[error("Synthesis unavailable: {0}")]
    SynthesisUnavailable(String),
}

pub type PipelineResult<T> = Result<T, PipelineError>;

/// Failures of an external collaborator (provider API, index, database).
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Quota exceeded: {0}")]
    Quota(String),

    #[error("Service unavailable: {0}")]
    Unavailable(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Storage error: {0}")]
    Storage(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ProviderError {
    /// Errors worth failing over for; a retry elsewhere may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Timeout(_) | Self::Auth(_) | Self::Quota(_) | Self::Unavailable(_) | Self::Transport(_)
        )
    }

    /// Map a non-success HTTP status from `service` into an error.
    pub fn from_status(service: &str, status: StatusCode, body: &str) -> Self {
        let detail = format!("{} returned {}: {}", service, status, body);
        match status.as_u16() {
            401 | 403 => Self::Auth(detail),
            408 => Self::Timeout(detail),
            429 => Self::Quota(detail),
            500..=599 => Self::Unavailable(detail),
            _ => Self::InvalidRequest(detail),
        }
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout(err.to_string())
        } else if err.is_decode() {
            Self::MalformedResponse(err.to_string())
        } else {
            Self::Transport(err.to_string())
        }
    }
}

pub type ProviderResult<T> = Result<T, ProviderError>;
