//! Environment-driven configuration for the support router.
//!
//! Values come from the process environment (after loading `.env`) with
//! defaults for everything optional, plus the JSON feature-toggle file.

pub mod feature_toggles;

use feature_toggles::FeatureToggles;

use std::str::FromStr;

/// Generative and embedding provider settings (OpenAI-compatible API).
#[derive(Debug, Clone)]
pub struct ProviderSettings {
    pub base_url: String,
    pub api_key: Option<String>,
    pub completion_model: String,
    pub embedding_model: String,
    pub embedding_dimension: usize,
}

/// Primary (remote) and Secondary (local) vector index settings.
#[derive(Debug, Clone)]
pub struct VectorSettings {
    pub remote_url: String,
    pub api_key: Option<String>,
    pub index_name: String,
    pub namespace: Option<String>,
    pub local_snapshot_path: String,
    /// Secondary may serve queries when Primary is down
    pub use_local_fallback: bool,
    pub health_ttl_secs: u64,
}

#[derive(Debug, Clone)]
pub struct DatabaseSettings {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone)]
pub struct WebSearchSettings {
    pub endpoint: String,
    pub api_key: Option<String>,
    pub max_results: usize,
    pub enabled: bool,
}

impl WebSearchSettings {
    /// Web search is only wired when a key is present and the toggle allows it.
    pub fn is_configured(&self) -> bool {
        self.enabled && self.api_key.is_some()
    }
}

/// Tunables of the classification / retrieval / synthesis pipeline.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub heuristic_confidence_floor: f32,
    pub min_accepted_confidence: f32,
    pub history_window: usize,
    pub vector_top_k: usize,
    pub min_knowledge_evidence: usize,
    pub source_timeout_ms: u64,
    pub classifier_timeout_ms: u64,
    pub synthesis_timeout_ms: u64,
    pub max_evidence: usize,
    pub evidence_token_budget: usize,
    pub structured_row_limit: usize,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            heuristic_confidence_floor: 0.85,
            min_accepted_confidence: 0.4,
            history_window: 5,
            vector_top_k: 5,
            min_knowledge_evidence: 2,
            source_timeout_ms: 5_000,
            classifier_timeout_ms: 10_000,
            synthesis_timeout_ms: 30_000,
            max_evidence: 6,
            evidence_token_budget: 3_000,
            structured_row_limit: 10,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub providers: ProviderSettings,
    pub vector: VectorSettings,
    pub database: DatabaseSettings,
    pub web_search: WebSearchSettings,
    pub pipeline: PipelineSettings,
    pub feature_toggles: FeatureToggles,
}

impl AppConfig {
    pub fn from_env() -> Self {
        dotenv::dotenv().ok();

        // Load feature toggles from default path or env var
        let toggles = FeatureToggles::from_env_path();

        Self::from_vars(|key| std::env::var(key).ok(), toggles)
    }

    /// Build from an arbitrary variable source; `from_env` passes the process environment.
    pub fn from_vars<F>(lookup: F, toggles: FeatureToggles) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let vars = Vars { lookup: &lookup };
        let defaults = PipelineSettings::default();

        let providers = ProviderSettings {
            base_url: vars.string("OPENAI_BASE_URL", "https://api.openai.com"),
            api_key: vars.optional("OPENAI_API_KEY"),
            completion_model: vars.string("OPENAI_COMPLETION_MODEL", "gpt-4o"),
            embedding_model: vars.string("OPENAI_EMBEDDING_MODEL", "text-embedding-ada-002"),
            embedding_dimension: vars.parsed("EMBEDDING_DIMENSION", 1536),
        };

        let vector = VectorSettings {
            remote_url: vars.string("PINECONE_INDEX_HOST", "http://localhost:5080"),
            api_key: vars.optional("PINECONE_API_KEY"),
            index_name: vars.string("PINECONE_INDEX_NAME", "tech-support-kb"),
            namespace: vars.optional("PINECONE_NAMESPACE"),
            local_snapshot_path: vars.string("LOCAL_VECTOR_SNAPSHOT", "data/local-vector-index.json"),
            use_local_fallback: vars.flag("USE_LOCAL_VECTOR_FALLBACK", true)
                && toggles.local_vector_fallback_enabled(),
            health_ttl_secs: vars.parsed("VECTOR_HEALTH_TTL_SECS", 30),
        };

        let database = DatabaseSettings {
            url: vars.string("DATABASE_URL", "postgres://localhost/tech_support"),
            max_connections: vars.parsed("DATABASE_MAX_CONNECTIONS", 5),
        };

        let web_search = WebSearchSettings {
            endpoint: vars.string("TAVILY_ENDPOINT", "https://api.tavily.com"),
            api_key: vars.optional("TAVILY_API_KEY"),
            max_results: vars.parsed("WEB_SEARCH_MAX_RESULTS", 5),
            enabled: toggles.web_search_enabled(),
        };

        let pipeline = PipelineSettings {
            heuristic_confidence_floor: vars
                .parsed("HEURISTIC_CONFIDENCE_FLOOR", defaults.heuristic_confidence_floor),
            min_accepted_confidence: vars
                .parsed("CLASSIFIER_MIN_CONFIDENCE", defaults.min_accepted_confidence),
            history_window: vars.parsed("HISTORY_WINDOW", defaults.history_window),
            vector_top_k: vars.parsed("VECTOR_TOP_K", defaults.vector_top_k),
            min_knowledge_evidence: vars
                .parsed("MIN_KNOWLEDGE_EVIDENCE", defaults.min_knowledge_evidence),
            source_timeout_ms: vars.parsed("SOURCE_TIMEOUT_MS", defaults.source_timeout_ms),
            classifier_timeout_ms: vars
                .parsed("CLASSIFIER_TIMEOUT_MS", defaults.classifier_timeout_ms),
            synthesis_timeout_ms: vars.parsed("SYNTHESIS_TIMEOUT_MS", defaults.synthesis_timeout_ms),
            max_evidence: vars.parsed("MAX_EVIDENCE", defaults.max_evidence),
            evidence_token_budget: vars
                .parsed("EVIDENCE_TOKEN_BUDGET", defaults.evidence_token_budget),
            structured_row_limit: vars.parsed("STRUCTURED_ROW_LIMIT", defaults.structured_row_limit),
        };

        Self {
            providers,
            vector,
            database,
            web_search,
            pipeline,
            feature_toggles: toggles,
        }
    }
}

struct Vars<'a> {
    lookup: &'a dyn Fn(&str) -> Option<String>,
}

impl Vars<'_> {
    fn optional(&self, key: &str) -> Option<String> {
        (self.lookup)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn string(&self, key: &str, default: &str) -> String {
        self.optional(key).unwrap_or_else(|| default.to_string())
    }

    fn parsed<T>(&self, key: &str, default: T) -> T
    where
        T: FromStr + Copy + std::fmt::Debug,
    {
        match self.optional(key) {
            Some(raw) => raw.parse().unwrap_or_else(|_| {
                tracing::warn!(key, value = %raw, default = ?default, "Unparsable config value, using default");
                default
            }),
            None => default,
        }
    }

    fn flag(&self, key: &str, default: bool) -> bool {
        match self.optional(key) {
            Some(raw) => matches!(raw.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"),
            None => default,
        }
    }
}
