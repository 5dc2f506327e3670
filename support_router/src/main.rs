use anyhow::{bail, Context};
use serde::Deserialize;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use support_config::AppConfig;
use support_observability::{info, init_tracing_from_env, log_timed, warn};
use support_router::models::{Metadata, Query, VectorRecord};
use support_router::services::{
    AnswerSynthesizer, BackendHealthCache, ClassifierSettings, EmbeddingProvider, FailoverVectorIndex,
    LocalVectorIndex, OpenAiCompletionClient, OpenAiEmbeddingClient, PgSupportRepository, QualitySink,
    QueryClassifier, RemoteVectorIndex, RetrievalRouter, RouterSettings, SupportPipeline, SynthesizerSettings,
    TavilySearchClient, TracingQualityRecorder, VectorIndex, WebSearchProvider,
};

const SERVICE: &str = "support-router";

const USAGE: &str = "usage:
  support-router ask \"<question>\" [--user <id>] [--session <id>]
  support-router ingest <file.jsonl>
  support-router health";

/// Everything the commands need, built once from configuration
struct Components {
    config: AppConfig,
    embedder: Arc<dyn EmbeddingProvider>,
    local: Arc<LocalVectorIndex>,
    vectors: Arc<FailoverVectorIndex>,
}

impl Components {
    fn build(config: AppConfig) -> anyhow::Result<Self> {
        let providers = &config.providers;
        let timeout = Duration::from_millis(config.pipeline.source_timeout_ms);

        let embedder: Arc<dyn EmbeddingProvider> = Arc::new(
            OpenAiEmbeddingClient::new(
                providers.base_url.clone(),
                providers.api_key.clone(),
                providers.embedding_model.clone(),
                providers.embedding_dimension,
                timeout,
            )
            .context("failed to create embedding client")?,
        );

        let remote = RemoteVectorIndex::new(
            &config.vector.remote_url,
            config.vector.api_key.clone(),
            config.vector.index_name.clone(),
            config.vector.namespace.clone(),
            timeout,
        )
        .context("failed to create remote vector index client")?;

        let local = Arc::new(LocalVectorIndex::load_or_empty(
            &config.vector.local_snapshot_path,
            providers.embedding_dimension,
        ));
        info!(records = local.len(), path = %config.vector.local_snapshot_path, "Local vector index loaded");

        let health = Arc::new(BackendHealthCache::with_system_clock(Duration::from_secs(
            config.vector.health_ttl_secs,
        )));
        let vectors = Arc::new(FailoverVectorIndex::new(
            Arc::new(remote),
            Some(local.clone() as Arc<dyn VectorIndex>),
            config.vector.use_local_fallback,
            health,
        ));

        Ok(Self {
            config,
            embedder,
            local,
            vectors,
        })
    }

    fn pipeline(&self) -> anyhow::Result<SupportPipeline> {
        let config = &self.config;
        let quality = QualitySink::new(Arc::new(TracingQualityRecorder::new(SERVICE)));

        let classifier_completion = Arc::new(
            OpenAiCompletionClient::new(
                config.providers.base_url.clone(),
                config.providers.api_key.clone(),
                config.providers.completion_model.clone(),
                Duration::from_millis(config.pipeline.classifier_timeout_ms),
            )
            .context("failed to create completion client")?,
        );
        let synthesis_completion = Arc::new(
            OpenAiCompletionClient::new(
                config.providers.base_url.clone(),
                config.providers.api_key.clone(),
                config.providers.completion_model.clone(),
                Duration::from_millis(config.pipeline.synthesis_timeout_ms),
            )
            .context("failed to create completion client")?,
        );

        let structured = Arc::new(
            PgSupportRepository::connect_lazy(&config.database.url, config.database.max_connections)
                .context("failed to configure support database pool")?,
        );

        let web: Option<Arc<dyn WebSearchProvider>> = match (&config.web_search.api_key, config.web_search.is_configured()) {
            (Some(api_key), true) => {
                let client = TavilySearchClient::new(
                    config.web_search.endpoint.clone(),
                    api_key.clone(),
                    Duration::from_millis(config.pipeline.source_timeout_ms),
                )
                .context("failed to create web search client")?;
                Some(Arc::new(client) as Arc<dyn WebSearchProvider>)
            }
            _ => {
                info!("Web search not configured");
                None
            }
        };

        let classifier = QueryClassifier::new(classifier_completion, ClassifierSettings::from(&config.pipeline))
            .with_quality_sink(quality.clone());

        let router_settings = RouterSettings {
            web_max_results: config.web_search.max_results,
            ..RouterSettings::from(&config.pipeline)
        };
        let router = RetrievalRouter::new(self.embedder.clone(), self.vectors.clone(), structured, web, router_settings)
            .with_quality_sink(quality.clone());

        let synthesizer = AnswerSynthesizer::new(synthesis_completion, SynthesizerSettings::from(&config.pipeline))
            .with_quality_sink(quality);

        Ok(SupportPipeline::new(classifier, router, synthesizer))
    }
}

/// One line of an ingest file
#[derive(Debug, Deserialize)]
struct IngestLine {
    id: String,
    text: String,
    #[serde(default)]
    metadata: Metadata,
}

async fn ask(components: &Components, args: &[String]) -> anyhow::Result<()> {
    let mut question = None;
    let mut user = None;
    let mut session = None;

    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--user" => user = Some(iter.next().context("--user needs a value")?.clone()),
            "--session" => session = Some(iter.next().context("--session needs a value")?.clone()),
            other if question.is_none() => question = Some(other.to_string()),
            other => bail!("unexpected argument '{}'\n{}", other, USAGE),
        }
    }

    let mut query = Query::new(question.context(USAGE)?);
    if let Some(user) = user {
        query = query.with_user(user);
    }
    if let Some(session) = session {
        query = query.with_session(session);
    }

    let response = components.pipeline()?.answer(query).await?;
    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(())
}

async fn ingest(components: &Components, path: &Path) -> anyhow::Result<()> {
    let contents = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read {}", path.display()))?;

    let mut records = Vec::new();
    for (number, line) in contents.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let entry: IngestLine = serde_json::from_str(line)
            .with_context(|| format!("{}:{}: invalid ingest record", path.display(), number + 1))?;

        let embedding = match components.embedder.embed(&entry.text).await {
            Ok(embedding) => embedding,
            Err(e) => {
                warn!(id = %entry.id, error = %e, "Skipping record that could not be embedded");
                continue;
            }
        };

        let mut metadata = entry.metadata;
        metadata.insert("text".to_string(), entry.text.into());
        records.push(VectorRecord {
            id: entry.id,
            embedding,
            metadata,
        });
    }

    let written = log_timed!("ingest_upsert", components.vectors.upsert(&records).await)?;
    components
        .local
        .save(&components.config.vector.local_snapshot_path)
        .context("failed to save local vector snapshot")?;

    info!(read = records.len(), written, snapshot = %components.config.vector.local_snapshot_path, "Ingest completed");
    println!("{}", serde_json::json!({ "embedded": records.len(), "written": written }));
    Ok(())
}

async fn health(components: &Components) -> anyhow::Result<()> {
    let report = components.vectors.health_report().await;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing_from_env();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(command) = args.first() else {
        bail!(USAGE);
    };

    let config = AppConfig::from_env();
    info!(
        index = %config.vector.index_name,
        fallback = config.vector.use_local_fallback,
        features = ?config.feature_toggles.enabled_features(),
        "Configuration loaded"
    );
    let components = Components::build(config)?;

    match command.as_str() {
        "ask" => ask(&components, &args[1..]).await,
        "ingest" => {
            let path = args.get(1).context(USAGE)?;
            ingest(&components, Path::new(path)).await
        }
        "health" => health(&components).await,
        other => bail!("unknown command '{}'\n{}", other, USAGE),
    }
}
