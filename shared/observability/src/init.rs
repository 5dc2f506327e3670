//! Subscriber setup for the support router binary and its tests.
//!
//! Output goes to stderr in both formats; stdout is reserved for command
//! results so `support-router ask ... | jq` keeps working.

use std::env;
use std::str::FromStr;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// One JSON object per line, for log shipping
    Json,
    /// Multi-line human-readable output
    Pretty,
}

impl LogFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Pretty => "pretty",
        }
    }
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "pretty" | "text" => Ok(Self::Pretty),
            other => Err(format!("unknown log format '{}'", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TracingConfig {
    pub service_name: String,
    pub environment: String,
    pub format: LogFormat,
    /// `EnvFilter` directive used when `RUST_LOG` is unset, e.g. `support_router=debug,info`
    pub level: String,
    /// Emit span open/close events (pipeline stage timings)
    pub log_spans: bool,
    pub include_location: bool,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            service_name: "support-router".to_string(),
            environment: "dev".to_string(),
            format: LogFormat::Pretty,
            level: "info".to_string(),
            log_spans: false,
            include_location: false,
        }
    }
}

impl TracingConfig {
    pub fn for_service(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            ..Default::default()
        }
    }

    /// Read `ENVIRONMENT`, `LOG_FORMAT`, `LOG_SPANS` and `LOG_LOCATION` through `lookup`.
    pub fn from_lookup<F>(service_name: impl Into<String>, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let flag = |key: &str| lookup(key).map(|v| v.eq_ignore_ascii_case("true")).unwrap_or(false);

        // No subscriber exists yet to report a bad value to
        let format = lookup("LOG_FORMAT")
            .and_then(|raw| raw.parse().ok())
            .unwrap_or(LogFormat::Pretty);

        Self {
            service_name: service_name.into(),
            environment: lookup("ENVIRONMENT").unwrap_or_else(|| "dev".to_string()),
            format,
            level: "info".to_string(),
            log_spans: flag("LOG_SPANS"),
            include_location: flag("LOG_LOCATION"),
        }
    }

    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.level = level.into();
        self
    }

    pub fn json(mut self) -> Self {
        self.format = LogFormat::Json;
        self
    }

    pub fn pretty(mut self) -> Self {
        self.format = LogFormat::Pretty;
        self
    }

    pub fn with_spans(mut self) -> Self {
        self.log_spans = true;
        self
    }
}

/// Install the global subscriber.
///
/// Returns `false` when a subscriber was already installed (tests, embedding
/// binaries); the existing one is kept.
///
/// ```ignore
/// use support_observability::{init_tracing, TracingConfig};
///
/// init_tracing(TracingConfig::for_service("support-router").json());
/// ```
pub fn init_tracing(config: TracingConfig) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let span_events = if config.log_spans {
        FmtSpan::NEW | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };

    let registry = tracing_subscriber::registry().with(filter);
    let installed = match config.format {
        LogFormat::Json => registry
            .with(
                fmt::layer()
                    .json()
                    .with_writer(std::io::stderr)
                    .with_span_events(span_events)
                    .with_current_span(true)
                    .with_file(config.include_location)
                    .with_line_number(config.include_location),
            )
            .try_init(),
        LogFormat::Pretty => registry
            .with(
                fmt::layer()
                    .pretty()
                    .with_writer(std::io::stderr)
                    .with_span_events(span_events)
                    .with_file(config.include_location)
                    .with_line_number(config.include_location),
            )
            .try_init(),
    };

    match installed {
        Ok(()) => {
            tracing::info!(
                service = %config.service_name,
                environment = %config.environment,
                format = config.format.as_str(),
                "Tracing initialized"
            );
            true
        }
        Err(e) => {
            tracing::debug!(error = %e, "Tracing subscriber already installed");
            false
        }
    }
}

/// Initialize from process environment; `SERVICE_NAME` overrides the service name.
pub fn init_tracing_from_env() -> bool {
    let service = env::var("SERVICE_NAME").unwrap_or_else(|_| "support-router".to_string());
    init_tracing(TracingConfig::from_lookup(service, |key| env::var(key).ok()))
}
