use anyhow::{Context, Result};
use once_cell::sync::OnceCell;
use opentelemetry::trace::TracerProvider;
use opentelemetry_otlp::{Protocol, SpanExporter, WithExportConfig};
use opentelemetry_sdk::{Resource, trace::SdkTracerProvider};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_FILTER: &str = "info,tower_http=warn";

static PROVIDER: OnceCell<Option<SdkTracerProvider>> = OnceCell::new();

/// Configuration for tracing initialization.
#[derive(Clone, Debug)]
pub struct ObsConfig {
    pub service_name: &'static str,
    pub env_filter: Option<String>,
    pub otlp_endpoint: Option<String>,
}

impl Default for ObsConfig {
    fn default() -> Self {
        Self {
            service_name: "salary-server",
            env_filter: None,
            otlp_endpoint: None,
        }
    }
}

impl ObsConfig {
    /// Defaults overlaid with `RUST_LOG` and `OTLP_ENDPOINT`.
    pub fn from_env() -> Self {
        let non_empty = |key: &str| std::env::var(key).ok().filter(|v| !v.trim().is_empty());
        Self {
            env_filter: non_empty("RUST_LOG"),
            otlp_endpoint: non_empty("OTLP_ENDPOINT"),
            ..Self::default()
        }
    }

    fn filter(&self) -> &str {
        self.env_filter.as_deref().unwrap_or(DEFAULT_FILTER)
    }
}

/// Install the fmt subscriber, plus an OTLP span exporter when an endpoint
/// is configured. Later calls are no-ops.
pub fn init_tracing(config: ObsConfig) -> Result<()> {
    if PROVIDER.get().is_some() {
        return Ok(());
    }

    let env_filter = EnvFilter::try_new(config.filter())
        .with_context(|| format!("invalid log filter `{}`", config.filter()))?;
    let fmt_layer = tracing_subscriber::fmt::layer().with_target(false);
    let registry = tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer);

    let provider = match &config.otlp_endpoint {
        Some(endpoint) => {
            let exporter = SpanExporter::builder()
                .with_http()
                .with_protocol(Protocol::HttpBinary)
                .with_endpoint(endpoint.clone())
                .build()
                .context("failed to build OTLP exporter")?;
            let resource = Resource::builder()
                .with_service_name(config.service_name)
                .build();
            let provider = SdkTracerProvider::builder()
                .with_resource(resource)
                .with_batch_exporter(exporter)
                .build();
            let tracer = provider.tracer(config.service_name);
            registry
                .with(tracing_opentelemetry::layer().with_tracer(tracer))
                .try_init()?;
            Some(provider)
        }
        None => {
            registry.try_init()?;
            None
        }
    };

    let _ = PROVIDER.set(provider);
    Ok(())
}

/// Flush buffered spans before exit.
pub fn shutdown_tracing() {
    if let Some(Some(provider)) = PROVIDER.get() {
        if let Err(err) = provider.shutdown() {
            eprintln!("failed to flush spans: {err}");
        }
    }
}
