//! Application wiring: construct providers, sinks, and the scheduler from a
//! validated configuration, then run everything under one shutdown token.

use std::path::Path;
use std::sync::Arc;

use snafu::prelude::*;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use ttr_core::config::{setting_bool, setting_str, Config, ProviderConfig, SinkConfig};
use ttr_core::error::{NormalizeError, ProviderError, SinkError};
use ttr_core::model::{OffsetStore, Provider, Sink};
use ttr_core::offset::{MemoryOffsetStore, SqliteOffsetStore};
use ttr_core::server::{run_health_server, run_metrics_server};
use ttr_core::{HealthChecker, MetricsCollector, Normalizer, Scheduler};

use crate::providers::ecobee::{EcobeeProvider, DEFAULT_API_URL, DEFAULT_TOKEN_URL};
use crate::sinks::elasticsearch::{ElasticsearchSink, DEFAULT_INDEX_PREFIX};

/// Where polling offsets persist between restarts.
const OFFSET_DB_PATH: &str = "ttr-offsets.db";

/// Startup wiring failures. Any of these exits the process non-zero.
#[derive(Debug, Snafu)]
pub enum AppError {
    #[snafu(display("missing or invalid {key} in {component} config"))]
    MissingSetting {
        component: String,
        key: &'static str,
    },

    #[snafu(display("initializing {name} provider: {source}"))]
    ProviderInit { name: String, source: ProviderError },

    #[snafu(display("initializing {name} sink: {source}"))]
    SinkInit { name: String, source: SinkError },

    #[snafu(display("initializing normalizer: {source}"))]
    NormalizerInit { source: NormalizeError },

    #[snafu(display("no usable provider was configured"))]
    NoUsableProvider,

    #[snafu(display("no usable sink was configured"))]
    NoUsableSink,
}

/// All long-lived components, wired and ready to run.
pub struct App {
    scheduler: Arc<Scheduler>,
    health: Arc<HealthChecker>,
    metrics: Arc<MetricsCollector>,
    sinks: Vec<Arc<dyn Sink>>,
    health_port: u16,
    metrics_port: u16,
    shutdown: CancellationToken,
}

impl std::fmt::Debug for App {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("App")
            .field("health_port", &self.health_port)
            .field("metrics_port", &self.metrics_port)
            .field("sinks", &self.sinks.len())
            .finish_non_exhaustive()
    }
}

impl App {
    /// Wire the application with the durable offset store (falling back to
    /// the in-memory store when the database cannot be opened).
    pub fn build(config: &Config, shutdown: CancellationToken) -> Result<Self, AppError> {
        Self::build_with_offsets(config, open_offset_store(Path::new(OFFSET_DB_PATH)), shutdown)
    }

    /// Wire the application over a caller-supplied offset store.
    pub fn build_with_offsets(
        config: &Config,
        offsets: Arc<dyn OffsetStore>,
        shutdown: CancellationToken,
    ) -> Result<Self, AppError> {
        let mut providers: Vec<Arc<dyn Provider>> = Vec::new();
        for provider_config in config.enabled_providers() {
            match provider_config.name.as_str() {
                "ecobee" => {
                    providers.push(build_ecobee(provider_config, shutdown.clone())?);
                }
                other => warn!(provider = other, "unknown provider type, skipping"),
            }
        }
        if providers.is_empty() {
            return Err(AppError::NoUsableProvider);
        }

        let mut sinks: Vec<Arc<dyn Sink>> = Vec::new();
        for sink_config in config.enabled_sinks() {
            match sink_config.name.as_str() {
                "elasticsearch" => sinks.push(build_elasticsearch(sink_config)?),
                other => warn!(sink = other, "unknown sink type, skipping"),
            }
        }
        if sinks.is_empty() {
            return Err(AppError::NoUsableSink);
        }

        let normalizer =
            Normalizer::new(&config.ttr.timezone).context(NormalizerInitSnafu)?;
        let metrics = Arc::new(MetricsCollector::new());
        let health = Arc::new(HealthChecker::new(providers.clone(), sinks.clone()));

        let scheduler = Arc::new(Scheduler::new(
            providers,
            sinks.clone(),
            normalizer,
            offsets,
            config.ttr.poll_interval,
            config.ttr.backfill_window,
            metrics.clone(),
            shutdown.clone(),
        ));

        Ok(Self {
            scheduler,
            health,
            metrics,
            sinks,
            health_port: config.ttr.health_port,
            metrics_port: config.ttr.metrics_port,
            shutdown,
        })
    }

    /// Run until the shutdown token fires: signal handler, sink open, HTTP
    /// servers, and the scheduler loop.
    pub async fn run(self) {
        {
            let shutdown = self.shutdown.clone();
            tokio::spawn(async move {
                ttr_core::shutdown_signal().await;
                shutdown.cancel();
            });
        }

        for sink in &self.sinks {
            let name = sink.info().name;
            if let Err(err) = sink.open().await {
                // The sink may recover later; health reports it meanwhile.
                warn!(sink = %name, error = %err, "failed to open sink at startup");
            }
        }

        {
            let health = self.health.clone();
            let metrics = self.metrics.clone();
            let shutdown = self.shutdown.clone();
            let port = self.health_port;
            tokio::spawn(async move {
                if let Err(err) = run_health_server(port, health, metrics, shutdown).await {
                    error!(error = %err, "health server failed");
                }
            });
        }
        {
            let metrics = self.metrics.clone();
            let shutdown = self.shutdown.clone();
            let port = self.metrics_port;
            tokio::spawn(async move {
                if let Err(err) = run_metrics_server(port, metrics, shutdown).await {
                    error!(error = %err, "metrics server failed");
                }
            });
        }

        self.scheduler.clone().run().await;

        for sink in &self.sinks {
            let name = sink.info().name;
            if let Err(err) = sink.close().await {
                warn!(sink = %name, error = %err, "failed to close sink");
            }
        }
    }
}

/// Open the durable offset store, degrading to memory when it fails.
fn open_offset_store(path: &Path) -> Arc<dyn OffsetStore> {
    match SqliteOffsetStore::open(path) {
        Ok(store) => {
            info!(path = %path.display(), "using durable offset store");
            Arc::new(store)
        }
        Err(err) => {
            warn!(
                path = %path.display(),
                error = %err,
                "failed to open durable offset store, falling back to in-memory offsets"
            );
            Arc::new(MemoryOffsetStore::new())
        }
    }
}

fn build_ecobee(
    config: &ProviderConfig,
    shutdown: CancellationToken,
) -> Result<Arc<dyn Provider>, AppError> {
    let client_id = setting_str(&config.settings, "client_id")
        .ok_or_else(|| AppError::MissingSetting {
            component: config.name.clone(),
            key: "client_id",
        })?
        .to_string();
    let refresh_token = setting_str(&config.settings, "refresh_token")
        .ok_or_else(|| AppError::MissingSetting {
            component: config.name.clone(),
            key: "refresh_token",
        })?
        .to_string();
    let api_url = setting_str(&config.settings, "api_url")
        .unwrap_or(DEFAULT_API_URL)
        .to_string();
    let token_url = setting_str(&config.settings, "token_url")
        .unwrap_or(DEFAULT_TOKEN_URL)
        .to_string();

    info!(provider = %config.name, "initializing ecobee provider");
    let provider = EcobeeProvider::new(client_id, refresh_token, api_url, token_url, shutdown)
        .context(ProviderInitSnafu {
            name: config.name.clone(),
        })?;
    Ok(Arc::new(provider))
}

fn build_elasticsearch(config: &SinkConfig) -> Result<Arc<dyn Sink>, AppError> {
    let url = setting_str(&config.settings, "url")
        .ok_or_else(|| AppError::MissingSetting {
            component: config.name.clone(),
            key: "url",
        })?
        .to_string();
    let api_key = setting_str(&config.settings, "api_key")
        .filter(|key| !key.is_empty())
        .map(str::to_string);
    let index_prefix = setting_str(&config.settings, "index_prefix")
        .unwrap_or(DEFAULT_INDEX_PREFIX)
        .to_string();
    let create_templates = setting_bool(&config.settings, "create_templates").unwrap_or(true);

    info!(
        sink = %config.name,
        url = %url,
        index_prefix = %index_prefix,
        create_templates,
        "initializing elasticsearch sink"
    );
    let sink = ElasticsearchSink::new(url, api_key, index_prefix, create_templates).context(
        SinkInitSnafu {
            name: config.name.clone(),
        },
    )?;
    Ok(Arc::new(sink))
}
