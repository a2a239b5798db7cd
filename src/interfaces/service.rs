//! Transport-independent scrape entry point shared by the HTTP server and
//! the structured invocation handler.

use crate::application::collector::{CollectorFactory, ScrapeParams};
use crate::application::config_store::{ConfigSource, ConfigStore};
use crate::config::ExporterConfig;
use crate::domain::errors::{ConfigError, ScrapeError};
use crate::domain::settings::Settings;
use crate::infrastructure::HttpClientFactory;
use crate::infrastructure::aws::{CloudWatchClient, StsRoleAssumer, load_base_credentials};
use crate::infrastructure::observability::Metrics;
use anyhow::Context;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::warn;

#[derive(Debug, Error)]
pub enum ServeError {
    #[error(transparent)]
    Scrape(#[from] ScrapeError),

    #[error("Failed to render scrape output: {0}")]
    Render(#[from] prometheus::Error),
}

#[derive(Clone)]
pub struct ScrapeService {
    store: Arc<ConfigStore>,
    factory: Arc<CollectorFactory>,
}

impl ScrapeService {
    pub fn new(store: Arc<ConfigStore>, factory: Arc<CollectorFactory>) -> Self {
        Self { store, factory }
    }

    /// Wires the AWS bindings and loads the configuration file. A
    /// configuration error here is fatal.
    pub fn from_config(config: &ExporterConfig) -> anyhow::Result<Self> {
        let source = ConfigSource::File(PathBuf::from(&config.server.config_file));
        let store = ConfigStore::open(source).with_context(|| {
            format!("Failed to load configuration {}", config.server.config_file)
        })?;

        let metrics = Metrics::new().context("Failed to register exporter metrics")?;
        let http = HttpClientFactory::create_client(&config.aws);
        let base_credentials = load_base_credentials().map(Arc::new);

        let factory = CollectorFactory::new(
            Arc::new(CloudWatchClient::new(http.clone(), config.aws.clone())),
            Arc::new(StsRoleAssumer::new(
                http,
                config.aws.clone(),
                base_credentials.clone(),
            )),
            base_credentials,
            metrics,
        );
        Ok(Self::new(Arc::new(store), Arc::new(factory)))
    }

    pub fn metrics(&self) -> &Metrics {
        self.factory.metrics()
    }

    pub fn settings(&self) -> Arc<Settings> {
        self.store.current()
    }

    /// Runs one scrape and renders it. `timeout` can only shorten the
    /// configured scrape timeout.
    pub async fn scrape(
        &self,
        params: &ScrapeParams,
        timeout: Option<Duration>,
    ) -> Result<String, ServeError> {
        let started = Instant::now();
        let settings = self.store.current();
        // Unknown task names are not used as label values
        let task_label = params
            .task
            .as_deref()
            .and_then(|name| settings.task(name))
            .map(|task| task.name.clone())
            .unwrap_or_else(|| "unknown".to_string());

        let collector = match self.factory.new_collector(params, settings.clone()) {
            Ok(collector) => collector,
            Err(e) => {
                warn!("Rejected scrape request: {}", e);
                self.metrics().observe_scrape(
                    &task_label,
                    "invalid",
                    started.elapsed().as_secs_f64(),
                );
                return Err(ScrapeError::from(e).into());
            }
        };

        let limit = settings.defaults.scrape_timeout;
        let timeout = timeout.map_or(limit, |t| t.min(limit));
        let result = collector.collect(started + timeout).await;

        let outcome = match result {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!("Scrape of task {} failed: {}", task_label, e);
                self.metrics().observe_scrape(
                    &task_label,
                    "error",
                    started.elapsed().as_secs_f64(),
                );
                return Err(e.into());
            }
        };

        let label = if outcome.stats.query_errors > 0 || outcome.stats.deadline_exceeded > 0 {
            "partial"
        } else {
            "success"
        };
        self.metrics()
            .observe_scrape(&task_label, label, started.elapsed().as_secs_f64());
        Ok(outcome.render()?)
    }

    /// Reloads the configuration; the previous snapshot stays active on failure
    pub fn reload(&self) -> Result<(), ConfigError> {
        match self.store.reload() {
            Ok(_) => {
                self.metrics().record_reload(true);
                Ok(())
            }
            Err(e) => {
                warn!("Configuration reload failed, keeping previous snapshot: {}", e);
                self.metrics().record_reload(false);
                Err(e)
            }
        }
    }
}
