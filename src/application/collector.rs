//! Per-scrape collection units.
//!
//! [`CollectorFactory::new_collector`] validates the request parameters
//! against a settings snapshot and binds them into a single-use
//! [`Collector`]. Collecting consumes the collector; its output is rendered
//! through a registry created for that one scrape, so values of one target
//! can never show up in another target's response.

use crate::application::call_limiter::{LimiterKey, RemoteCallLimiter};
use crate::application::metric_fetcher::MetricFetcher;
use crate::application::sample_converter::SampleConverter;
use crate::application::template_expander::TemplateExpander;
use crate::domain::errors::{AuthError, ScrapeError, ValidationError};
use crate::domain::ports::{MonitoringApi, RoleAssumer};
use crate::domain::sample::{MetricDescriptor, Sample};
use crate::domain::session::{Credentials, Session};
use crate::domain::settings::{Settings, TaskDefinition, is_region};
use crate::infrastructure::observability::Metrics;
use chrono::Utc;
use prometheus::{Gauge, GaugeVec, Opts, Registry, TextEncoder};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Raw scrape parameters as received by a transport. Empty strings count
/// as missing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScrapeParams {
    pub target: Option<String>,
    pub task: Option<String>,
    pub region: Option<String>,
    pub role_arn: Option<String>,
}

impl ScrapeParams {
    fn field(value: &Option<String>) -> Option<&str> {
        value.as_deref().map(str::trim).filter(|v| !v.is_empty())
    }
}

/// Validated parameters of one scrape, bound to the snapshot it started with
#[derive(Debug, Clone)]
pub struct ScrapeContext {
    pub target: String,
    pub task: String,
    pub region: String,
    /// Resolved role ARN
    pub role_arn: Option<String>,
    pub settings: Arc<Settings>,
}

impl ScrapeContext {
    fn task_definition(&self) -> Option<&TaskDefinition> {
        self.settings.task(&self.task)
    }
}

pub struct CollectorFactory {
    api: Arc<dyn MonitoringApi>,
    assumer: Arc<dyn RoleAssumer>,
    base_credentials: Option<Arc<Credentials>>,
    limiter: Arc<RemoteCallLimiter>,
    metrics: Metrics,
}

impl CollectorFactory {
    pub fn new(
        api: Arc<dyn MonitoringApi>,
        assumer: Arc<dyn RoleAssumer>,
        base_credentials: Option<Arc<Credentials>>,
        metrics: Metrics,
    ) -> Self {
        Self {
            api,
            assumer,
            base_credentials,
            limiter: Arc::new(RemoteCallLimiter::new()),
            metrics,
        }
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Validates `params` against `settings`. No remote call is made here.
    pub fn new_collector(
        &self,
        params: &ScrapeParams,
        settings: Arc<Settings>,
    ) -> Result<Collector, ValidationError> {
        let task_name =
            ScrapeParams::field(&params.task).ok_or(ValidationError::MissingParameter {
                field: "task",
            })?;
        let task = settings
            .task(task_name)
            .ok_or_else(|| ValidationError::UnknownTask {
                task: task_name.to_string(),
            })?;
        let target =
            ScrapeParams::field(&params.target).ok_or(ValidationError::MissingParameter {
                field: "target",
            })?;

        let region = ScrapeParams::field(&params.region)
            .or(task.default_region.as_deref())
            .or(settings.defaults.region.as_deref())
            .ok_or(ValidationError::MissingParameter { field: "region" })?
            .to_string();
        if !is_region(&region) {
            return Err(ValidationError::InvalidRegion { value: region });
        }

        let role_arn = match ScrapeParams::field(&params.role_arn) {
            Some(value) => Some(settings.roles.resolve(value)?),
            None if task.require_role => {
                return Err(ValidationError::MissingParameter { field: "roleArn" });
            }
            None => None,
        };

        let context = ScrapeContext {
            target: target.to_string(),
            task: task.name.clone(),
            region,
            role_arn,
            settings,
        };

        Ok(Collector {
            context,
            api: self.api.clone(),
            assumer: self.assumer.clone(),
            base_credentials: self.base_credentials.clone(),
            limiter: self.limiter.clone(),
            metrics: self.metrics.clone(),
        })
    }
}

/// Single-use collection unit for one scrape request
pub struct Collector {
    context: ScrapeContext,
    api: Arc<dyn MonitoringApi>,
    assumer: Arc<dyn RoleAssumer>,
    base_credentials: Option<Arc<Credentials>>,
    limiter: Arc<RemoteCallLimiter>,
    metrics: Metrics,
}

impl Collector {
    pub fn context(&self) -> &ScrapeContext {
        &self.context
    }

    /// Metric names and label names this collector can emit
    pub fn describe(&self) -> Vec<MetricDescriptor> {
        let Some(task) = self.context.task_definition() else {
            return Vec::new();
        };
        let converter = SampleConverter::new(self.context.target.as_str(), &task.labels);

        let mut descriptors: Vec<MetricDescriptor> = Vec::new();
        for template in &task.templates {
            let label_names = converter.label_names(template);
            for resolved in &template.statistics {
                match descriptors
                    .iter_mut()
                    .find(|d| d.name == resolved.output_name)
                {
                    Some(existing) => {
                        for name in &label_names {
                            if !existing.label_names.contains(name) {
                                existing.label_names.push(name.clone());
                            }
                        }
                    }
                    None => descriptors.push(MetricDescriptor {
                        name: resolved.output_name.clone(),
                        help: format!(
                            "CloudWatch metric {} {} ({})",
                            template.namespace, template.metric_name, resolved.statistic
                        ),
                        label_names: label_names.clone(),
                    }),
                }
            }
        }
        descriptors
    }

    /// Expand, fetch and convert. Role assumption failure aborts the scrape;
    /// per-query failures only reduce the sample set.
    pub async fn collect(self, deadline: Instant) -> Result<ScrapeOutcome, ScrapeError> {
        let started = Instant::now();
        let descriptors = self.describe();
        let context = self.context;
        let Some(task) = context.task_definition() else {
            return Err(ValidationError::UnknownTask {
                task: context.task.clone(),
            }
            .into());
        };

        let session = match &context.role_arn {
            Some(role_arn) => {
                let exchange =
                    self.assumer
                        .assume_role(role_arn, &context.region, &context.settings.roles);
                let scoped = tokio::time::timeout_at(deadline, exchange)
                    .await
                    .map_err(|_| AuthError::AssumeRole {
                        role_arn: role_arn.clone(),
                        reason: "scrape deadline exceeded".to_string(),
                    })??;
                Session {
                    region: context.region.clone(),
                    credentials: Arc::new(scoped.credentials),
                    role_arn: Some(role_arn.clone()),
                }
            }
            None => Session {
                region: context.region.clone(),
                credentials: self
                    .base_credentials
                    .clone()
                    .ok_or(AuthError::MissingCredentials)?,
                role_arn: None,
            },
        };

        let settings = &context.settings;
        let semaphore = self.limiter.semaphore(
            &LimiterKey {
                region: context.region.clone(),
                role_arn: context.role_arn.clone(),
            },
            settings.fetch.max_concurrent_calls,
        );
        let fetcher = MetricFetcher::new(
            self.api,
            session,
            settings.fetch.clone(),
            semaphore,
            deadline,
            self.metrics,
        );

        let expansion = TemplateExpander::new(settings.defaults.max_fanout)
            .expand(task, &context.target, Utc::now(), &fetcher)
            .await;
        debug!(
            "Collector: Task {} expanded to {} queries for target {}",
            task.name,
            expansion.queries.len(),
            context.target
        );
        let fetched = fetcher.fetch(expansion.queries).await;

        let converter = SampleConverter::new(context.target.as_str(), &task.labels);
        let mut seen = HashSet::new();
        let samples: Vec<Sample> = fetched
            .results
            .iter()
            .filter_map(|outcome| match &outcome.result {
                Ok(points) => converter.convert(&outcome.query, points),
                Err(_) => None,
            })
            .filter(|sample| seen.insert((sample.name.clone(), sample.labels.clone())))
            .collect();

        let stats = ScrapeStats {
            remote_calls: fetched.calls,
            throttled_calls: fetched.throttled_calls,
            query_errors: fetched.failed() + expansion.discovery_errors,
            deadline_exceeded: fetched.deadline_exceeded() + expansion.deadline_exceeded,
            truncated: expansion.truncated,
            duration: started.elapsed(),
        };

        if stats.query_errors > 0 || stats.deadline_exceeded > 0 {
            warn!(
                "Collector: Task {} target {} finished with {} failed and {} timed-out queries",
                task.name, context.target, stats.query_errors, stats.deadline_exceeded
            );
        } else {
            info!(
                "Collector: Task {} target {} produced {} samples with {} calls in {:?}",
                task.name,
                context.target,
                samples.len(),
                stats.remote_calls,
                stats.duration
            );
        }

        Ok(ScrapeOutcome {
            descriptors,
            samples,
            stats,
        })
    }
}

/// Per-scrape counters exported next to the samples
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScrapeStats {
    pub remote_calls: u64,
    pub throttled_calls: u64,
    /// Failed queries plus failed discovery calls
    pub query_errors: usize,
    pub deadline_exceeded: usize,
    pub truncated: usize,
    pub duration: Duration,
}

/// Result of one collection, rendered once through its own registry
#[derive(Debug, Clone)]
pub struct ScrapeOutcome {
    pub descriptors: Vec<MetricDescriptor>,
    pub samples: Vec<Sample>,
    pub stats: ScrapeStats,
}

impl ScrapeOutcome {
    /// Registers the samples and scrape statistics into `registry`.
    /// Metrics absent from the descriptors are skipped.
    pub fn register(&self, registry: &Registry) -> prometheus::Result<()> {
        let mut families = Vec::with_capacity(self.descriptors.len());
        for descriptor in &self.descriptors {
            let label_names: Vec<&str> =
                descriptor.label_names.iter().map(String::as_str).collect();
            let gauge = GaugeVec::new(
                Opts::new(descriptor.name.as_str(), descriptor.help.as_str()),
                label_names.as_slice(),
            )?;
            registry.register(Box::new(gauge.clone()))?;
            families.push((descriptor, gauge));
        }

        for sample in &self.samples {
            let Some((descriptor, gauge)) = families.iter().find(|(d, _)| d.name == sample.name)
            else {
                warn!("Collector: No descriptor for sample {}", sample.name);
                continue;
            };
            let values: Vec<&str> = descriptor
                .label_names
                .iter()
                .map(|name| sample.label(name).unwrap_or(""))
                .collect();
            gauge
                .get_metric_with_label_values(values.as_slice())?
                .set(sample.value);
        }

        let stats = [
            (
                "cloudwatch_scrape_requests",
                "CloudWatch API calls made by this scrape",
                self.stats.remote_calls as f64,
            ),
            (
                "cloudwatch_scrape_query_errors",
                "Queries of this scrape that failed",
                self.stats.query_errors as f64,
            ),
            (
                "cloudwatch_scrape_deadline_exceeded_queries",
                "Queries of this scrape cut short by the deadline",
                self.stats.deadline_exceeded as f64,
            ),
            (
                "cloudwatch_scrape_truncated_queries",
                "Queries dropped by the fan-out limit",
                self.stats.truncated as f64,
            ),
            (
                "cloudwatch_scrape_duration_seconds",
                "Duration of this scrape in seconds",
                self.stats.duration.as_secs_f64(),
            ),
        ];
        for (name, help, value) in stats {
            if self.descriptors.iter().any(|d| d.name == name) {
                continue;
            }
            let gauge = Gauge::with_opts(Opts::new(name, help))?;
            gauge.set(value);
            registry.register(Box::new(gauge))?;
        }
        Ok(())
    }

    /// Text exposition of this scrape, through a registry used only here
    pub fn render(&self) -> prometheus::Result<String> {
        let registry = Registry::new();
        self.register(&registry)?;
        TextEncoder::new().encode_to_string(&registry.gather())
    }
}
