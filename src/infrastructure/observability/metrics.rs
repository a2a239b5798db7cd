//! Process-wide self-monitoring metrics for cwbridge.
//!
//! Served on the telemetry path. Scraped CloudWatch data never lands in this
//! registry; every scrape renders through its own throwaway registry.

use prometheus::{
    Counter, CounterVec, Gauge, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder,
};
use std::sync::Arc;

/// Prometheus metrics describing the exporter itself
#[derive(Clone)]
pub struct Metrics {
    registry: Arc<Registry>,
    /// CloudWatch API calls (GetMetricData, ListMetrics). Role exchanges with
    /// STS are not counted.
    pub remote_calls_total: Counter,
    /// Remote calls answered with a throttling error
    pub throttled_calls_total: Counter,
    /// Scrapes by task and outcome
    pub scrapes_total: CounterVec,
    /// Scrape duration in seconds
    pub scrape_duration_seconds: HistogramVec,
    /// Configuration reloads by result
    pub config_reloads_total: CounterVec,
    /// 1 if the last reload succeeded
    pub config_last_reload_successful: Gauge,
}

impl Metrics {
    /// Create a new Metrics instance with all gauges and counters registered
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let remote_calls_total = Counter::with_opts(Opts::new(
            "cloudwatch_requests_total",
            "API requests made to CloudWatch",
        ))?;
        registry.register(Box::new(remote_calls_total.clone()))?;

        let throttled_calls_total = Counter::with_opts(Opts::new(
            "cloudwatch_exporter_throttled_calls_total",
            "CloudWatch API calls rejected by throttling",
        ))?;
        registry.register(Box::new(throttled_calls_total.clone()))?;

        let scrapes_total = CounterVec::new(
            Opts::new(
                "cloudwatch_exporter_scrapes_total",
                "Scrape requests by task and outcome",
            ),
            &["task", "outcome"],
        )?;
        registry.register(Box::new(scrapes_total.clone()))?;

        let scrape_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "cloudwatch_exporter_scrape_duration_seconds",
                "Scrape duration in seconds",
            )
            .buckets(vec![0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 20.0, 30.0]),
            &["task"],
        )?;
        registry.register(Box::new(scrape_duration_seconds.clone()))?;

        let config_reloads_total = CounterVec::new(
            Opts::new(
                "cloudwatch_exporter_config_reloads_total",
                "Configuration reloads by result",
            ),
            &["result"],
        )?;
        registry.register(Box::new(config_reloads_total.clone()))?;

        let config_last_reload_successful = Gauge::with_opts(Opts::new(
            "cloudwatch_exporter_config_last_reload_successful",
            "Whether the last configuration reload succeeded (1) or failed (0)",
        ))?;
        registry.register(Box::new(config_last_reload_successful.clone()))?;
        config_last_reload_successful.set(1.0);

        Ok(Self {
            registry: Arc::new(registry),
            remote_calls_total,
            throttled_calls_total,
            scrapes_total,
            scrape_duration_seconds,
            config_reloads_total,
            config_last_reload_successful,
        })
    }

    /// Render all metrics in Prometheus text format
    pub fn render(&self) -> String {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        encoder
            .encode_to_string(&metric_families)
            .unwrap_or_default()
    }

    pub fn observe_scrape(&self, task: &str, outcome: &str, seconds: f64) {
        self.scrapes_total.with_label_values(&[task, outcome]).inc();
        self.scrape_duration_seconds
            .with_label_values(&[task])
            .observe(seconds);
    }

    pub fn record_reload(&self, success: bool) {
        let result = if success { "success" } else { "failure" };
        self.config_reloads_total.with_label_values(&[result]).inc();
        self.config_last_reload_successful
            .set(if success { 1.0 } else { 0.0 });
    }
}
