use crate::domain::settings::Statistic;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

/// A concrete `name=value` dimension
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Dimension {
    pub name: String,
    pub value: String,
}

impl Dimension {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// A resource instance reported by discovery: dimension name -> value
pub type Instance = BTreeMap<String, String>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    /// Window of length `range` ending `delay` before `now`
    pub fn ending_at(now: DateTime<Utc>, range: Duration, delay: Duration) -> Self {
        let end = now - chrono::Duration::from_std(delay).unwrap_or_default();
        let start = end - chrono::Duration::from_std(range).unwrap_or_default();
        Self { start, end }
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        at >= self.start && at <= self.end
    }
}

/// Fully resolved, executable metric query
#[derive(Debug, Clone, PartialEq)]
pub struct MetricQuery {
    pub namespace: String,
    pub metric_name: String,
    /// Dimensions in template declaration order
    pub dimensions: Vec<Dimension>,
    pub statistic: Statistic,
    pub period: Duration,
    pub window: TimeWindow,
    pub unit: Option<String>,
    /// Name the resulting samples are exported under
    pub output_name: Arc<str>,
}

/// One raw point returned by the monitoring API
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DataPoint {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
}
