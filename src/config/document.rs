//! On-disk schema of the exporter configuration (TOML).
//!
//! These types mirror the document one-to-one; validation and default
//! resolution happen when the document is turned into a
//! [`Settings`](crate::domain::settings::Settings) snapshot by the config store.

use serde::Deserialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct SettingsDocument {
    #[serde(default)]
    pub defaults: DefaultsDocument,
    #[serde(default)]
    pub fetch: FetchDocument,
    #[serde(default)]
    pub roles: RolesDocument,
    #[serde(default)]
    pub tasks: Vec<TaskDocument>,
}

impl SettingsDocument {
    pub fn parse(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct DefaultsDocument {
    pub statistics: Option<Vec<String>>,
    pub period_seconds: Option<u64>,
    pub range_seconds: Option<u64>,
    pub delay_seconds: Option<u64>,
    pub max_fanout: Option<usize>,
    pub require_role: Option<bool>,
    pub region: Option<String>,
    pub scrape_timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct FetchDocument {
    pub max_queries_per_call: Option<usize>,
    pub max_attempts: Option<u32>,
    pub base_backoff_ms: Option<u64>,
    pub max_backoff_ms: Option<u64>,
    pub max_concurrent_calls: Option<usize>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct RolesDocument {
    pub session_name: Option<String>,
    pub duration_seconds: Option<u64>,
    pub refresh_margin_seconds: Option<u64>,
    #[serde(default)]
    pub accounts: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TaskDocument {
    pub name: String,
    pub default_region: Option<String>,
    pub require_role: Option<bool>,
    pub statistics: Option<Vec<String>>,
    pub period_seconds: Option<u64>,
    pub range_seconds: Option<u64>,
    pub delay_seconds: Option<u64>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub dimension_filters: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub metrics: Vec<MetricDocument>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MetricDocument {
    pub namespace: String,
    pub name: String,
    /// Dimension name -> pattern. Declaration order is kept.
    #[serde(default)]
    pub dimensions: toml::Table,
    pub statistics: Option<Vec<String>>,
    pub period_seconds: Option<u64>,
    pub range_seconds: Option<u64>,
    pub delay_seconds: Option<u64>,
    pub unit: Option<String>,
    #[serde(default)]
    pub recently_active: bool,
}
