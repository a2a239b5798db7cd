#![allow(dead_code)]

use chrono::{DateTime, Utc};
use cwbridge::application::collector::{CollectorFactory, ScrapeParams};
use cwbridge::application::config_store::{ConfigSource, ConfigStore};
use cwbridge::domain::ports::{MonitoringApi, RoleAssumer};
use cwbridge::domain::session::Credentials;
use cwbridge::domain::settings::Settings;
use cwbridge::infrastructure::Metrics;
use cwbridge::infrastructure::mock::{MockMonitoringApi, MockRoleAssumer};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

pub const READER_ROLE: &str = "arn:aws:iam::123456789012:role/Reader";

/// One task `t1` with a single `NS/M` template and the given dimensions
pub fn single_template_config(dimensions: &str) -> String {
    format!(
        r#"
[defaults]
region = "us-east-1"

[fetch]
max_attempts = 2
base_backoff_ms = 1
max_backoff_ms = 2

[roles.accounts]
prod = "{role}"

[[tasks]]
name = "t1"

[[tasks.metrics]]
namespace = "NS"
name = "M"
[tasks.metrics.dimensions]
{dimensions}
"#,
        role = READER_ROLE,
        dimensions = dimensions
    )
}

pub fn settings(content: &str) -> Arc<Settings> {
    Arc::new(
        ConfigStore::load(&ConfigSource::Inline(content.to_string()))
            .expect("test configuration should be valid"),
    )
}

pub fn base_credentials() -> Arc<Credentials> {
    Arc::new(Credentials {
        access_key_id: "AKIDBASE".to_string(),
        secret_access_key: "base-secret".to_string(),
        session_token: None,
    })
}

pub fn factory(api: Arc<MockMonitoringApi>, assumer: Arc<MockRoleAssumer>) -> CollectorFactory {
    let api: Arc<dyn MonitoringApi> = api;
    let assumer: Arc<dyn RoleAssumer> = assumer;
    CollectorFactory::new(
        api,
        assumer,
        Some(base_credentials()),
        Metrics::new().expect("metrics"),
    )
}

pub fn params(target: &str, task: &str) -> ScrapeParams {
    ScrapeParams {
        target: Some(target.to_string()),
        task: Some(task.to_string()),
        region: None,
        role_arn: None,
    }
}

pub fn deadline() -> Instant {
    Instant::now() + Duration::from_secs(10)
}

/// A timestamp safely inside a default ten-minute window
pub fn recent() -> DateTime<Utc> {
    Utc::now() - chrono::Duration::seconds(60)
}

pub fn instance(pairs: &[(&str, &str)]) -> cwbridge::domain::query::Instance {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}
