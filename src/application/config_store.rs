//! Configuration snapshot store with atomic reload.
//!
//! Readers take an `Arc<Settings>` without locking; a reload builds and
//! validates a complete new snapshot before swapping it in, so a failed
//! reload leaves the previous snapshot untouched.

use crate::application::sample_converter::output_name;
use crate::config::document::{MetricDocument, SettingsDocument, TaskDocument};
use crate::domain::errors::ConfigError;
use crate::domain::settings::{
    Defaults, DimensionPattern, DimensionTemplate, FetchPolicy, MetricTemplate, ResolvedStatistic,
    RolePolicy, Settings, Statistic, TaskDefinition, is_region, is_role_arn,
};
use arc_swap::ArcSwap;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// CloudWatch accepts at most this many dimensions per metric
const MAX_DIMENSIONS: usize = 30;
const MIN_ROLE_DURATION_SECS: u64 = 900;
const MAX_ROLE_DURATION_SECS: u64 = 43_200;
pub const MAX_QUERIES_PER_CALL: usize = 500;

/// Where a configuration document comes from
#[derive(Debug, Clone)]
pub enum ConfigSource {
    File(PathBuf),
    Inline(String),
}

impl ConfigSource {
    fn read(&self) -> Result<String, ConfigError> {
        match self {
            ConfigSource::File(path) => {
                std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
                    path: path.display().to_string(),
                    source,
                })
            }
            ConfigSource::Inline(content) => Ok(content.clone()),
        }
    }
}

pub struct ConfigStore {
    current: ArcSwap<Settings>,
    source: ConfigSource,
}

impl ConfigStore {
    /// Parses and validates a document into a settings snapshot
    pub fn load(source: &ConfigSource) -> Result<Settings, ConfigError> {
        let content = source.read()?;
        let document = SettingsDocument::parse(&content)?;
        build_settings(document)
    }

    /// Initial load. Errors here are fatal for the caller.
    pub fn open(source: ConfigSource) -> Result<Self, ConfigError> {
        let settings = Self::load(&source)?;
        info!(
            "ConfigStore: Loaded {} task(s) from {:?}",
            settings.tasks.len(),
            source_label(&source)
        );
        Ok(Self {
            current: ArcSwap::from_pointee(settings),
            source,
        })
    }

    pub fn from_settings(settings: Settings, source: ConfigSource) -> Self {
        Self {
            current: ArcSwap::from_pointee(settings),
            source,
        }
    }

    /// Latest successfully loaded snapshot
    pub fn current(&self) -> Arc<Settings> {
        self.current.load_full()
    }

    /// Re-reads the source. On error the previous snapshot stays in effect.
    pub fn reload(&self) -> Result<Arc<Settings>, ConfigError> {
        let settings = Arc::new(Self::load(&self.source)?);
        self.current.store(settings.clone());
        info!(
            "ConfigStore: Reloaded {} task(s) from {:?}",
            settings.tasks.len(),
            source_label(&self.source)
        );
        Ok(settings)
    }
}

fn source_label(source: &ConfigSource) -> String {
    match source {
        ConfigSource::File(path) => path.display().to_string(),
        ConfigSource::Inline(_) => "<inline>".to_string(),
    }
}

/// Validates a document and resolves every metric template against task and
/// global defaults.
pub fn build_settings(document: SettingsDocument) -> Result<Settings, ConfigError> {
    let defaults = build_defaults(&document)?;
    let fetch = build_fetch_policy(&document)?;
    let roles = build_role_policy(&document)?;

    if document.tasks.is_empty() {
        return Err(ConfigError::NoTasks);
    }

    let mut tasks = BTreeMap::new();
    for task_doc in document.tasks {
        let task = build_task(task_doc, &defaults)?;
        if tasks.contains_key(&task.name) {
            return Err(ConfigError::DuplicateTask { task: task.name });
        }
        tasks.insert(task.name.clone(), task);
    }

    Ok(Settings {
        tasks,
        defaults,
        fetch,
        roles,
    })
}

fn build_defaults(document: &SettingsDocument) -> Result<Defaults, ConfigError> {
    let doc = &document.defaults;
    let base = Defaults::default();

    let statistics = match &doc.statistics {
        Some(raw) => parse_statistics(raw).map_err(|reason| ConfigError::InvalidSetting {
            field: "defaults.statistics".to_string(),
            reason,
        })?,
        None => base.statistics,
    };
    if statistics.is_empty() {
        return Err(ConfigError::InvalidSetting {
            field: "defaults.statistics".to_string(),
            reason: "at least one statistic is required".to_string(),
        });
    }

    let defaults = Defaults {
        statistics,
        period: doc.period_seconds.map(Duration::from_secs).unwrap_or(base.period),
        range: doc.range_seconds.map(Duration::from_secs).unwrap_or(base.range),
        delay: doc.delay_seconds.map(Duration::from_secs).unwrap_or(base.delay),
        max_fanout: doc.max_fanout.unwrap_or(base.max_fanout),
        require_role: doc.require_role.unwrap_or(base.require_role),
        region: doc.region.clone().filter(|r| !r.is_empty()),
        scrape_timeout: doc
            .scrape_timeout_seconds
            .map(Duration::from_secs)
            .unwrap_or(base.scrape_timeout),
    };

    if let Some(region) = &defaults.region {
        if !is_region(region) {
            return Err(ConfigError::InvalidSetting {
                field: "defaults.region".to_string(),
                reason: format!("{} is not an AWS region", region),
            });
        }
    }
    validate_period_range("defaults", defaults.period, defaults.range)
        .map_err(|reason| ConfigError::InvalidSetting {
            field: "defaults".to_string(),
            reason,
        })?;
    if defaults.max_fanout == 0 {
        return Err(ConfigError::InvalidSetting {
            field: "defaults.max_fanout".to_string(),
            reason: "must be positive".to_string(),
        });
    }
    if defaults.scrape_timeout.is_zero() {
        return Err(ConfigError::InvalidSetting {
            field: "defaults.scrape_timeout_seconds".to_string(),
            reason: "must be positive".to_string(),
        });
    }
    Ok(defaults)
}

fn build_fetch_policy(document: &SettingsDocument) -> Result<FetchPolicy, ConfigError> {
    let doc = &document.fetch;
    let base = FetchPolicy::default();
    let policy = FetchPolicy {
        max_queries_per_call: doc.max_queries_per_call.unwrap_or(base.max_queries_per_call),
        max_attempts: doc.max_attempts.unwrap_or(base.max_attempts),
        base_backoff: doc
            .base_backoff_ms
            .map(Duration::from_millis)
            .unwrap_or(base.base_backoff),
        max_backoff: doc
            .max_backoff_ms
            .map(Duration::from_millis)
            .unwrap_or(base.max_backoff),
        max_concurrent_calls: doc.max_concurrent_calls.unwrap_or(base.max_concurrent_calls),
    };

    let invalid = |field: &str, reason: &str| ConfigError::InvalidSetting {
        field: format!("fetch.{}", field),
        reason: reason.to_string(),
    };
    if policy.max_queries_per_call == 0 || policy.max_queries_per_call > MAX_QUERIES_PER_CALL {
        return Err(invalid("max_queries_per_call", "must be between 1 and 500"));
    }
    if policy.max_attempts == 0 {
        return Err(invalid("max_attempts", "must be positive"));
    }
    if policy.max_concurrent_calls == 0 {
        return Err(invalid("max_concurrent_calls", "must be positive"));
    }
    if policy.base_backoff > policy.max_backoff {
        return Err(invalid("base_backoff_ms", "must not exceed max_backoff_ms"));
    }
    Ok(policy)
}

fn build_role_policy(document: &SettingsDocument) -> Result<RolePolicy, ConfigError> {
    let doc = &document.roles;
    let base = RolePolicy::default();

    for (alias, arn) in &doc.accounts {
        if !is_role_arn(arn) {
            return Err(ConfigError::InvalidRoleArn {
                alias: alias.clone(),
                arn: arn.clone(),
            });
        }
    }

    let duration_secs = doc.duration_seconds.unwrap_or(base.duration.as_secs());
    if !(MIN_ROLE_DURATION_SECS..=MAX_ROLE_DURATION_SECS).contains(&duration_secs) {
        return Err(ConfigError::InvalidSetting {
            field: "roles.duration_seconds".to_string(),
            reason: format!(
                "must be between {} and {}",
                MIN_ROLE_DURATION_SECS, MAX_ROLE_DURATION_SECS
            ),
        });
    }
    let refresh_margin = doc
        .refresh_margin_seconds
        .map(Duration::from_secs)
        .unwrap_or(base.refresh_margin);
    if refresh_margin.as_secs() >= duration_secs {
        return Err(ConfigError::InvalidSetting {
            field: "roles.refresh_margin_seconds".to_string(),
            reason: "must be shorter than the role duration".to_string(),
        });
    }

    let session_name = doc.session_name.clone().unwrap_or(base.session_name);
    if session_name.is_empty() {
        return Err(ConfigError::InvalidSetting {
            field: "roles.session_name".to_string(),
            reason: "must not be empty".to_string(),
        });
    }

    Ok(RolePolicy {
        session_name,
        duration: Duration::from_secs(duration_secs),
        refresh_margin,
        accounts: doc.accounts.clone(),
    })
}

fn build_task(doc: TaskDocument, defaults: &Defaults) -> Result<TaskDefinition, ConfigError> {
    if doc.name.trim().is_empty() {
        return Err(ConfigError::InvalidSetting {
            field: "tasks.name".to_string(),
            reason: "must not be empty".to_string(),
        });
    }
    if doc.metrics.is_empty() {
        return Err(ConfigError::EmptyTask { task: doc.name });
    }

    let invalid = |reason: String| ConfigError::InvalidTemplate {
        task: doc.name.clone(),
        reason,
    };

    if let Some(region) = doc.default_region.as_deref().filter(|r| !r.is_empty()) {
        if !is_region(region) {
            return Err(ConfigError::InvalidSetting {
                field: format!("tasks.{}.default_region", doc.name),
                reason: format!("{} is not an AWS region", region),
            });
        }
    }

    let task_statistics = match &doc.statistics {
        Some(raw) => Some(parse_statistics(raw).map_err(invalid)?),
        None => None,
    };
    let task_period = doc.period_seconds.map(Duration::from_secs).unwrap_or(defaults.period);
    let task_range = doc.range_seconds.map(Duration::from_secs).unwrap_or(defaults.range);
    let task_delay = doc.delay_seconds.map(Duration::from_secs).unwrap_or(defaults.delay);

    let mut templates = Vec::with_capacity(doc.metrics.len());
    for metric in &doc.metrics {
        let inherited = task_statistics.as_deref().unwrap_or(&defaults.statistics);
        let template = build_template(metric, inherited, task_period, task_range, task_delay)
            .map_err(invalid)?;
        templates.push(template);
    }
    suffix_shared_metric_names(&mut templates);

    Ok(TaskDefinition {
        templates,
        default_region: doc.default_region.filter(|r| !r.is_empty()),
        require_role: doc.require_role.unwrap_or(defaults.require_role),
        labels: doc.labels,
        dimension_filters: doc.dimension_filters,
        name: doc.name,
    })
}

fn build_template(
    doc: &MetricDocument,
    inherited_statistics: &[Statistic],
    task_period: Duration,
    task_range: Duration,
    task_delay: Duration,
) -> Result<MetricTemplate, String> {
    if doc.namespace.trim().is_empty() {
        return Err("namespace must not be empty".to_string());
    }
    if doc.name.trim().is_empty() {
        return Err(format!("metric name in {} must not be empty", doc.namespace));
    }
    if doc.dimensions.len() > MAX_DIMENSIONS {
        return Err(format!(
            "{}/{} declares more than {} dimensions",
            doc.namespace, doc.name, MAX_DIMENSIONS
        ));
    }

    let mut dimensions = Vec::with_capacity(doc.dimensions.len());
    for (name, value) in &doc.dimensions {
        let raw = value.as_str().ok_or_else(|| {
            format!(
                "dimension {} of {}/{} must be a string pattern",
                name, doc.namespace, doc.name
            )
        })?;
        dimensions.push(DimensionTemplate {
            name: name.clone(),
            pattern: DimensionPattern::parse(raw),
        });
    }

    let mut statistics = match &doc.statistics {
        Some(raw) => parse_statistics(raw)?,
        None => inherited_statistics.to_vec(),
    };
    dedup_in_order(&mut statistics);
    if statistics.is_empty() {
        return Err(format!(
            "{}/{} resolves no statistic",
            doc.namespace, doc.name
        ));
    }

    let period = doc.period_seconds.map(Duration::from_secs).unwrap_or(task_period);
    let range = doc.range_seconds.map(Duration::from_secs).unwrap_or(task_range);
    let delay = doc.delay_seconds.map(Duration::from_secs).unwrap_or(task_delay);
    validate_period_range(&format!("{}/{}", doc.namespace, doc.name), period, range)?;

    let multiple = statistics.len() > 1;
    let statistics = statistics
        .into_iter()
        .map(|statistic| ResolvedStatistic {
            output_name: output_name(&doc.namespace, &doc.name, &statistic, multiple),
            statistic,
        })
        .collect();

    Ok(MetricTemplate {
        namespace: doc.namespace.clone(),
        metric_name: doc.name.clone(),
        dimensions,
        statistics,
        period,
        range,
        delay,
        unit: doc.unit.clone(),
        recently_active: doc.recently_active,
    })
}

/// Templates of one task that export the same namespace/metric under
/// different statistics would otherwise share an output name, so every
/// statistic of such a metric gets the suffixed name.
fn suffix_shared_metric_names(templates: &mut [MetricTemplate]) {
    let mut statistics: BTreeMap<(String, String), Vec<Statistic>> = BTreeMap::new();
    for template in templates.iter() {
        let seen = statistics
            .entry((template.namespace.clone(), template.metric_name.clone()))
            .or_default();
        for resolved in &template.statistics {
            if !seen.contains(&resolved.statistic) {
                seen.push(resolved.statistic.clone());
            }
        }
    }

    for template in templates.iter_mut() {
        let key = (template.namespace.clone(), template.metric_name.clone());
        if statistics.get(&key).is_some_and(|s| s.len() > 1) {
            for resolved in &mut template.statistics {
                resolved.output_name = output_name(
                    &template.namespace,
                    &template.metric_name,
                    &resolved.statistic,
                    true,
                );
            }
        }
    }
}

fn parse_statistics(raw: &[String]) -> Result<Vec<Statistic>, String> {
    raw.iter().map(|s| s.parse::<Statistic>()).collect()
}

fn dedup_in_order(statistics: &mut Vec<Statistic>) {
    let mut seen = Vec::with_capacity(statistics.len());
    statistics.retain(|s| {
        if seen.contains(s) {
            false
        } else {
            seen.push(s.clone());
            true
        }
    });
}

/// Period must be positive and either high resolution (1, 5, 10, 30) or a
/// multiple of 60; the window must hold at least one period.
fn validate_period_range(scope: &str, period: Duration, range: Duration) -> Result<(), String> {
    let secs = period.as_secs();
    if secs == 0 {
        return Err(format!("{}: period must be positive", scope));
    }
    if secs % 60 != 0 && ![1, 5, 10, 30].contains(&secs) {
        return Err(format!(
            "{}: period {}s must be 1, 5, 10, 30 or a multiple of 60",
            scope, secs
        ));
    }
    if range < period {
        return Err(format!(
            "{}: range {}s is shorter than period {}s",
            scope,
            range.as_secs(),
            secs
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const VALID: &str = r#"
        [defaults]
        statistics = ["Average"]
        period_seconds = 60
        range_seconds = 600

        [roles.accounts]
        prod = "arn:aws:iam::123456789012:role/Reader"

        [[tasks]]
        name = "t1"
        [tasks.labels]
        env = "prod"
        [[tasks.metrics]]
        namespace = "NS"
        name = "M"
        [tasks.metrics.dimensions]
        Id = "abc"

        [[tasks]]
        name = "ec2"
        require_role = true
        [[tasks.metrics]]
        namespace = "AWS/EC2"
        name = "CPUUtilization"
        statistics = ["Average", "Maximum"]
        period_seconds = 300
        [tasks.metrics.dimensions]
        InstanceId = "*"
    "#;

    fn inline(content: &str) -> ConfigSource {
        ConfigSource::Inline(content.to_string())
    }

    #[test]
    fn test_load_resolves_templates() {
        let settings = ConfigStore::load(&inline(VALID)).expect("valid config");
        assert_eq!(settings.tasks.len(), 2);

        let t1 = settings.task("t1").unwrap();
        assert!(!t1.require_role);
        let template = &t1.templates[0];
        assert_eq!(template.statistics.len(), 1);
        assert_eq!(template.statistics[0].output_name, "ns_m");
        assert_eq!(template.period, Duration::from_secs(60));
        assert_eq!(
            template.dimensions[0].pattern,
            DimensionPattern::Literal("abc".to_string())
        );

        let ec2 = settings.task("ec2").unwrap();
        assert!(ec2.require_role);
        let names: Vec<&str> = ec2.templates[0]
            .statistics
            .iter()
            .map(|s| s.output_name.as_str())
            .collect();
        assert_eq!(
            names,
            vec!["aws_ec2_cpuutilization_average", "aws_ec2_cpuutilization_maximum"]
        );
        assert!(ec2.templates[0].needs_discovery());
    }

    #[test]
    fn test_task_without_metrics_is_rejected() {
        let result = ConfigStore::load(&inline(
            r#"
            [[tasks]]
            name = "empty"
            "#,
        ));
        assert!(matches!(result, Err(ConfigError::EmptyTask { .. })));
    }

    #[test]
    fn test_no_tasks_is_rejected() {
        let result = ConfigStore::load(&inline("[defaults]\nperiod_seconds = 60\n"));
        assert!(matches!(result, Err(ConfigError::NoTasks)));
    }

    #[test]
    fn test_malformed_role_mapping_is_rejected() {
        let result = ConfigStore::load(&inline(
            r#"
            [roles.accounts]
            prod = "not-an-arn"
            [[tasks]]
            name = "t1"
            [[tasks.metrics]]
            namespace = "NS"
            name = "M"
            "#,
        ));
        assert!(matches!(result, Err(ConfigError::InvalidRoleArn { .. })));
    }

    #[test]
    fn test_invalid_period_is_rejected() {
        let result = ConfigStore::load(&inline(
            r#"
            [[tasks]]
            name = "t1"
            [[tasks.metrics]]
            namespace = "NS"
            name = "M"
            period_seconds = 45
            "#,
        ));
        assert!(matches!(result, Err(ConfigError::InvalidTemplate { .. })));
    }

    #[test]
    fn test_empty_namespace_is_rejected() {
        let result = ConfigStore::load(&inline(
            r#"
            [[tasks]]
            name = "t1"
            [[tasks.metrics]]
            namespace = ""
            name = "M"
            "#,
        ));
        assert!(matches!(result, Err(ConfigError::InvalidTemplate { .. })));
    }

    #[test]
    fn test_same_metric_with_different_statistics_gets_distinct_names() {
        let settings = ConfigStore::load(&inline(
            r#"
            [[tasks]]
            name = "t1"
            [[tasks.metrics]]
            namespace = "NS"
            name = "M"
            [tasks.metrics.dimensions]
            Id = "abc"
            [[tasks.metrics]]
            namespace = "NS"
            name = "M"
            statistics = ["Maximum"]
            [tasks.metrics.dimensions]
            Id = "abc"
            [[tasks.metrics]]
            namespace = "NS"
            name = "Other"
            "#,
        ))
        .expect("valid config");

        let names: Vec<&str> = settings
            .task("t1")
            .unwrap()
            .templates
            .iter()
            .flat_map(|t| t.statistics.iter().map(|s| s.output_name.as_str()))
            .collect();
        assert_eq!(names, vec!["ns_m_average", "ns_m_maximum", "ns_other"]);
    }

    #[test]
    fn test_malformed_region_is_rejected() {
        let result = ConfigStore::load(&inline(
            r#"
            [defaults]
            region = "attacker.example/?"
            [[tasks]]
            name = "t1"
            [[tasks.metrics]]
            namespace = "NS"
            name = "M"
            "#,
        ));
        assert!(matches!(result, Err(ConfigError::InvalidSetting { .. })));

        let result = ConfigStore::load(&inline(
            r#"
            [[tasks]]
            name = "t1"
            default_region = "us-east-1.evil"
            [[tasks.metrics]]
            namespace = "NS"
            name = "M"
            "#,
        ));
        assert!(matches!(result, Err(ConfigError::InvalidSetting { .. })));
    }

    #[test]
    fn test_duplicate_task_is_rejected() {
        let result = ConfigStore::load(&inline(
            r#"
            [[tasks]]
            name = "t1"
            [[tasks.metrics]]
            namespace = "NS"
            name = "M"
            [[tasks]]
            name = "t1"
            [[tasks.metrics]]
            namespace = "NS"
            name = "N"
            "#,
        ));
        assert!(matches!(result, Err(ConfigError::DuplicateTask { .. })));
    }

    #[test]
    fn test_failed_reload_keeps_previous_snapshot() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        file.write_all(VALID.as_bytes()).unwrap();
        file.flush().unwrap();

        let store = ConfigStore::open(ConfigSource::File(file.path().to_path_buf()))
            .expect("initial load");
        let before = store.current();

        std::fs::write(file.path(), "[[tasks]\nname = ").unwrap();
        assert!(store.reload().is_err());

        let after = store.current();
        assert!(Arc::ptr_eq(&before, &after));
        assert_eq!(after.tasks.len(), 2);
    }

    #[test]
    fn test_reload_swaps_snapshot_without_touching_old_readers() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        file.write_all(VALID.as_bytes()).unwrap();
        file.flush().unwrap();

        let store = ConfigStore::open(ConfigSource::File(file.path().to_path_buf()))
            .expect("initial load");
        let held = store.current();

        std::fs::write(
            file.path(),
            "[[tasks]]\nname = \"only\"\n[[tasks.metrics]]\nnamespace = \"NS\"\nname = \"M\"\n",
        )
        .unwrap();
        store.reload().expect("reload");

        assert_eq!(held.tasks.len(), 2);
        assert_eq!(store.current().tasks.len(), 1);
        assert!(store.current().task("only").is_some());
    }
}
