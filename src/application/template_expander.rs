//! Expansion of cached metric templates into concrete metric queries.
//!
//! Output order is template declaration order, then discovered-instance
//! order, then statistic order, so an unchanged environment always yields
//! the same query sequence.

use crate::domain::errors::RemoteCallError;
use crate::domain::ports::{DimensionFilter, ListInstancesRequest};
use crate::domain::query::{Dimension, Instance, MetricQuery, TimeWindow};
use crate::domain::settings::{DimensionPattern, MetricTemplate, TaskDefinition};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::warn;

/// Enumerates resource instances for templates with discovery patterns
#[async_trait]
pub trait InstanceDiscovery: Send + Sync {
    async fn discover(
        &self,
        request: &ListInstancesRequest,
    ) -> Result<Vec<Instance>, RemoteCallError>;
}

#[derive(Debug, Default)]
pub struct Expansion {
    pub queries: Vec<MetricQuery>,
    /// Queries dropped by the fan-out cap
    pub truncated: usize,
    /// Templates whose discovery call failed
    pub discovery_errors: usize,
    /// Templates whose discovery call ran into the scrape deadline
    pub deadline_exceeded: usize,
}

pub struct TemplateExpander {
    max_fanout: usize,
}

impl TemplateExpander {
    pub fn new(max_fanout: usize) -> Self {
        Self { max_fanout }
    }

    pub async fn expand(
        &self,
        task: &TaskDefinition,
        target: &str,
        now: DateTime<Utc>,
        discovery: &dyn InstanceDiscovery,
    ) -> Expansion {
        let mut expansion = Expansion::default();

        for template in &task.templates {
            let instances = if template.needs_discovery() {
                if expansion.queries.len() >= self.max_fanout {
                    // No room left; the instance count is unknown without the listing call
                    expansion.truncated += template.statistics.len();
                    continue;
                }
                let request = discovery_request(template, target);
                match discovery.discover(&request).await {
                    Ok(instances) => Some(instances),
                    Err(RemoteCallError::DeadlineExceeded) => {
                        expansion.deadline_exceeded += 1;
                        continue;
                    }
                    Err(e) => {
                        warn!(
                            "TemplateExpander: Discovery failed for {}/{} in task {}: {}",
                            template.namespace, template.metric_name, task.name, e
                        );
                        expansion.discovery_errors += 1;
                        continue;
                    }
                }
            } else {
                None
            };

            let queries = expand_template(template, task, target, now, instances.as_deref());
            self.push_capped(&mut expansion, queries);
        }

        if expansion.truncated > 0 {
            warn!(
                "TemplateExpander: Task {} exceeded max fan-out of {}, dropped {} queries",
                task.name, self.max_fanout, expansion.truncated
            );
        }
        expansion
    }

    fn push_capped(&self, expansion: &mut Expansion, queries: Vec<MetricQuery>) {
        let room = self.max_fanout.saturating_sub(expansion.queries.len());
        let total = queries.len();
        expansion.queries.extend(queries.into_iter().take(room));
        expansion.truncated += total.saturating_sub(room);
    }
}

/// Builds the discovery filter: pinned values for literal and target
/// dimensions, name-only filters for discovered ones.
pub fn discovery_request(template: &MetricTemplate, target: &str) -> ListInstancesRequest {
    let filters = template
        .dimensions
        .iter()
        .map(|d| DimensionFilter {
            name: d.name.clone(),
            value: match &d.pattern {
                DimensionPattern::Literal(value) => Some(value.clone()),
                DimensionPattern::Target => Some(target.to_string()),
                DimensionPattern::DiscoverAll | DimensionPattern::Prefix(_) => None,
            },
        })
        .collect();

    ListInstancesRequest {
        namespace: template.namespace.clone(),
        metric_name: template.metric_name.clone(),
        filters,
        recently_active: template.recently_active,
    }
}

/// Pure expansion of one template. `instances` is `None` for templates
/// without discovery patterns.
pub fn expand_template(
    template: &MetricTemplate,
    task: &TaskDefinition,
    target: &str,
    now: DateTime<Utc>,
    instances: Option<&[Instance]>,
) -> Vec<MetricQuery> {
    let window = TimeWindow::ending_at(now, template.range, template.delay);

    let dimension_sets: Vec<Vec<Dimension>> = match instances {
        None => vec![
            template
                .dimensions
                .iter()
                .map(|d| {
                    let value = match &d.pattern {
                        DimensionPattern::Literal(value) => value.clone(),
                        DimensionPattern::Target => target.to_string(),
                        // Unreachable for templates without discovery
                        DimensionPattern::DiscoverAll | DimensionPattern::Prefix(_) => {
                            String::new()
                        }
                    };
                    Dimension::new(d.name.clone(), value)
                })
                .collect(),
        ],
        Some(instances) => matching_instances(template, task, target, instances),
    };

    let mut queries = Vec::with_capacity(dimension_sets.len() * template.statistics.len());
    for dimensions in dimension_sets {
        for resolved in &template.statistics {
            queries.push(MetricQuery {
                namespace: template.namespace.clone(),
                metric_name: template.metric_name.clone(),
                dimensions: dimensions.clone(),
                statistic: resolved.statistic.clone(),
                period: template.period,
                window,
                unit: template.unit.clone(),
                output_name: Arc::from(resolved.output_name.as_str()),
            });
        }
    }
    queries
}

/// Instances carrying exactly the template's dimensions with acceptable
/// values, deduplicated, in discovery order.
fn matching_instances(
    template: &MetricTemplate,
    task: &TaskDefinition,
    target: &str,
    instances: &[Instance],
) -> Vec<Vec<Dimension>> {
    let mut seen = HashSet::new();
    let mut sets = Vec::new();

    for instance in instances {
        if instance.len() != template.dimensions.len() {
            continue;
        }
        let mut dimensions = Vec::with_capacity(template.dimensions.len());
        let mut accepted = true;
        for d in &template.dimensions {
            match instance.get(&d.name) {
                Some(value) if d.pattern.accepts(value, target) && task.allows(&d.name, value) => {
                    dimensions.push(Dimension::new(d.name.clone(), value.clone()));
                }
                _ => {
                    accepted = false;
                    break;
                }
            }
        }
        if accepted && seen.insert(dimensions.clone()) {
            sets.push(dimensions);
        }
    }
    sets
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::settings::{DimensionTemplate, ResolvedStatistic, Statistic};
    use chrono::TimeZone;
    use std::collections::BTreeMap;
    use std::sync::Mutex;
    use std::time::Duration;

    struct FixedDiscovery {
        instances: Vec<Instance>,
        requests: Mutex<Vec<ListInstancesRequest>>,
        failure: Option<RemoteCallError>,
    }

    impl FixedDiscovery {
        fn new(instances: Vec<Instance>) -> Self {
            Self {
                instances,
                requests: Mutex::new(Vec::new()),
                failure: None,
            }
        }
    }

    #[async_trait]
    impl InstanceDiscovery for FixedDiscovery {
        async fn discover(
            &self,
            request: &ListInstancesRequest,
        ) -> Result<Vec<Instance>, RemoteCallError> {
            self.requests.lock().unwrap().push(request.clone());
            if let Some(e) = &self.failure {
                return Err(e.clone());
            }
            Ok(self.instances.clone())
        }
    }

    fn instance(pairs: &[(&str, &str)]) -> Instance {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn template(dimensions: &[(&str, &str)], statistics: &[&str]) -> MetricTemplate {
        MetricTemplate {
            namespace: "NS".to_string(),
            metric_name: "M".to_string(),
            dimensions: dimensions
                .iter()
                .map(|(name, raw)| DimensionTemplate {
                    name: name.to_string(),
                    pattern: DimensionPattern::parse(raw),
                })
                .collect(),
            statistics: statistics
                .iter()
                .map(|s| ResolvedStatistic {
                    statistic: s.parse::<Statistic>().unwrap(),
                    output_name: format!("ns_m_{}", s.to_lowercase()),
                })
                .collect(),
            period: Duration::from_secs(60),
            range: Duration::from_secs(600),
            delay: Duration::ZERO,
            unit: None,
            recently_active: false,
        }
    }

    fn task(templates: Vec<MetricTemplate>) -> TaskDefinition {
        TaskDefinition {
            name: "t1".to_string(),
            templates,
            default_region: None,
            require_role: false,
            labels: BTreeMap::new(),
            dimension_filters: BTreeMap::new(),
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 10, 10, 0, 0).unwrap()
    }

    fn ids(queries: &[MetricQuery]) -> Vec<String> {
        queries.iter().map(|q| q.dimensions[0].value.clone()).collect()
    }

    #[tokio::test]
    async fn test_literal_template_expands_directly() {
        let task = task(vec![template(&[("Id", "abc")], &["Average"])]);
        let discovery = FixedDiscovery::new(vec![]);

        let expansion = TemplateExpander::new(100)
            .expand(&task, "tgt1", now(), &discovery)
            .await;

        assert_eq!(expansion.queries.len(), 1);
        assert_eq!(expansion.queries[0].dimensions, vec![Dimension::new("Id", "abc")]);
        assert!(discovery.requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_discovery_preserves_instance_order() {
        let task = task(vec![template(&[("Id", "*")], &["Average"])]);
        let discovery = FixedDiscovery::new(vec![
            instance(&[("Id", "i-3")]),
            instance(&[("Id", "i-1")]),
            instance(&[("Id", "i-2")]),
        ]);

        let expansion = TemplateExpander::new(100)
            .expand(&task, "tgt1", now(), &discovery)
            .await;

        assert_eq!(ids(&expansion.queries), vec!["i-3", "i-1", "i-2"]);
    }

    #[tokio::test]
    async fn test_expansion_is_deterministic() {
        let task = task(vec![
            template(&[("Id", "*")], &["Average", "Maximum"]),
            template(&[("Id", "abc")], &["Sum"]),
        ]);
        let discovery = FixedDiscovery::new(vec![
            instance(&[("Id", "i-1")]),
            instance(&[("Id", "i-2")]),
        ]);
        let expander = TemplateExpander::new(100);

        let first = expander.expand(&task, "tgt1", now(), &discovery).await;
        let second = expander.expand(&task, "tgt1", now(), &discovery).await;

        assert_eq!(first.queries, second.queries);
        let names: Vec<&str> = first.queries.iter().map(|q| &*q.output_name).collect();
        assert_eq!(
            names,
            vec!["ns_m_average", "ns_m_maximum", "ns_m_average", "ns_m_maximum", "ns_m_sum"]
        );
    }

    #[test]
    fn test_discovered_instances_are_filtered_and_deduplicated() {
        let template = template(&[("Id", "web-*"), ("Zone", "$target")], &["Average"]);
        let mut task = task(vec![template.clone()]);
        task.dimension_filters
            .insert("Id".to_string(), vec!["web-1".to_string(), "web-2".to_string()]);

        let instances = vec![
            instance(&[("Id", "web-1"), ("Zone", "a")]),
            instance(&[("Id", "web-1"), ("Zone", "a")]),
            instance(&[("Id", "db-1"), ("Zone", "a")]),
            instance(&[("Id", "web-2"), ("Zone", "b")]),
            instance(&[("Id", "web-3"), ("Zone", "a")]),
            instance(&[("Id", "web-2")]),
            instance(&[("Id", "web-2"), ("Zone", "a"), ("Extra", "x")]),
            instance(&[("Id", "web-2"), ("Zone", "a")]),
        ];

        let queries = expand_template(&template, &task, "a", now(), Some(&instances));
        assert_eq!(ids(&queries), vec!["web-1", "web-2"]);
        assert_eq!(queries[1].dimensions[1], Dimension::new("Zone", "a"));
    }

    #[test]
    fn test_discovery_request_pins_known_values() {
        let template = template(&[("Id", "*"), ("Zone", "$target"), ("Env", "prod")], &["Sum"]);
        let request = discovery_request(&template, "eu-1a");

        assert_eq!(request.filters[0].value, None);
        assert_eq!(request.filters[1].value.as_deref(), Some("eu-1a"));
        assert_eq!(request.filters[2].value.as_deref(), Some("prod"));
    }

    #[tokio::test]
    async fn test_fanout_is_capped() {
        let task = task(vec![template(&[("Id", "*")], &["Average"])]);
        let discovery = FixedDiscovery::new(
            (0..10)
                .map(|i| instance(&[("Id", format!("i-{}", i).as_str())]))
                .collect(),
        );

        let expansion = TemplateExpander::new(4)
            .expand(&task, "tgt1", now(), &discovery)
            .await;

        assert_eq!(expansion.queries.len(), 4);
        assert_eq!(expansion.truncated, 6);
        assert_eq!(ids(&expansion.queries), vec!["i-0", "i-1", "i-2", "i-3"]);
    }

    #[tokio::test]
    async fn test_failed_discovery_skips_only_that_template() {
        let task = task(vec![
            template(&[("Id", "*")], &["Average"]),
            template(&[("Id", "abc")], &["Average"]),
        ]);
        let mut discovery = FixedDiscovery::new(vec![instance(&[("Id", "i-1")])]);
        discovery.failure = Some(RemoteCallError::Transport("connection reset".to_string()));

        let expansion = TemplateExpander::new(100)
            .expand(&task, "tgt1", now(), &discovery)
            .await;

        assert_eq!(expansion.discovery_errors, 1);
        assert_eq!(ids(&expansion.queries), vec!["abc"]);
    }

    #[tokio::test]
    async fn test_discovery_deadline_is_not_a_query_error() {
        let task = task(vec![template(&[("Id", "*")], &["Average"])]);
        let mut discovery = FixedDiscovery::new(vec![instance(&[("Id", "i-1")])]);
        discovery.failure = Some(RemoteCallError::DeadlineExceeded);

        let expansion = TemplateExpander::new(100)
            .expand(&task, "tgt1", now(), &discovery)
            .await;

        assert!(expansion.queries.is_empty());
        assert_eq!(expansion.deadline_exceeded, 1);
        assert_eq!(expansion.discovery_errors, 0);
    }

    #[tokio::test]
    async fn test_full_fanout_skips_later_discovery_calls() {
        let task = task(vec![
            template(&[("Id", "abc")], &["Average"]),
            template(&[("Id", "*")], &["Average", "Maximum"]),
        ]);
        let discovery = FixedDiscovery::new(vec![instance(&[("Id", "i-1")])]);

        let expansion = TemplateExpander::new(1)
            .expand(&task, "tgt1", now(), &discovery)
            .await;

        assert_eq!(ids(&expansion.queries), vec!["abc"]);
        assert_eq!(expansion.truncated, 2);
        assert!(discovery.requests.lock().unwrap().is_empty());
    }
}
