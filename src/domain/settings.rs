//! Validated, immutable configuration snapshot.
//!
//! A [`Settings`] value is built once per configuration load and never
//! mutated afterwards; scrapes hold an `Arc<Settings>` for their whole
//! duration.

use crate::domain::errors::ValidationError;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// CloudWatch statistic requested for a metric
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Statistic {
    SampleCount,
    Average,
    Sum,
    Minimum,
    Maximum,
    /// Extended statistic such as `p99` or `p99.9`
    Percentile(String),
}

impl Statistic {
    pub fn as_str(&self) -> &str {
        match self {
            Statistic::SampleCount => "SampleCount",
            Statistic::Average => "Average",
            Statistic::Sum => "Sum",
            Statistic::Minimum => "Minimum",
            Statistic::Maximum => "Maximum",
            Statistic::Percentile(p) => p,
        }
    }
}

impl FromStr for Statistic {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SampleCount" => Ok(Statistic::SampleCount),
            "Average" => Ok(Statistic::Average),
            "Sum" => Ok(Statistic::Sum),
            "Minimum" => Ok(Statistic::Minimum),
            "Maximum" => Ok(Statistic::Maximum),
            _ => {
                let value = s
                    .strip_prefix('p')
                    .and_then(|rest| rest.parse::<f64>().ok())
                    .filter(|v| (0.0..=100.0).contains(v));
                match value {
                    Some(_) => Ok(Statistic::Percentile(s.to_string())),
                    None => Err(format!(
                        "Invalid statistic: {}. Must be SampleCount, Average, Sum, Minimum, Maximum or pNN",
                        s
                    )),
                }
            }
        }
    }
}

impl fmt::Display for Statistic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the value of one dimension is obtained
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DimensionPattern {
    /// Fixed value
    Literal(String),
    /// The scrape request's `target` parameter
    Target,
    /// Every value the discovery call reports
    DiscoverAll,
    /// Discovered values starting with the prefix
    Prefix(String),
}

impl DimensionPattern {
    /// `*` discovers every value, `abc*` discovers values starting with `abc`,
    /// `$target` substitutes the scrape target, anything else is literal.
    pub fn parse(raw: &str) -> Self {
        match raw {
            "*" => DimensionPattern::DiscoverAll,
            "$target" | "$_target" => DimensionPattern::Target,
            _ => match raw.strip_suffix('*') {
                Some(prefix) => DimensionPattern::Prefix(prefix.to_string()),
                None => DimensionPattern::Literal(raw.to_string()),
            },
        }
    }

    pub fn needs_discovery(&self) -> bool {
        matches!(
            self,
            DimensionPattern::DiscoverAll | DimensionPattern::Prefix(_)
        )
    }

    /// Whether a discovered value satisfies the pattern
    pub fn accepts(&self, value: &str, target: &str) -> bool {
        match self {
            DimensionPattern::Literal(literal) => literal == value,
            DimensionPattern::Target => target == value,
            DimensionPattern::DiscoverAll => true,
            DimensionPattern::Prefix(prefix) => value.starts_with(prefix.as_str()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DimensionTemplate {
    pub name: String,
    pub pattern: DimensionPattern,
}

/// A statistic together with the output metric name it is exported under
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedStatistic {
    pub statistic: Statistic,
    pub output_name: String,
}

/// A metric template with every inherited default resolved.
///
/// Built at configuration load time and cached in the task definition.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricTemplate {
    pub namespace: String,
    pub metric_name: String,
    pub dimensions: Vec<DimensionTemplate>,
    pub statistics: Vec<ResolvedStatistic>,
    pub period: Duration,
    pub range: Duration,
    pub delay: Duration,
    pub unit: Option<String>,
    pub recently_active: bool,
}

impl MetricTemplate {
    pub fn needs_discovery(&self) -> bool {
        self.dimensions.iter().any(|d| d.pattern.needs_discovery())
    }
}

/// Named scrape profile
#[derive(Debug, Clone, PartialEq)]
pub struct TaskDefinition {
    pub name: String,
    pub templates: Vec<MetricTemplate>,
    pub default_region: Option<String>,
    pub require_role: bool,
    /// Static labels added to every sample of the task
    pub labels: BTreeMap<String, String>,
    /// Allowed values per dimension name, applied to discovered instances
    pub dimension_filters: BTreeMap<String, Vec<String>>,
}

impl TaskDefinition {
    pub fn allows(&self, dimension: &str, value: &str) -> bool {
        self.dimension_filters
            .get(dimension)
            .is_none_or(|allowed| allowed.iter().any(|v| v == value))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Defaults {
    pub statistics: Vec<Statistic>,
    pub period: Duration,
    pub range: Duration,
    pub delay: Duration,
    pub max_fanout: usize,
    pub require_role: bool,
    pub region: Option<String>,
    pub scrape_timeout: Duration,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            statistics: vec![Statistic::Average],
            period: Duration::from_secs(60),
            range: Duration::from_secs(600),
            delay: Duration::ZERO,
            max_fanout: 500,
            require_role: false,
            region: None,
            scrape_timeout: Duration::from_secs(25),
        }
    }
}

/// Remote call limits for the metric fetcher
#[derive(Debug, Clone, PartialEq)]
pub struct FetchPolicy {
    pub max_queries_per_call: usize,
    pub max_attempts: u32,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
    /// Outstanding calls allowed per (region, role) pair
    pub max_concurrent_calls: usize,
}

impl Default for FetchPolicy {
    fn default() -> Self {
        Self {
            max_queries_per_call: 500,
            max_attempts: 4,
            base_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(5),
            max_concurrent_calls: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RolePolicy {
    pub session_name: String,
    pub duration: Duration,
    pub refresh_margin: Duration,
    /// Account alias -> role ARN
    pub accounts: BTreeMap<String, String>,
}

impl Default for RolePolicy {
    fn default() -> Self {
        Self {
            session_name: "cwbridge".to_string(),
            duration: Duration::from_secs(900),
            refresh_margin: Duration::from_secs(60),
            accounts: BTreeMap::new(),
        }
    }
}

impl RolePolicy {
    /// Resolves a request's role parameter, either an account alias or a full ARN
    pub fn resolve(&self, value: &str) -> Result<String, ValidationError> {
        if let Some(arn) = self.accounts.get(value) {
            return Ok(arn.clone());
        }
        if is_role_arn(value) {
            Ok(value.to_string())
        } else {
            Err(ValidationError::InvalidRoleArn {
                value: value.to_string(),
            })
        }
    }
}

/// AWS region code such as `us-east-1`, `us-gov-west-1` or `cn-north-1`.
/// Regions end up in endpoint host names, so nothing else is accepted.
pub fn is_region(value: &str) -> bool {
    let parts: Vec<&str> = value.split('-').collect();
    let [geo, middle @ .., number] = parts.as_slice() else {
        return false;
    };
    geo.len() == 2
        && geo.chars().all(|c| c.is_ascii_lowercase())
        && !middle.is_empty()
        && middle
            .iter()
            .all(|p| !p.is_empty() && p.chars().all(|c| c.is_ascii_lowercase()))
        && !number.is_empty()
        && number.chars().all(|c| c.is_ascii_digit())
}

/// `arn:<partition>:iam::<12-digit account>:role/<name>`
pub fn is_role_arn(value: &str) -> bool {
    let parts: Vec<&str> = value.splitn(6, ':').collect();
    let [prefix, partition, service, region, account, resource] = parts.as_slice() else {
        return false;
    };
    *prefix == "arn"
        && partition.starts_with("aws")
        && *service == "iam"
        && region.is_empty()
        && account.len() == 12
        && account.chars().all(|c| c.is_ascii_digit())
        && resource
            .strip_prefix("role/")
            .is_some_and(|name| !name.is_empty() && !name.ends_with('/'))
}

/// Immutable configuration snapshot
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Settings {
    pub tasks: BTreeMap<String, TaskDefinition>,
    pub defaults: Defaults,
    pub fetch: FetchPolicy,
    pub roles: RolePolicy,
}

impl Settings {
    pub fn task(&self, name: &str) -> Option<&TaskDefinition> {
        self.tasks.get(name)
    }
}
