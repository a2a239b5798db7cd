//! Conversion of raw CloudWatch data points into exported samples.
//!
//! Output names are part of the public contract: dashboards and alert rules
//! query them, so [`normalize_name`] must stay stable.

use crate::domain::query::{DataPoint, MetricQuery};
use crate::domain::sample::Sample;
use crate::domain::settings::{MetricTemplate, Statistic};
use std::collections::BTreeMap;

pub const TARGET_LABEL: &str = "target";

/// Lower-cases the joined parts and collapses every run of
/// non-alphanumeric characters into a single `_`.
pub fn normalize_name(parts: &[&str]) -> String {
    let mut out = String::new();
    let mut pending_separator = false;
    for c in parts.join("_").chars() {
        if c.is_ascii_alphanumeric() {
            if pending_separator && !out.is_empty() {
                out.push('_');
            }
            pending_separator = false;
            out.push(c.to_ascii_lowercase());
        } else {
            pending_separator = true;
        }
    }
    if out.starts_with(|c: char| c.is_ascii_digit()) {
        out.insert(0, '_');
    }
    out
}

/// `<namespace>_<metric>`, suffixed with the statistic when a template
/// exports several statistics of the same metric.
pub fn output_name(
    namespace: &str,
    metric_name: &str,
    statistic: &Statistic,
    multiple_statistics: bool,
) -> String {
    if multiple_statistics {
        normalize_name(&[namespace, metric_name, statistic.as_str()])
    } else {
        normalize_name(&[namespace, metric_name])
    }
}

/// Maps a dimension or static label name onto a valid exposition label name.
pub fn label_name(raw: &str) -> String {
    let mut name: String = raw
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    name = name.trim_start_matches('_').to_string();
    if name.is_empty() || name.starts_with(|c: char| c.is_ascii_digit()) {
        name.insert_str(0, "dim_");
    }
    if name == TARGET_LABEL {
        name = "dimension_target".to_string();
    }
    name
}

/// Factor turning a CloudWatch unit into its base unit (seconds, bytes, bits)
pub fn unit_scale(unit: Option<&str>) -> f64 {
    let Some(unit) = unit else {
        return 1.0;
    };
    let base = unit.strip_suffix("/Second").unwrap_or(unit);
    match base {
        "Microseconds" => 1e-6,
        "Milliseconds" => 1e-3,
        "Kilobytes" => 1024.0,
        "Megabytes" => 1024.0 * 1024.0,
        "Gigabytes" => 1024.0 * 1024.0 * 1024.0,
        "Terabytes" => 1024.0 * 1024.0 * 1024.0 * 1024.0,
        "Kilobits" => 1e3,
        "Megabits" => 1e6,
        "Gigabits" => 1e9,
        "Terabits" => 1e12,
        _ => 1.0,
    }
}

/// Converts query results for one scrape target
pub struct SampleConverter {
    target: String,
    static_labels: Vec<(String, String)>,
}

impl SampleConverter {
    pub fn new(target: impl Into<String>, static_labels: &BTreeMap<String, String>) -> Self {
        Self {
            target: target.into(),
            static_labels: static_labels
                .iter()
                .map(|(k, v)| (label_name(k), v.clone()))
                .collect(),
        }
    }

    /// Picks the latest point inside the query window. A query without
    /// points in its window yields no sample.
    pub fn convert(&self, query: &MetricQuery, points: &[DataPoint]) -> Option<Sample> {
        let latest = points
            .iter()
            .filter(|p| query.window.contains(p.timestamp) && p.value.is_finite())
            .max_by_key(|p| p.timestamp)?;

        let mut labels = Vec::with_capacity(1 + query.dimensions.len() + self.static_labels.len());
        labels.push((TARGET_LABEL.to_string(), self.target.clone()));
        for dimension in &query.dimensions {
            push_unique(&mut labels, label_name(&dimension.name), dimension.value.clone());
        }
        for (name, value) in &self.static_labels {
            push_unique(&mut labels, name.clone(), value.clone());
        }

        Some(Sample {
            name: query.output_name.to_string(),
            labels,
            value: latest.value * unit_scale(query.unit.as_deref()),
            timestamp: latest.timestamp,
        })
    }

    /// Label names a template's samples carry, in emission order
    pub fn label_names(&self, template: &MetricTemplate) -> Vec<String> {
        let mut names = vec![TARGET_LABEL.to_string()];
        for dimension in &template.dimensions {
            let name = label_name(&dimension.name);
            if !names.contains(&name) {
                names.push(name);
            }
        }
        for (name, _) in &self.static_labels {
            if !names.contains(name) {
                names.push(name.clone());
            }
        }
        names
    }
}

fn push_unique(labels: &mut Vec<(String, String)>, name: String, value: String) {
    if !labels.iter().any(|(k, _)| *k == name) {
        labels.push((name, value));
    }
}
