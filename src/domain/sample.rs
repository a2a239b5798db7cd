use chrono::{DateTime, Utc};

/// One exported value: a converted CloudWatch data point
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub name: String,
    /// Ordered label pairs; `target` always comes first
    pub labels: Vec<(String, String)>,
    pub value: f64,
    pub timestamp: DateTime<Utc>,
}

impl Sample {
    pub fn label(&self, name: &str) -> Option<&str> {
        self.labels
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }
}

/// Name/help metadata emitted during the describe phase
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricDescriptor {
    pub name: String,
    pub help: String,
    /// Union of label names over every sample exported under `name`
    pub label_names: Vec<String>,
}
