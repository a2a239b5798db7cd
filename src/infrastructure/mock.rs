//! In-memory stand-ins for the AWS bindings, used by tests and local runs.

use crate::domain::errors::{AuthError, RemoteCallError};
use crate::domain::ports::{
    ListInstancesRequest, MetricDataPage, MetricDataRequest, MetricDataResult, MonitoringApi,
    QueryStatus, RoleAssumer,
};
use crate::domain::query::{DataPoint, Instance, MetricQuery};
use crate::domain::session::{Credentials, ScopedCredentials, Session};
use crate::domain::settings::RolePolicy;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Session a mock call was made with
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedSession {
    pub region: String,
    pub role_arn: Option<String>,
    pub access_key_id: String,
}

#[derive(Default)]
struct MockState {
    points: HashMap<String, Vec<DataPoint>>,
    instances: Vec<Instance>,
    throttled: HashSet<String>,
    failing: HashMap<String, String>,
    throttle_next: u32,
    fail_discovery: bool,
    page_size: Option<usize>,
    latency: Duration,
    max_batch: usize,
    sessions: Vec<RecordedSession>,
    discovery_requests: Vec<ListInstancesRequest>,
}

/// Programmable monitoring API.
///
/// Queries are keyed by their dimension values joined with `,`
/// (`"abc"` for `Id=abc`).
#[derive(Default)]
pub struct MockMonitoringApi {
    state: Mutex<MockState>,
    calls: AtomicUsize,
}

impl MockMonitoringApi {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn set_points(&self, key: &str, points: Vec<(DateTime<Utc>, f64)>) {
        self.state().points.insert(
            key.to_string(),
            points
                .into_iter()
                .map(|(timestamp, value)| DataPoint { timestamp, value })
                .collect(),
        );
    }

    pub fn set_instances(&self, instances: Vec<Instance>) {
        self.state().instances = instances;
    }

    /// Every call carrying this query is answered with a throttling error
    pub fn throttle_dimension(&self, key: &str) {
        self.state().throttled.insert(key.to_string());
    }

    /// Throttle the next `n` calls regardless of content
    pub fn throttle_next_calls(&self, n: u32) {
        self.state().throttle_next = n;
    }

    /// The query's result carries a failed status with `code`
    pub fn fail_dimension(&self, key: &str, code: &str) {
        self.state()
            .failing
            .insert(key.to_string(), code.to_string());
    }

    pub fn fail_discovery(&self) {
        self.state().fail_discovery = true;
    }

    /// Results per GetMetricData page; unset returns everything at once
    pub fn set_page_size(&self, size: usize) {
        self.state().page_size = Some(size.max(1));
    }

    pub fn set_latency(&self, latency: Duration) {
        self.state().latency = latency;
    }

    /// Remote calls received so far
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn max_batch_size(&self) -> usize {
        self.state().max_batch
    }

    pub fn sessions(&self) -> Vec<RecordedSession> {
        self.state().sessions.clone()
    }

    pub fn discovery_requests(&self) -> Vec<ListInstancesRequest> {
        self.state().discovery_requests.clone()
    }

    /// Counts the call and applies the programmed latency. The lock is
    /// released before sleeping.
    async fn begin_call(&self, session: &Session) -> Result<(), RemoteCallError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let latency = {
            let mut state = self.state();
            state.sessions.push(RecordedSession {
                region: session.region.clone(),
                role_arn: session.role_arn.clone(),
                access_key_id: session.credentials.access_key_id.clone(),
            });
            state.latency
        };
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        let mut state = self.state();
        if state.throttle_next > 0 {
            state.throttle_next -= 1;
            return Err(throttling());
        }
        Ok(())
    }
}

pub fn query_key(query: &MetricQuery) -> String {
    query
        .dimensions
        .iter()
        .map(|d| d.value.as_str())
        .collect::<Vec<_>>()
        .join(",")
}

fn throttling() -> RemoteCallError {
    RemoteCallError::Api {
        code: "Throttling".to_string(),
        message: "Rate exceeded".to_string(),
    }
}

#[async_trait]
impl MonitoringApi for MockMonitoringApi {
    async fn list_instances(
        &self,
        session: &Session,
        request: &ListInstancesRequest,
    ) -> Result<Vec<Instance>, RemoteCallError> {
        self.begin_call(session).await?;

        let mut state = self.state();
        state.discovery_requests.push(request.clone());
        if state.fail_discovery {
            return Err(RemoteCallError::Transport("connection reset".to_string()));
        }
        Ok(state
            .instances
            .iter()
            .filter(|instance| {
                request.filters.iter().all(|f| match &f.value {
                    Some(value) => instance.get(&f.name) == Some(value),
                    None => instance.contains_key(&f.name),
                })
            })
            .cloned()
            .collect())
    }

    async fn get_metric_data(
        &self,
        session: &Session,
        request: &MetricDataRequest,
    ) -> Result<MetricDataPage, RemoteCallError> {
        self.begin_call(session).await?;

        let mut state = self.state();
        state.max_batch = state.max_batch.max(request.queries.len());

        if request
            .queries
            .iter()
            .any(|q| state.throttled.contains(&query_key(&q.query)))
        {
            return Err(throttling());
        }

        let offset = request
            .next_token
            .as_deref()
            .and_then(|t| t.parse::<usize>().ok())
            .unwrap_or(0);
        let size = state.page_size.unwrap_or(request.queries.len().max(1));
        let end = (offset + size).min(request.queries.len());

        let results = request.queries[offset.min(end)..end]
            .iter()
            .map(|q| {
                let key = query_key(&q.query);
                match state.failing.get(&key) {
                    Some(code) => MetricDataResult {
                        id: q.id.clone(),
                        points: Vec::new(),
                        status: QueryStatus::Failed {
                            code: code.clone(),
                            message: format!("{} for {}", code, key),
                        },
                    },
                    None => MetricDataResult {
                        id: q.id.clone(),
                        points: state.points.get(&key).cloned().unwrap_or_default(),
                        status: QueryStatus::Complete,
                    },
                }
            })
            .collect();

        Ok(MetricDataPage {
            results,
            next_token: (end < request.queries.len()).then(|| end.to_string()),
        })
    }
}

/// Role assumer that either always succeeds or always fails
pub struct MockRoleAssumer {
    failure: Option<String>,
    calls: AtomicUsize,
}

impl MockRoleAssumer {
    pub fn succeeding() -> Self {
        Self {
            failure: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing(reason: &str) -> Self {
        Self {
            failure: Some(reason.to_string()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RoleAssumer for MockRoleAssumer {
    async fn assume_role(
        &self,
        role_arn: &str,
        _region: &str,
        policy: &RolePolicy,
    ) -> Result<ScopedCredentials, AuthError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(reason) = &self.failure {
            return Err(AuthError::AssumeRole {
                role_arn: role_arn.to_string(),
                reason: reason.clone(),
            });
        }
        let role_name = role_arn.rsplit('/').next().unwrap_or(role_arn);
        Ok(ScopedCredentials {
            credentials: Credentials {
                access_key_id: format!("ASIA-{}", role_name),
                secret_access_key: "assumed-secret".to_string(),
                session_token: Some("assumed-token".to_string()),
            },
            expiry: Utc::now()
                + chrono::Duration::from_std(policy.duration).unwrap_or_default(),
        })
    }
}
