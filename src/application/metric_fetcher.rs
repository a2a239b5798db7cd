//! Execution of metric queries against the remote monitoring API.
//!
//! Per-scrape unit: holds the region/role session, the shared limiter for
//! that pair, and the scrape deadline. Failures are scoped per query:
//! - throttling is retried with exponential backoff and jitter; a batch
//!   that stays throttled is split until the offending query is isolated,
//! - per-result API errors fail only their query,
//! - once the deadline passes, in-flight calls are dropped and every
//!   unfinished query reports `DeadlineExceeded`.

use crate::application::template_expander::InstanceDiscovery;
use crate::domain::errors::RemoteCallError;
use crate::domain::ports::{
    ListInstancesRequest, MetricDataQuery, MetricDataRequest, MonitoringApi, QueryStatus,
};
use crate::domain::query::{DataPoint, Instance, MetricQuery, TimeWindow};
use crate::domain::session::Session;
use crate::domain::settings::FetchPolicy;
use crate::infrastructure::observability::Metrics;
use async_trait::async_trait;
use rand::Rng;
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Result of one query after fetching
#[derive(Debug, Clone)]
pub struct QueryOutcome {
    pub query: MetricQuery,
    pub result: Result<Vec<DataPoint>, RemoteCallError>,
}

#[derive(Debug, Default)]
pub struct FetchOutcome {
    /// One entry per input query, in input order
    pub results: Vec<QueryOutcome>,
    /// Remote calls made by this fetch (discovery included)
    pub calls: u64,
    pub throttled_calls: u64,
}

impl FetchOutcome {
    /// Queries that failed for a reason other than the deadline
    pub fn failed(&self) -> usize {
        self.results
            .iter()
            .filter(|r| matches!(&r.result, Err(e) if *e != RemoteCallError::DeadlineExceeded))
            .count()
    }

    pub fn deadline_exceeded(&self) -> usize {
        self.results
            .iter()
            .filter(|r| matches!(r.result, Err(RemoteCallError::DeadlineExceeded)))
            .count()
    }
}

type BatchResult = Vec<(usize, Result<Vec<DataPoint>, RemoteCallError>)>;

pub struct MetricFetcher {
    api: Arc<dyn MonitoringApi>,
    session: Session,
    policy: FetchPolicy,
    limiter: Arc<Semaphore>,
    deadline: Instant,
    metrics: Metrics,
    calls: AtomicU64,
    throttled: AtomicU64,
}

impl MetricFetcher {
    pub fn new(
        api: Arc<dyn MonitoringApi>,
        session: Session,
        policy: FetchPolicy,
        limiter: Arc<Semaphore>,
        deadline: Instant,
        metrics: Metrics,
    ) -> Self {
        Self {
            api,
            session,
            policy,
            limiter,
            deadline,
            metrics,
            calls: AtomicU64::new(0),
            throttled: AtomicU64::new(0),
        }
    }

    /// Remote calls made so far
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }

    pub async fn fetch(&self, queries: Vec<MetricQuery>) -> FetchOutcome {
        let batches = self.plan_batches(&queries);
        debug!(
            "MetricFetcher: {} queries in {} batch(es) for region {}",
            queries.len(),
            batches.len(),
            self.session.region
        );

        let batch_results =
            futures::future::join_all(batches.into_iter().map(|batch| self.fetch_batch(&queries, batch)))
                .await;

        let mut by_index: HashMap<usize, Result<Vec<DataPoint>, RemoteCallError>> =
            batch_results.into_iter().flatten().collect();

        let results = queries
            .into_iter()
            .enumerate()
            .map(|(index, query)| QueryOutcome {
                result: by_index
                    .remove(&index)
                    .unwrap_or(Err(RemoteCallError::DeadlineExceeded)),
                query,
            })
            .collect();

        FetchOutcome {
            results,
            calls: self.calls(),
            throttled_calls: self.throttled.load(Ordering::Relaxed),
        }
    }

    /// Groups queries sharing a time window, in first-seen order, and chunks
    /// each group to the per-call query limit.
    fn plan_batches(&self, queries: &[MetricQuery]) -> Vec<Vec<usize>> {
        let mut groups: Vec<(TimeWindow, Vec<usize>)> = Vec::new();
        for (index, query) in queries.iter().enumerate() {
            match groups.iter_mut().find(|(window, _)| *window == query.window) {
                Some((_, members)) => members.push(index),
                None => groups.push((query.window, vec![index])),
            }
        }

        let chunk = self.policy.max_queries_per_call.max(1);
        groups
            .into_iter()
            .flat_map(|(_, members)| {
                members
                    .chunks(chunk)
                    .map(<[usize]>::to_vec)
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    async fn fetch_batch(&self, queries: &[MetricQuery], batch: Vec<usize>) -> BatchResult {
        let mut results = Vec::with_capacity(batch.len());
        let mut pending = VecDeque::from([batch]);

        while let Some(members) = pending.pop_front() {
            match self.fetch_pages(queries, &members).await {
                Ok(mut points) => {
                    for index in members {
                        let result = points.remove(&index).unwrap_or_else(|| Ok(Vec::new()));
                        results.push((index, result));
                    }
                }
                Err(RemoteCallError::Throttled { .. }) if members.len() > 1 => {
                    // Isolate the throttled query: retry each half on its own
                    let (left, right) = members.split_at(members.len() / 2);
                    pending.push_front(right.to_vec());
                    pending.push_front(left.to_vec());
                }
                Err(RemoteCallError::DeadlineExceeded) => {
                    for index in members.into_iter().chain(pending.drain(..).flatten()) {
                        results.push((index, Err(RemoteCallError::DeadlineExceeded)));
                    }
                }
                Err(e) => {
                    warn!(
                        "MetricFetcher: {} queries failed in region {}: {}",
                        members.len(),
                        self.session.region,
                        e
                    );
                    for index in members {
                        results.push((index, Err(e.clone())));
                    }
                }
            }
        }
        results
    }

    /// Follows continuation tokens until every page of the batch is read.
    async fn fetch_pages(
        &self,
        queries: &[MetricQuery],
        members: &[usize],
    ) -> Result<HashMap<usize, Result<Vec<DataPoint>, RemoteCallError>>, RemoteCallError> {
        let Some(&first) = members.first() else {
            return Ok(HashMap::new());
        };
        let ids: HashMap<String, usize> = members
            .iter()
            .map(|&index| (format!("q{}", index), index))
            .collect();

        let mut request = MetricDataRequest {
            queries: members
                .iter()
                .map(|&index| MetricDataQuery {
                    id: format!("q{}", index),
                    query: queries[index].clone(),
                })
                .collect(),
            window: queries[first].window,
            next_token: None,
        };

        let mut collected: HashMap<usize, Result<Vec<DataPoint>, RemoteCallError>> =
            HashMap::new();
        loop {
            let page = self
                .call(|| self.api.get_metric_data(&self.session, &request))
                .await?;

            for result in page.results {
                let Some(&index) = ids.get(&result.id) else {
                    debug!("MetricFetcher: Ignoring result for unknown id {}", result.id);
                    continue;
                };
                let entry = collected.entry(index).or_insert_with(|| Ok(Vec::new()));
                match result.status {
                    QueryStatus::Failed { code, message } => {
                        *entry = Err(RemoteCallError::Api { code, message });
                    }
                    QueryStatus::Complete | QueryStatus::PartialData => {
                        if let Ok(points) = entry {
                            points.extend(result.points);
                        }
                    }
                }
            }

            match page.next_token {
                Some(token) if request.next_token.as_deref() == Some(token.as_str()) => {
                    return Err(RemoteCallError::Decode(
                        "pagination token repeated".to_string(),
                    ));
                }
                Some(token) => {
                    debug!("MetricFetcher: Following continuation token");
                    request.next_token = Some(token);
                }
                None => return Ok(collected),
            }
        }
    }

    /// One remote operation with limiter, deadline and throttling backoff
    async fn call<T, F, Fut>(&self, mut operation: F) -> Result<T, RemoteCallError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, RemoteCallError>>,
    {
        let max_attempts = self.policy.max_attempts.max(1);
        for attempt in 1..=max_attempts {
            if Instant::now() >= self.deadline {
                return Err(RemoteCallError::DeadlineExceeded);
            }
            let result = {
                let _permit = tokio::time::timeout_at(self.deadline, self.limiter.acquire())
                    .await
                    .map_err(|_| RemoteCallError::DeadlineExceeded)?
                    .map_err(|_| RemoteCallError::Transport("call limiter closed".to_string()))?;

                self.calls.fetch_add(1, Ordering::Relaxed);
                self.metrics.remote_calls_total.inc();
                tokio::time::timeout_at(self.deadline, operation())
                    .await
                    .map_err(|_| RemoteCallError::DeadlineExceeded)?
            };

            match result {
                Err(e) if e.is_throttling() => {
                    self.throttled.fetch_add(1, Ordering::Relaxed);
                    self.metrics.throttled_calls_total.inc();
                    if attempt == max_attempts {
                        warn!(
                            "MetricFetcher: Still throttled after {} attempts in region {}",
                            attempt, self.session.region
                        );
                        return Err(RemoteCallError::Throttled { attempts: attempt });
                    }
                    let delay = backoff_delay(&self.policy, attempt);
                    debug!(
                        "MetricFetcher: Throttled (attempt {}/{}), backing off {:?}",
                        attempt, max_attempts, delay
                    );
                    if Instant::now() + delay >= self.deadline {
                        return Err(RemoteCallError::DeadlineExceeded);
                    }
                    tokio::time::sleep(delay).await;
                }
                other => return other,
            }
        }
        Err(RemoteCallError::Throttled {
            attempts: max_attempts,
        })
    }
}

#[async_trait]
impl InstanceDiscovery for MetricFetcher {
    async fn discover(
        &self,
        request: &ListInstancesRequest,
    ) -> Result<Vec<Instance>, RemoteCallError> {
        self.call(|| self.api.list_instances(&self.session, request))
            .await
    }
}

/// Exponential backoff capped at `max_backoff`, with jitter over the upper half
pub fn backoff_delay(policy: &FetchPolicy, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(16);
    let base_ms = policy.base_backoff.as_millis() as u64;
    let capped_ms = base_ms
        .saturating_mul(1u64 << exponent)
        .min(policy.max_backoff.as_millis() as u64);
    let jittered = if capped_ms > 1 {
        rand::rng().random_range(capped_ms / 2..=capped_ms)
    } else {
        capped_ms
    };
    Duration::from_millis(jittered)
}
