use crate::domain::errors::{AuthError, RemoteCallError};
use crate::domain::query::{DataPoint, Instance, MetricQuery, TimeWindow};
use crate::domain::session::{ScopedCredentials, Session};
use crate::domain::settings::RolePolicy;
use async_trait::async_trait;

/// Discovery filter: a dimension name, optionally pinned to a value
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DimensionFilter {
    pub name: String,
    pub value: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ListInstancesRequest {
    pub namespace: String,
    pub metric_name: String,
    pub filters: Vec<DimensionFilter>,
    /// Restrict to metrics that received data in the last three hours
    pub recently_active: bool,
}

/// One GetMetricData query, tagged with the id results are matched by
#[derive(Debug, Clone, PartialEq)]
pub struct MetricDataQuery {
    pub id: String,
    pub query: MetricQuery,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MetricDataRequest {
    pub queries: Vec<MetricDataQuery>,
    pub window: TimeWindow,
    pub next_token: Option<String>,
}

/// Status of one query inside a GetMetricData page
#[derive(Debug, Clone, PartialEq)]
pub enum QueryStatus {
    Complete,
    PartialData,
    Failed { code: String, message: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct MetricDataResult {
    pub id: String,
    pub points: Vec<DataPoint>,
    pub status: QueryStatus,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct MetricDataPage {
    pub results: Vec<MetricDataResult>,
    pub next_token: Option<String>,
}

/// Remote monitoring API capability
#[async_trait]
pub trait MonitoringApi: Send + Sync {
    /// Enumerate resource instances matching the filters. Pagination is
    /// handled by the implementation; the result keeps the API's order.
    async fn list_instances(
        &self,
        session: &Session,
        request: &ListInstancesRequest,
    ) -> Result<Vec<Instance>, RemoteCallError>;

    /// Fetch one page of metric data
    async fn get_metric_data(
        &self,
        session: &Session,
        request: &MetricDataRequest,
    ) -> Result<MetricDataPage, RemoteCallError>;
}

/// Exchanges a role ARN for temporary scoped credentials
#[async_trait]
pub trait RoleAssumer: Send + Sync {
    async fn assume_role(
        &self,
        role_arn: &str,
        region: &str,
        policy: &RolePolicy,
    ) -> Result<ScopedCredentials, AuthError>;
}
