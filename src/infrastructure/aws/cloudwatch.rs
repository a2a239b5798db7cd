//! CloudWatch client over the JSON 1.0 protocol.

use crate::config::AwsEnvConfig;
use crate::domain::errors::RemoteCallError;
use crate::domain::ports::{
    ListInstancesRequest, MetricDataPage, MetricDataRequest, MetricDataResult, MonitoringApi,
    QueryStatus,
};
use crate::domain::query::{DataPoint, Instance};
use crate::domain::session::Session;
use crate::infrastructure::aws::sigv4::{self, SigningRequest};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use reqwest::StatusCode;
use reqwest_middleware::ClientWithMiddleware;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

const SERVICE: &str = "monitoring";
const TARGET_PREFIX: &str = "GraniteServiceVersion20100801";
const JSON_CONTENT_TYPE: &str = "application/x-amz-json-1.0";

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DimensionJson {
    name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    value: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct MetricJson<'a> {
    namespace: &'a str,
    metric_name: &'a str,
    dimensions: Vec<DimensionJson>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct MetricStatJson<'a> {
    metric: MetricJson<'a>,
    period: u64,
    stat: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    unit: Option<&'a str>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct MetricDataQueryJson<'a> {
    id: &'a str,
    metric_stat: MetricStatJson<'a>,
    return_data: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct GetMetricDataInput<'a> {
    metric_data_queries: Vec<MetricDataQueryJson<'a>>,
    start_time: i64,
    end_time: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    next_token: Option<&'a str>,
    scan_by: &'static str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct MessageJson {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    value: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct MetricDataResultJson {
    id: String,
    #[serde(default)]
    timestamps: Vec<f64>,
    #[serde(default)]
    values: Vec<f64>,
    #[serde(default)]
    status_code: Option<String>,
    #[serde(default)]
    messages: Vec<MessageJson>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct GetMetricDataOutput {
    #[serde(default)]
    metric_data_results: Vec<MetricDataResultJson>,
    #[serde(default)]
    next_token: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct ListMetricsInput<'a> {
    namespace: &'a str,
    metric_name: &'a str,
    dimensions: Vec<DimensionJson>,
    #[serde(skip_serializing_if = "Option::is_none")]
    recently_active: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    next_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ListedMetricJson {
    #[serde(default)]
    dimensions: Vec<DimensionJson>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ListMetricsOutput {
    #[serde(default)]
    metrics: Vec<ListedMetricJson>,
    #[serde(default)]
    next_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorJson {
    #[serde(rename = "__type", default)]
    error_type: Option<String>,
    #[serde(alias = "Message", default)]
    message: Option<String>,
}

pub struct CloudWatchClient {
    http: ClientWithMiddleware,
    config: AwsEnvConfig,
}

impl CloudWatchClient {
    pub fn new(http: ClientWithMiddleware, config: AwsEnvConfig) -> Self {
        Self { http, config }
    }

    async fn invoke<I, O>(
        &self,
        session: &Session,
        operation: &str,
        input: &I,
    ) -> Result<O, RemoteCallError>
    where
        I: Serialize + Sync,
        O: DeserializeOwned,
    {
        let url = Url::parse(&format!("{}/", self.config.endpoint(SERVICE, &session.region)))
            .map_err(|e| RemoteCallError::Transport(format!("invalid endpoint: {}", e)))?;
        let body = serde_json::to_vec(input)
            .map_err(|e| RemoteCallError::Decode(format!("failed to encode request: {}", e)))?;
        let target = format!("{}.{}", TARGET_PREFIX, operation);

        let signed = sigv4::sign(
            &SigningRequest {
                method: "POST",
                url: &url,
                headers: &[
                    ("content-type", JSON_CONTENT_TYPE),
                    ("x-amz-target", target.as_str()),
                ],
                body: &body,
            },
            &session.credentials,
            &session.region,
            SERVICE,
            Utc::now(),
        );

        let mut request = self
            .http
            .post(url.as_str())
            .header("content-type", JSON_CONTENT_TYPE)
            .header("x-amz-target", target.as_str());
        for (name, value) in signed {
            request = request.header(name, value);
        }

        let response = request
            .body(body)
            .send()
            .await
            .map_err(|e| RemoteCallError::Transport(e.to_string()))?;
        let status = response.status();
        let bytes = response
            .bytes()
            .await
            .map_err(|e| RemoteCallError::Transport(e.to_string()))?;

        if !status.is_success() {
            return Err(api_error(status, &bytes));
        }
        serde_json::from_slice(&bytes).map_err(|e| RemoteCallError::Decode(e.to_string()))
    }
}

#[async_trait]
impl MonitoringApi for CloudWatchClient {
    async fn list_instances(
        &self,
        session: &Session,
        request: &ListInstancesRequest,
    ) -> Result<Vec<Instance>, RemoteCallError> {
        let mut input = ListMetricsInput {
            namespace: &request.namespace,
            metric_name: &request.metric_name,
            dimensions: request
                .filters
                .iter()
                .map(|f| DimensionJson {
                    name: f.name.clone(),
                    value: f.value.clone(),
                })
                .collect(),
            recently_active: request.recently_active.then_some("PT3H"),
            next_token: None,
        };

        let mut instances = Vec::new();
        loop {
            let output: ListMetricsOutput = self.invoke(session, "ListMetrics", &input).await?;
            instances.extend(output.metrics.into_iter().map(|metric| {
                metric
                    .dimensions
                    .into_iter()
                    .map(|d| (d.name, d.value.unwrap_or_default()))
                    .collect::<Instance>()
            }));

            match output.next_token {
                Some(token) if input.next_token.as_ref() != Some(&token) => {
                    debug!(
                        "CloudWatchClient: ListMetrics {}/{} continues ({} so far)",
                        request.namespace,
                        request.metric_name,
                        instances.len()
                    );
                    input.next_token = Some(token);
                }
                Some(_) => {
                    return Err(RemoteCallError::Decode(
                        "ListMetrics pagination token repeated".to_string(),
                    ));
                }
                None => return Ok(instances),
            }
        }
    }

    async fn get_metric_data(
        &self,
        session: &Session,
        request: &MetricDataRequest,
    ) -> Result<MetricDataPage, RemoteCallError> {
        let input = GetMetricDataInput {
            metric_data_queries: request
                .queries
                .iter()
                .map(|q| MetricDataQueryJson {
                    id: &q.id,
                    metric_stat: MetricStatJson {
                        metric: MetricJson {
                            namespace: &q.query.namespace,
                            metric_name: &q.query.metric_name,
                            dimensions: q
                                .query
                                .dimensions
                                .iter()
                                .map(|d| DimensionJson {
                                    name: d.name.clone(),
                                    value: Some(d.value.clone()),
                                })
                                .collect(),
                        },
                        period: q.query.period.as_secs(),
                        stat: q.query.statistic.as_str(),
                        unit: q.query.unit.as_deref(),
                    },
                    return_data: true,
                })
                .collect(),
            start_time: request.window.start.timestamp(),
            end_time: request.window.end.timestamp(),
            next_token: request.next_token.as_deref(),
            scan_by: "TimestampDescending",
        };

        let output: GetMetricDataOutput = self.invoke(session, "GetMetricData", &input).await?;
        Ok(MetricDataPage {
            results: output
                .metric_data_results
                .into_iter()
                .map(convert_result)
                .collect(),
            next_token: output.next_token,
        })
    }
}

fn convert_result(result: MetricDataResultJson) -> MetricDataResult {
    let status = match result.status_code.as_deref() {
        None | Some("Complete") => QueryStatus::Complete,
        Some("PartialData") => QueryStatus::PartialData,
        Some(code) => QueryStatus::Failed {
            code: code.to_string(),
            message: result
                .messages
                .iter()
                .filter_map(|m| m.value.as_deref().or(m.code.as_deref()))
                .collect::<Vec<_>>()
                .join("; "),
        },
    };

    let points = result
        .timestamps
        .iter()
        .zip(result.values.iter())
        .filter_map(|(&ts, &value)| {
            epoch_to_datetime(ts).map(|timestamp| DataPoint { timestamp, value })
        })
        .collect();

    MetricDataResult {
        id: result.id,
        points,
        status,
    }
}

fn epoch_to_datetime(seconds: f64) -> Option<DateTime<Utc>> {
    if !seconds.is_finite() {
        return None;
    }
    Utc.timestamp_opt(seconds.trunc() as i64, 0).single()
}

fn api_error(status: StatusCode, body: &[u8]) -> RemoteCallError {
    let parsed = serde_json::from_slice::<ErrorJson>(body).ok();
    let code = parsed
        .as_ref()
        .and_then(|e| e.error_type.clone())
        .unwrap_or_else(|| {
            if status == StatusCode::TOO_MANY_REQUESTS {
                "TooManyRequestsException".to_string()
            } else {
                format!("HTTP{}", status.as_u16())
            }
        });
    let message = parsed
        .and_then(|e| e.message)
        .unwrap_or_else(|| String::from_utf8_lossy(body).into_owned());
    RemoteCallError::Api { code, message }
}
