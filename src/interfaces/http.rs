//! HTTP transport.
//!
//! Routes:
//! - `GET {scrape_path}?target=&task=&region=&roleArn=`: one scrape
//! - `GET {metrics_path}`: exporter self-metrics
//! - `GET|POST /reload`: configuration reload
//! - `GET /-/healthy`

use crate::application::collector::ScrapeParams;
use crate::config::ServerEnvConfig;
use crate::domain::errors::ScrapeError;
use crate::interfaces::service::{ScrapeService, ServeError};
use anyhow::bail;
use axum::Router;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use std::collections::HashMap;
use std::time::Duration;

const TEXT_FORMAT: &str = "text/plain; version=0.0.4; charset=utf-8";
const SCRAPE_TIMEOUT_HEADER: &str = "x-prometheus-scrape-timeout-seconds";
/// Headroom left to the scraper between our deadline and its own
const SCRAPE_TIMEOUT_OFFSET: Duration = Duration::from_millis(500);

pub fn router(service: ScrapeService, config: &ServerEnvConfig) -> anyhow::Result<Router> {
    let paths = [
        config.scrape_path.as_str(),
        config.metrics_path.as_str(),
        "/reload",
        "/-/healthy",
    ];
    for (i, path) in paths.iter().enumerate() {
        if !path.starts_with('/') {
            bail!("HTTP path {} must start with '/'", path);
        }
        if paths[..i].contains(path) {
            bail!("HTTP path {} is configured twice", path);
        }
    }

    Ok(Router::new()
        .route(&config.scrape_path, get(scrape))
        .route(&config.metrics_path, get(metrics))
        .route("/reload", get(reload).post(reload))
        .route("/-/healthy", get(healthy))
        .with_state(service))
}

pub async fn scrape(
    State(service): State<ScrapeService>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Response {
    let params = ScrapeParams {
        target: query.get("target").cloned(),
        task: query.get("task").cloned(),
        region: query.get("region").cloned(),
        role_arn: query.get("roleArn").cloned(),
    };

    match service.scrape(&params, scrape_timeout(&headers)).await {
        Ok(body) => ([(header::CONTENT_TYPE, TEXT_FORMAT)], body).into_response(),
        Err(e) => {
            let status = match &e {
                ServeError::Scrape(ScrapeError::Validation(_)) => StatusCode::BAD_REQUEST,
                ServeError::Scrape(ScrapeError::Auth(_)) => StatusCode::BAD_GATEWAY,
                ServeError::Render(_) => StatusCode::INTERNAL_SERVER_ERROR,
            };
            (status, format!("Error: {}", e)).into_response()
        }
    }
}

pub async fn metrics(State(service): State<ScrapeService>) -> Response {
    (
        [(header::CONTENT_TYPE, TEXT_FORMAT)],
        service.metrics().render(),
    )
        .into_response()
}

pub async fn reload(State(service): State<ScrapeService>) -> Response {
    match service.reload() {
        Ok(()) => (StatusCode::OK, "Reload complete").into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

pub async fn healthy() -> &'static str {
    "ok"
}

/// Timeout announced by the scraper, minus headroom
fn scrape_timeout(headers: &HeaderMap) -> Option<Duration> {
    let seconds = headers
        .get(SCRAPE_TIMEOUT_HEADER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|s| s.is_finite() && *s > 0.0)?;
    let announced = Duration::from_secs_f64(seconds);
    Some(
        announced
            .saturating_sub(SCRAPE_TIMEOUT_OFFSET)
            .max(Duration::from_millis(100)),
    )
}
