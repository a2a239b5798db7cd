//! Structured invocation transport for serverless deployments.

use crate::application::collector::ScrapeParams;
use crate::interfaces::service::{ScrapeService, ServeError};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ScrapeRequest {
    #[serde(default)]
    pub target: Option<String>,
    #[serde(default)]
    pub task: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default, rename = "roleArn")]
    pub role_arn: Option<String>,
}

impl From<ScrapeRequest> for ScrapeParams {
    fn from(request: ScrapeRequest) -> Self {
        ScrapeParams {
            target: request.target,
            task: request.task,
            region: request.region,
            role_arn: request.role_arn,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScrapeResponse {
    pub scrape_result: String,
    pub success: bool,
}

pub async fn handle_invocation(
    service: &ScrapeService,
    request: ScrapeRequest,
) -> Result<ScrapeResponse, ServeError> {
    let params = ScrapeParams::from(request);
    let scrape_result = service.scrape(&params, None).await?;
    Ok(ScrapeResponse {
        scrape_result,
        success: true,
    })
}
