//! AWS client configuration parsing from environment variables.

use std::env;
use std::time::Duration;

/// AWS HTTP client configuration
#[derive(Debug, Clone)]
pub struct AwsEnvConfig {
    /// Routes every service to one base URL (local emulators)
    pub endpoint_url: Option<String>,
    pub request_timeout: Duration,
    pub connect_timeout: Duration,
    /// Transport-level retries for connection errors and 5xx responses
    pub transport_retries: u32,
}

impl Default for AwsEnvConfig {
    fn default() -> Self {
        Self {
            endpoint_url: None,
            request_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            transport_retries: 2,
        }
    }
}

impl AwsEnvConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            endpoint_url: env::var("AWS_ENDPOINT_URL")
                .ok()
                .filter(|url| !url.is_empty()),
            request_timeout: env::var("CWBRIDGE_HTTP_TIMEOUT_SECONDS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.request_timeout),
            connect_timeout: env::var("CWBRIDGE_HTTP_CONNECT_TIMEOUT_SECONDS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.connect_timeout),
            transport_retries: env::var("CWBRIDGE_HTTP_RETRIES")
                .ok()
                .and_then(|v| v.parse::<u32>().ok())
                .unwrap_or(defaults.transport_retries),
        }
    }

    /// Base URL for `service` in `region`
    pub fn endpoint(&self, service: &str, region: &str) -> String {
        if let Some(url) = &self.endpoint_url {
            return url.trim_end_matches('/').to_string();
        }
        let suffix = if region.starts_with("cn-") {
            "amazonaws.com.cn"
        } else {
            "amazonaws.com"
        };
        format!("https://{}.{}.{}", service, region, suffix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_regional_endpoints() {
        let config = AwsEnvConfig::default();
        assert_eq!(
            config.endpoint("monitoring", "us-east-1"),
            "https://monitoring.us-east-1.amazonaws.com"
        );
        assert_eq!(
            config.endpoint("sts", "cn-north-1"),
            "https://sts.cn-north-1.amazonaws.com.cn"
        );
    }

    #[test]
    fn test_endpoint_override() {
        let config = AwsEnvConfig {
            endpoint_url: Some("http://localhost:4566/".to_string()),
            ..AwsEnvConfig::default()
        };
        assert_eq!(config.endpoint("monitoring", "us-east-1"), "http://localhost:4566");
    }
}
