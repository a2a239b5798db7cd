use crate::config::AwsEnvConfig;
use reqwest::{Client, Response, StatusCode};
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{
    RetryTransientMiddleware, Retryable, RetryableStrategy, default_on_request_failure,
    default_on_request_success, policies::ExponentialBackoff,
};

pub struct HttpClientFactory;

/// reqwest-retry's default classification, except that 429 is handed back
/// at once so the metric fetcher's throttling backoff owns it.
pub struct TransientExceptThrottling;

impl RetryableStrategy for TransientExceptThrottling {
    fn handle(&self, res: &Result<Response, reqwest_middleware::Error>) -> Option<Retryable> {
        match res {
            Ok(response) if response.status() == StatusCode::TOO_MANY_REQUESTS => {
                Some(Retryable::Fatal)
            }
            Ok(response) => default_on_request_success(response),
            Err(error) => default_on_request_failure(error),
        }
    }
}

impl HttpClientFactory {
    /// Creates the HTTP client shared by every AWS call.
    ///
    /// Only transport-level transient failures (connect errors, 5xx, 408) are
    /// retried here. Throttling answers (429, or a 400 carrying a throttling
    /// error code) reach the metric fetcher untouched.
    pub fn create_client(config: &AwsEnvConfig) -> ClientWithMiddleware {
        let retry_policy =
            ExponentialBackoff::builder().build_with_max_retries(config.transport_retries);

        let client = Client::builder()
            .pool_max_idle_per_host(10)
            .timeout(config.request_timeout)
            .connect_timeout(config.connect_timeout)
            .build()
            .unwrap_or_else(|_| Client::new());

        ClientBuilder::new(client)
            .with(RetryTransientMiddleware::new_with_policy_and_strategy(
                retry_policy,
                TransientExceptThrottling,
            ))
            .build()
    }
}

/// RFC 3986 unreserved-set encoding, as AWS canonical requests require.
pub fn uri_encode(s: &str) -> String {
    let mut encoded = String::with_capacity(s.len());
    for byte in s.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                encoded.push(byte as char);
            }
            _ => encoded.push_str(&format!("%{:02X}", byte)),
        }
    }
    encoded
}
