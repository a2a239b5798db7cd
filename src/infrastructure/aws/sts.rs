//! STS AssumeRole client with a per-(role, region) credential cache.

use crate::config::AwsEnvConfig;
use crate::domain::errors::AuthError;
use crate::domain::ports::RoleAssumer;
use crate::domain::session::{Credentials, ScopedCredentials};
use crate::domain::settings::RolePolicy;
use crate::infrastructure::aws::sigv4::{self, SigningRequest};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use reqwest_middleware::ClientWithMiddleware;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};
use url::Url;

const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded; charset=utf-8";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AssumeRoleEnvelope {
    assume_role_response: AssumeRoleResponse,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AssumeRoleResponse {
    assume_role_result: AssumeRoleResult,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AssumeRoleResult {
    credentials: StsCredentials,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct StsCredentials {
    access_key_id: String,
    secret_access_key: String,
    session_token: String,
    /// Epoch seconds
    expiration: f64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct StsErrorEnvelope {
    error: StsError,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct StsError {
    code: String,
    #[serde(default)]
    message: String,
}

/// Assumed credentials keyed by (role ARN, region).
///
/// An entry is served until `expiry - refresh_margin`; failures are never
/// stored.
#[derive(Default)]
pub struct CredentialCache {
    entries: Mutex<HashMap<(String, String), ScopedCredentials>>,
}

impl CredentialCache {
    pub fn get(
        &self,
        role_arn: &str,
        region: &str,
        refresh_margin: std::time::Duration,
        now: DateTime<Utc>,
    ) -> Option<ScopedCredentials> {
        let entries = self
            .entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let margin = chrono::Duration::from_std(refresh_margin).unwrap_or_default();
        entries
            .get(&(role_arn.to_string(), region.to_string()))
            .filter(|scoped| scoped.expiry - margin > now)
            .cloned()
    }

    pub fn insert(&self, role_arn: &str, region: &str, scoped: ScopedCredentials) {
        let mut entries = self
            .entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        entries.insert((role_arn.to_string(), region.to_string()), scoped);
    }
}

pub struct StsRoleAssumer {
    http: ClientWithMiddleware,
    config: AwsEnvConfig,
    base_credentials: Option<Arc<Credentials>>,
    cache: CredentialCache,
}

impl StsRoleAssumer {
    pub fn new(
        http: ClientWithMiddleware,
        config: AwsEnvConfig,
        base_credentials: Option<Arc<Credentials>>,
    ) -> Self {
        Self {
            http,
            config,
            base_credentials,
            cache: CredentialCache::default(),
        }
    }

    async fn exchange(
        &self,
        role_arn: &str,
        region: &str,
        policy: &RolePolicy,
    ) -> Result<ScopedCredentials, AuthError> {
        let base = self
            .base_credentials
            .as_deref()
            .ok_or(AuthError::MissingCredentials)?;
        let fail = |reason: String| AuthError::AssumeRole {
            role_arn: role_arn.to_string(),
            reason,
        };

        let url = Url::parse(&format!("{}/", self.config.endpoint("sts", region)))
            .map_err(|e| fail(format!("invalid endpoint: {}", e)))?;
        let body = assume_role_body(role_arn, policy);
        let signed = sigv4::sign(
            &SigningRequest {
                method: "POST",
                url: &url,
                headers: &[("content-type", FORM_CONTENT_TYPE)],
                body: body.as_bytes(),
            },
            base,
            region,
            "sts",
            Utc::now(),
        );

        let mut request = self
            .http
            .post(url.as_str())
            .header("content-type", FORM_CONTENT_TYPE)
            .header("accept", "application/json");
        for (name, value) in signed {
            request = request.header(name, value);
        }

        let response = request
            .body(body)
            .send()
            .await
            .map_err(|e| fail(e.to_string()))?;
        let status = response.status();
        let text = response.text().await.map_err(|e| fail(e.to_string()))?;

        if !status.is_success() {
            let reason = match serde_json::from_str::<StsErrorEnvelope>(&text) {
                Ok(envelope) => format!("{}: {}", envelope.error.code, envelope.error.message),
                Err(_) => format!("HTTP {}", status),
            };
            return Err(fail(reason));
        }

        parse_assume_role_response(&text).map_err(fail)
    }
}

#[async_trait]
impl RoleAssumer for StsRoleAssumer {
    async fn assume_role(
        &self,
        role_arn: &str,
        region: &str,
        policy: &RolePolicy,
    ) -> Result<ScopedCredentials, AuthError> {
        if let Some(cached) = self
            .cache
            .get(role_arn, region, policy.refresh_margin, Utc::now())
        {
            debug!("StsRoleAssumer: Using cached credentials for {}", role_arn);
            return Ok(cached);
        }

        match self.exchange(role_arn, region, policy).await {
            Ok(scoped) => {
                info!(
                    "StsRoleAssumer: Assumed {} in {} (expires {})",
                    role_arn, region, scoped.expiry
                );
                self.cache.insert(role_arn, region, scoped.clone());
                Ok(scoped)
            }
            Err(e) => {
                warn!("StsRoleAssumer: {}", e);
                Err(e)
            }
        }
    }
}

fn assume_role_body(role_arn: &str, policy: &RolePolicy) -> String {
    let session_name = format!("{}-{}", policy.session_name, uuid::Uuid::new_v4().simple());
    // Role session names are capped at 64 characters
    let session_name: String = session_name.chars().take(64).collect();

    url::form_urlencoded::Serializer::new(String::new())
        .append_pair("Action", "AssumeRole")
        .append_pair("Version", "2011-06-15")
        .append_pair("RoleArn", role_arn)
        .append_pair("RoleSessionName", &session_name)
        .append_pair("DurationSeconds", &policy.duration.as_secs().to_string())
        .finish()
}

fn parse_assume_role_response(text: &str) -> Result<ScopedCredentials, String> {
    let envelope: AssumeRoleEnvelope =
        serde_json::from_str(text).map_err(|e| format!("malformed response: {}", e))?;
    let sts = envelope.assume_role_response.assume_role_result.credentials;
    let expiry = Utc
        .timestamp_opt(sts.expiration as i64, 0)
        .single()
        .ok_or_else(|| format!("invalid expiration {}", sts.expiration))?;

    Ok(ScopedCredentials {
        credentials: Credentials {
            access_key_id: sts.access_key_id,
            secret_access_key: sts.secret_access_key,
            session_token: Some(sts.session_token),
        },
        expiry,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn scoped(expiry: DateTime<Utc>) -> ScopedCredentials {
        ScopedCredentials {
            credentials: Credentials {
                access_key_id: "ASIA".to_string(),
                secret_access_key: "secret".to_string(),
                session_token: Some("token".to_string()),
            },
            expiry,
        }
    }

    #[test]
    fn test_parse_assume_role_response() {
        let text = r#"{"AssumeRoleResponse":{"AssumeRoleResult":{"AssumedRoleUser":{"Arn":"x"},
            "Credentials":{"AccessKeyId":"ASIAEXAMPLE","SecretAccessKey":"s","SessionToken":"t",
            "Expiration":1.7685E9}},"ResponseMetadata":{"RequestId":"r"}}}"#;

        let scoped = parse_assume_role_response(text).unwrap();
        assert_eq!(scoped.credentials.access_key_id, "ASIAEXAMPLE");
        assert_eq!(scoped.credentials.session_token.as_deref(), Some("t"));
        assert_eq!(scoped.expiry.timestamp(), 1_768_500_000);
    }

    #[test]
    fn test_assume_role_body() {
        let policy = RolePolicy::default();
        let body = assume_role_body("arn:aws:iam::123456789012:role/Reader", &policy);

        assert!(body.starts_with("Action=AssumeRole&Version=2011-06-15"));
        assert!(body.contains("RoleArn=arn%3Aaws%3Aiam%3A%3A123456789012%3Arole%2FReader"));
        assert!(body.contains("RoleSessionName=cwbridge-"));
        assert!(body.contains("DurationSeconds=900"));
    }

    #[test]
    fn test_cache_honours_refresh_margin() {
        let cache = CredentialCache::default();
        let now = Utc::now();
        let arn = "arn:aws:iam::123456789012:role/Reader";
        cache.insert(arn, "us-east-1", scoped(now + chrono::Duration::minutes(10)));

        assert!(cache.get(arn, "us-east-1", Duration::from_secs(60), now).is_some());
        assert!(cache.get(arn, "eu-west-1", Duration::from_secs(60), now).is_none());
        assert!(cache.get(arn, "us-east-1", Duration::from_secs(900), now).is_none());
    }

    #[tokio::test]
    async fn test_missing_base_credentials_is_auth_error() {
        let assumer = StsRoleAssumer::new(
            crate::infrastructure::core::HttpClientFactory::create_client(&AwsEnvConfig::default()),
            AwsEnvConfig::default(),
            None,
        );

        let result = assumer
            .assume_role(
                "arn:aws:iam::123456789012:role/Reader",
                "us-east-1",
                &RolePolicy::default(),
            )
            .await;
        assert!(matches!(result, Err(AuthError::MissingCredentials)));
    }
}
