use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::Arc;

/// AWS credentials used to sign requests
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field("session_token", &self.session_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Credentials obtained from a role assumption, valid until `expiry`
#[derive(Debug, Clone)]
pub struct ScopedCredentials {
    pub credentials: Credentials,
    pub expiry: DateTime<Utc>,
}

/// Region-scoped API session for one scrape
#[derive(Debug, Clone)]
pub struct Session {
    pub region: String,
    pub credentials: Arc<Credentials>,
    /// Role the credentials were assumed from, if any
    pub role_arn: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credentials_debug_redacts_secrets() {
        let creds = Credentials {
            access_key_id: "AKIDEXAMPLE".to_string(),
            secret_access_key: "wJalrXUtnFEMI".to_string(),
            session_token: Some("token".to_string()),
        };
        let output = format!("{:?}", creds);
        assert!(output.contains("AKIDEXAMPLE"));
        assert!(!output.contains("wJalrXUtnFEMI"));
        assert!(!output.contains("\"token\""));
    }
}
