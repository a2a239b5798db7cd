use crate::domain::errors::AuthError;
use crate::domain::session::Credentials;
use std::env;
use tracing::{info, warn};

/// Base credentials from `AWS_ACCESS_KEY_ID` / `AWS_SECRET_ACCESS_KEY` /
/// `AWS_SESSION_TOKEN`.
pub fn credentials_from_env() -> Result<Credentials, AuthError> {
    let lookup = |name: &str| env::var(name).ok().filter(|v| !v.is_empty());
    credentials_from_lookup(lookup)
}

fn credentials_from_lookup(
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<Credentials, AuthError> {
    let (Some(access_key_id), Some(secret_access_key)) = (
        lookup("AWS_ACCESS_KEY_ID"),
        lookup("AWS_SECRET_ACCESS_KEY"),
    ) else {
        return Err(AuthError::MissingCredentials);
    };
    Ok(Credentials {
        access_key_id,
        secret_access_key,
        session_token: lookup("AWS_SESSION_TOKEN"),
    })
}

/// Loads base credentials once at startup. Absence is not fatal: scrapes
/// fail with `MissingCredentials` until the process is restarted.
pub fn load_base_credentials() -> Option<Credentials> {
    match credentials_from_env() {
        Ok(credentials) => {
            info!(
                "Loaded AWS base credentials for access key {}",
                credentials.access_key_id
            );
            Some(credentials)
        }
        Err(e) => {
            warn!("{}; scrapes will fail until credentials are provided", e);
            None
        }
    }
}
