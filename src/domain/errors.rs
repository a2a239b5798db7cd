use thiserror::Error;

/// Errors raised while loading or validating the exporter configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read configuration {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Configuration defines no tasks")]
    NoTasks,

    #[error("Duplicate task name: {task}")]
    DuplicateTask { task: String },

    #[error("Task {task} has no metric templates")]
    EmptyTask { task: String },

    #[error("Invalid metric template in task {task}: {reason}")]
    InvalidTemplate { task: String, reason: String },

    #[error("Role mapping {alias} is not a well-formed role ARN: {arn}")]
    InvalidRoleArn { alias: String, arn: String },

    #[error("Invalid setting {field}: {reason}")]
    InvalidSetting { field: String, reason: String },
}

/// Errors in the parameters of a scrape request. Raised before any remote call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Missing {field} parameter")]
    MissingParameter { field: &'static str },

    #[error("Unknown task: {task}")]
    UnknownTask { task: String },

    #[error("Invalid role ARN: {value}")]
    InvalidRoleArn { value: String },

    #[error("Invalid region: {value}")]
    InvalidRegion { value: String },
}

/// Account/role-wide failures. Abort the whole scrape.
#[derive(Debug, Clone, Error)]
pub enum AuthError {
    #[error("No AWS credentials available in the environment")]
    MissingCredentials,

    #[error("Failed to assume role {role_arn}: {reason}")]
    AssumeRole { role_arn: String, reason: String },
}

/// Failure of a single remote call, scoped to the queries it carried
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RemoteCallError {
    #[error("Throttled by remote API after {attempts} attempts")]
    Throttled { attempts: u32 },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Remote API error {code}: {message}")]
    Api { code: String, message: String },

    #[error("Failed to decode remote response: {0}")]
    Decode(String),

    #[error("Scrape deadline exceeded")]
    DeadlineExceeded,
}

impl RemoteCallError {
    pub fn is_throttling(&self) -> bool {
        match self {
            RemoteCallError::Throttled { .. } => true,
            RemoteCallError::Api { code, .. } => is_throttling_code(code),
            _ => false,
        }
    }
}

/// Error codes the monitoring API uses to signal rate limiting.
pub fn is_throttling_code(code: &str) -> bool {
    // Codes may arrive namespaced, e.g. "com.amazon.coral.availability#ThrottlingException"
    let code = code.rsplit('#').next().unwrap_or(code);
    code.starts_with("Throttling")
        || code == "RequestLimitExceeded"
        || code == "TooManyRequestsException"
        || code == "RequestThrottled"
}

/// Errors that fail a whole scrape
#[derive(Debug, Error)]
pub enum ScrapeError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Auth(#[from] AuthError),
}
