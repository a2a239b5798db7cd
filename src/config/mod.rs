//! Configuration module for cwbridge.
//!
//! Two layers live here:
//! - process configuration loaded from environment variables (server, AWS client),
//! - the schema of the exporter configuration document (tasks, defaults, roles).

mod aws_config;
pub mod document;
mod server_config;

pub use aws_config::AwsEnvConfig;
pub use document::SettingsDocument;
pub use server_config::ServerEnvConfig;

/// Process-level configuration.
#[derive(Debug, Clone, Default)]
pub struct ExporterConfig {
    pub server: ServerEnvConfig,
    pub aws: AwsEnvConfig,
}

impl ExporterConfig {
    pub fn from_env() -> Self {
        Self {
            server: ServerEnvConfig::from_env(),
            aws: AwsEnvConfig::from_env(),
        }
    }
}
