//! HTTP server configuration parsing from environment variables.

use std::env;

/// Server environment configuration
#[derive(Debug, Clone)]
pub struct ServerEnvConfig {
    /// Go-style listen address, `:9042` binds every interface
    pub listen_address: String,
    pub metrics_path: String,
    pub scrape_path: String,
    pub config_file: String,
}

impl Default for ServerEnvConfig {
    fn default() -> Self {
        Self {
            listen_address: ":9042".to_string(),
            metrics_path: "/metrics".to_string(),
            scrape_path: "/scrape".to_string(),
            config_file: "config.toml".to_string(),
        }
    }
}

impl ServerEnvConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            listen_address: env::var("CWBRIDGE_LISTEN_ADDRESS")
                .unwrap_or(defaults.listen_address),
            metrics_path: env::var("CWBRIDGE_METRICS_PATH").unwrap_or(defaults.metrics_path),
            scrape_path: env::var("CWBRIDGE_SCRAPE_PATH").unwrap_or(defaults.scrape_path),
            config_file: env::var("CWBRIDGE_CONFIG_FILE").unwrap_or(defaults.config_file),
        }
    }

    /// Address suitable for `TcpListener::bind`
    pub fn bind_address(&self) -> String {
        if self.listen_address.starts_with(':') {
            format!("0.0.0.0{}", self.listen_address)
        } else {
            self.listen_address.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_config_defaults() {
        let config = ServerEnvConfig::default();
        assert_eq!(config.listen_address, ":9042");
        assert_eq!(config.metrics_path, "/metrics");
        assert_eq!(config.scrape_path, "/scrape");
    }

    #[test]
    fn test_bind_address() {
        let mut config = ServerEnvConfig::default();
        assert_eq!(config.bind_address(), "0.0.0.0:9042");

        config.listen_address = "127.0.0.1:8080".to_string();
        assert_eq!(config.bind_address(), "127.0.0.1:8080");
    }
}
