//! cwbridge server - CloudWatch to Prometheus bridge
//!
//! Serves one scrape per request: `GET /scrape?target=&task=&region=&roleArn=`.
//!
//! # Usage
//! ```sh
//! cargo run --bin cwbridge -- --config.file config.toml
//! ```
//!
//! # Environment Variables
//! - `CWBRIDGE_LISTEN_ADDRESS`, `CWBRIDGE_METRICS_PATH`, `CWBRIDGE_SCRAPE_PATH`,
//!   `CWBRIDGE_CONFIG_FILE` - defaults for the matching flags
//! - `AWS_ACCESS_KEY_ID`, `AWS_SECRET_ACCESS_KEY`, `AWS_SESSION_TOKEN` - base credentials
//! - `AWS_ENDPOINT_URL` - route every AWS call to one endpoint
//! - `RUST_LOG` - log filter (default: info)

use anyhow::{Context, Result};
use clap::Parser;
use cwbridge::config::ExporterConfig;
use cwbridge::interfaces::ScrapeService;
use cwbridge::interfaces::http::router;
use tracing::{Level, info, warn};
use tracing_subscriber::prelude::*;

#[derive(Parser)]
#[command(author, version, about = "CloudWatch to Prometheus bridge", long_about = None)]
struct Cli {
    /// Address to listen on for scrapes and telemetry
    #[arg(long = "web.listen-address")]
    listen_address: Option<String>,

    /// Path under which to expose exporter metrics
    #[arg(long = "web.telemetry-path")]
    metrics_path: Option<String>,

    /// Path under which to expose CloudWatch metrics
    #[arg(long = "web.telemetry-scrape-path")]
    scrape_path: Option<String>,

    /// Configuration file
    #[arg(long = "config.file")]
    config_file: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let cli = Cli::parse();
    let mut config = ExporterConfig::from_env();
    if let Some(address) = cli.listen_address {
        config.server.listen_address = address;
    }
    if let Some(path) = cli.metrics_path {
        config.server.metrics_path = path;
    }
    if let Some(path) = cli.scrape_path {
        config.server.scrape_path = path;
    }
    if let Some(file) = cli.config_file {
        config.server.config_file = file;
    }

    info!("cwbridge {} starting...", env!("CARGO_PKG_VERSION"));

    let service = ScrapeService::from_config(&config)?;
    let app = router(service.clone(), &config.server)?;

    spawn_reload_on_hangup(service);

    let address = config.server.bind_address();
    let listener = tokio::net::TcpListener::bind(&address)
        .await
        .with_context(|| format!("Failed to bind {}", address))?;
    info!(
        "Listening on {} (scrape: {}, telemetry: {})",
        address, config.server.scrape_path, config.server.metrics_path
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if tokio::signal::ctrl_c().await.is_err() {
                warn!("Failed to listen for shutdown signal");
                std::future::pending::<()>().await;
            }
            info!("Shutdown signal received. Exiting...");
        })
        .await?;

    Ok(())
}

#[cfg(unix)]
fn spawn_reload_on_hangup(service: ScrapeService) {
    use tokio::signal::unix::{SignalKind, signal};

    let mut hangup = match signal(SignalKind::hangup()) {
        Ok(stream) => stream,
        Err(e) => {
            warn!("SIGHUP reload disabled: {}", e);
            return;
        }
    };
    tokio::spawn(async move {
        while hangup.recv().await.is_some() {
            info!("SIGHUP received, reloading configuration");
            // Failures are logged and counted by the service
            let _ = service.reload();
        }
    });
}

#[cfg(not(unix))]
fn spawn_reload_on_hangup(_service: ScrapeService) {}
