//! One-shot structured invocation.
//!
//! Reads a `ScrapeRequest` JSON document from stdin and writes the
//! `ScrapeResponse` JSON to stdout, the way a serverless runtime would
//! drive the bridge.
//!
//! ```sh
//! echo '{"target":"i-1","task":"ec2","region":"us-east-1"}' | cargo run --bin invoke
//! ```

use anyhow::{Context, Result};
use cwbridge::config::ExporterConfig;
use cwbridge::interfaces::{ScrapeRequest, ScrapeService, handle_invocation};
use std::io::Read;
use tracing::Level;
use tracing_subscriber::prelude::*;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    // stdout carries the response; logs go to stderr
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env().add_directive(Level::WARN.into()))
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    let mut input = String::new();
    std::io::stdin()
        .read_to_string(&mut input)
        .context("Failed to read request from stdin")?;
    let request: ScrapeRequest =
        serde_json::from_str(&input).context("Failed to parse ScrapeRequest")?;

    let service = ScrapeService::from_config(&ExporterConfig::from_env())?;
    let response = handle_invocation(&service, request)
        .await
        .map_err(|e| anyhow::anyhow!("Error: {}", e))?;

    println!("{}", serde_json::to_string(&response)?);
    Ok(())
}
