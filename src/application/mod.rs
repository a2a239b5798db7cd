// Configuration snapshots
pub mod config_store;

// Scrape pipeline: expand -> fetch -> convert
pub mod call_limiter;
pub mod metric_fetcher;
pub mod sample_converter;
pub mod template_expander;

// Per-scrape entry point
pub mod collector;

pub use collector::{Collector, CollectorFactory, ScrapeOutcome, ScrapeParams};
pub use config_store::{ConfigSource, ConfigStore};
