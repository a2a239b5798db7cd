//! Self-monitoring for cwbridge
//!
//! The process registry exposed on the telemetry path. Per-scrape output is
//! rendered by the collector through its own registry.

pub mod metrics;

pub use metrics::Metrics;
