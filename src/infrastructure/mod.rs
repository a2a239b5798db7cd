pub mod aws;
pub mod core;
pub mod mock;
pub mod observability;

pub use self::core::HttpClientFactory;
pub use observability::Metrics;
