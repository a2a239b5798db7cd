//! AWS bindings: request signing, base credentials, STS and CloudWatch.

pub mod cloudwatch;
pub mod credentials;
pub mod sigv4;
pub mod sts;

pub use cloudwatch::CloudWatchClient;
pub use credentials::{credentials_from_env, load_base_credentials};
pub use sts::StsRoleAssumer;
