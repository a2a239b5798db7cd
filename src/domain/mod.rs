// Error taxonomy
pub mod errors;

// Port interfaces over the remote monitoring API
pub mod ports;

// Concrete queries and raw data points
pub mod query;

// Exported samples
pub mod sample;

// Credentials and region-scoped sessions
pub mod session;

// Configuration snapshot
pub mod settings;
