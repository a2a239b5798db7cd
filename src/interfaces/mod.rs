pub mod http;
pub mod invocation;
pub mod service;

pub use invocation::{ScrapeRequest, ScrapeResponse, handle_invocation};
pub use service::{ScrapeService, ServeError};
