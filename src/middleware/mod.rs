//! Middleware module
//!
//! Request-id/timing attachment and structured access logging.

pub mod logging;
pub mod request_id;

pub use logging::LoggingMiddleware;
pub use request_id::{RequestContext, RequestIdMiddleware};
