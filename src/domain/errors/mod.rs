//! Domain error types.

mod http_error;

pub use http_error::HttpError;
