//! HTTP protocol server
//!
//! Requests pass request logging, then the trusted subnet check, then body
//! decoding inside the handlers' [`body::DecodedBody`] extractor.

pub mod body;
pub mod error;
pub mod middleware;
pub mod routes;
pub mod server;

pub use error::{ApiError, ErrorResponse};
pub use routes::{configure, Listing};
pub use server::HttpApi;
