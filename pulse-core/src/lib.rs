//! Shared building blocks for the pulse agent and collector
//!
//! The metric model and its JSON wire form, request signing, chunked RSA
//! encryption, gzip framing and the gRPC service definition.

pub mod compress;
pub mod logging;
pub mod model;
pub mod rpc;
pub mod security;
pub mod shutdown;

pub use model::{
    decode_batch, encode_records, validate_records, DecodedBatch, Metric, MetricKind,
    MetricRecord, MetricValue, ValidationError,
};
pub use security::{DecryptManager, EncryptManager, SignManager};
