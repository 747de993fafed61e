//! Transport clients
//!
//! Both wire protocols sit behind the [`Transport`] trait. The concrete client
//! is picked once in [`build_transport`]; nothing downstream knows which one
//! it talks to.

pub mod http;
pub mod ip;
pub mod retry;
pub mod rpc;

use crate::config::{AgentConfig, TransportKind};
use async_trait::async_trait;
use pulse_core::security::CryptError;
use pulse_core::{encode_records, Metric, MetricRecord};
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

pub use self::http::HttpTransport;
pub use self::retry::{run_with_retry, RetryPolicy, RetryableError};
pub use self::rpc::RpcTransport;

use pulse_core::security::{EncryptManager, SignManager};

/// Per-request timeout
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(1);

/// Errors from delivering a batch to the collector
#[derive(Debug, Error)]
pub enum TransportError {
    /// Batch could not be encoded as JSON
    #[error("failed to serialize batch: {0}")]
    Encode(#[from] serde_json::Error),

    /// Public key encryption failed
    #[error("failed to encrypt batch: {0}")]
    Encrypt(#[from] CryptError),

    /// Gzip compression failed
    #[error("failed to compress batch: {0}")]
    Compress(#[from] std::io::Error),

    /// Connection or protocol failure in the HTTP client
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Collector answered with a non-success status
    #[error("collector responded with {status}: {body}")]
    Status {
        /// HTTP status code
        status: u16,
        /// Response body, decompressed when gzipped
        body: String,
    },

    /// Collector rejected the RPC call
    #[error("RPC call failed: {0}")]
    Rpc(#[from] tonic::Status),

    /// Channel could not be built or connected
    #[error("RPC channel error: {0}")]
    Channel(#[from] tonic::transport::Error),

    /// Signature or address could not be placed in metadata
    #[error("invalid request metadata: {0}")]
    Metadata(String),
}

impl RetryableError for TransportError {
    fn is_retryable(&self) -> bool {
        match self {
            TransportError::Http(e) => e.is_connect() || e.is_timeout() || e.is_request(),
            TransportError::Status { status, .. } => *status >= 500 || *status == 429,
            TransportError::Rpc(status) => matches!(
                status.code(),
                tonic::Code::Unavailable
                    | tonic::Code::DeadlineExceeded
                    | tonic::Code::ResourceExhausted
                    | tonic::Code::Aborted
            ),
            TransportError::Channel(_) => true,
            TransportError::Encode(_)
            | TransportError::Encrypt(_)
            | TransportError::Compress(_)
            | TransportError::Metadata(_) => false,
        }
    }
}

/// Delivers metric batches to the collector
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, metrics: &[Metric]) -> Result<(), TransportError>;
}

/// Wire records of a batch and their JSON serialization
#[derive(Debug)]
pub struct Batch {
    pub records: Vec<MetricRecord>,
    pub json: Vec<u8>,
}

/// Convert metrics into a wire batch. Metrics that cannot be represented are
/// logged and left out; `None` when nothing is left to send.
pub fn build_batch(metrics: &[Metric]) -> Result<Option<Batch>, TransportError> {
    let (records, skipped) = encode_records(metrics);
    for e in &skipped {
        warn!(error = %e, "Skipping metric");
    }

    if records.is_empty() {
        return Ok(None);
    }

    let json = serde_json::to_vec(&records)?;
    Ok(Some(Batch { records, json }))
}

/// Build the transport selected by the configuration
pub fn build_transport(
    config: &AgentConfig,
    signer: SignManager,
    encryptor: EncryptManager,
    real_ip: IpAddr,
) -> Result<Arc<dyn Transport>, TransportError> {
    let transport: Arc<dyn Transport> = match config.transport {
        TransportKind::Http => Arc::new(HttpTransport::new(
            &config.address,
            signer,
            encryptor,
            real_ip,
        )?),
        TransportKind::Rpc => Arc::new(RpcTransport::new(
            &config.address_rpc,
            signer,
            encryptor,
            real_ip,
        )?),
    };
    Ok(transport)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_batch_skips_unencodable_metrics() {
        let batch = build_batch(&[
            Metric::gauge("Alloc", 1.0),
            Metric::gauge("Broken", f64::INFINITY),
            Metric::counter("PollCount", 1),
        ])
        .unwrap()
        .unwrap();

        assert_eq!(batch.records.len(), 2);
        let decoded: Vec<MetricRecord> = serde_json::from_slice(&batch.json).unwrap();
        assert_eq!(decoded, batch.records);
    }

    #[test]
    fn test_build_batch_empty() {
        assert!(build_batch(&[]).unwrap().is_none());
        assert!(build_batch(&[Metric::gauge("NaN", f64::NAN)]).unwrap().is_none());
    }

    #[test]
    fn test_retryable_classification() {
        let server = TransportError::Status {
            status: 503,
            body: String::new(),
        };
        let client = TransportError::Status {
            status: 400,
            body: String::new(),
        };
        assert!(server.is_retryable());
        assert!(!client.is_retryable());
        assert!(TransportError::Rpc(tonic::Status::unavailable("down")).is_retryable());
        assert!(!TransportError::Rpc(tonic::Status::permission_denied("no")).is_retryable());
    }
}
