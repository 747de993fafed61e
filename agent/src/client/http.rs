//! HTTP transport
//!
//! `POST /updates/` with a gzip-compressed JSON array. The body is signed
//! before encryption and compression so the collector can verify it after
//! reversing both.

use super::retry::{run_with_retry, RetryPolicy};
use super::{build_batch, Transport, TransportError, REQUEST_TIMEOUT};
use async_trait::async_trait;
use pulse_core::compress::{self, GZIP};
use pulse_core::security::{EncryptManager, SignManager, SIGNATURE_HEADER};
use pulse_core::Metric;
use reqwest::header::{ACCEPT_ENCODING, CONTENT_ENCODING, CONTENT_TYPE};
use std::net::IpAddr;
use tracing::{debug, warn};

/// Header carrying the agent's outbound IP
pub const REAL_IP_HEADER: &str = "X-Real-IP";

/// A request body ready to go on the wire
#[derive(Debug)]
pub struct PreparedRequest {
    pub body: Vec<u8>,
    pub signature: Option<String>,
    pub records: usize,
}

pub struct HttpTransport {
    client: reqwest::Client,
    url: String,
    signer: SignManager,
    encryptor: EncryptManager,
    real_ip: IpAddr,
    retry: RetryPolicy,
}

impl HttpTransport {
    pub fn new(
        address: &str,
        signer: SignManager,
        encryptor: EncryptManager,
        real_ip: IpAddr,
    ) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        let base = if address.starts_with("http://") || address.starts_with("https://") {
            address.trim_end_matches('/').to_string()
        } else {
            format!("http://{}", address)
        };

        Ok(Self {
            client,
            url: format!("{}/updates/", base),
            signer,
            encryptor,
            real_ip,
            retry: RetryPolicy::default(),
        })
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Serialize, sign, encrypt and compress a batch
    pub fn prepare(&self, metrics: &[Metric]) -> Result<Option<PreparedRequest>, TransportError> {
        let Some(batch) = build_batch(metrics)? else {
            return Ok(None);
        };

        let signature = self.signer.sign(&batch.json);
        let sealed = self.encryptor.encrypt(&batch.json)?;
        let body = compress::compress(&sealed)?;

        Ok(Some(PreparedRequest {
            body,
            signature,
            records: batch.records.len(),
        }))
    }

    async fn post(&self, prepared: &PreparedRequest) -> Result<(), TransportError> {
        let mut request = self
            .client
            .post(&self.url)
            .header(CONTENT_TYPE, "application/json")
            .header(CONTENT_ENCODING, GZIP)
            .header(ACCEPT_ENCODING, GZIP)
            .header(REAL_IP_HEADER, self.real_ip.to_string())
            .body(prepared.body.clone());

        if let Some(signature) = &prepared.signature {
            request = request.header(SIGNATURE_HEADER, signature.as_str());
        }

        let response = request.send().await?;
        let status = response.status();
        let echoed = response
            .headers()
            .get(SIGNATURE_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);
        let gzipped = response
            .headers()
            .get(CONTENT_ENCODING)
            .and_then(|v| v.to_str().ok())
            .map(compress::accepts_gzip)
            .unwrap_or(false);
        let bytes = response.bytes().await?;

        if !status.is_success() {
            let body = if gzipped {
                compress::decompress(&bytes).unwrap_or_else(|_| bytes.to_vec())
            } else {
                bytes.to_vec()
            };
            return Err(TransportError::Status {
                status: status.as_u16(),
                body: String::from_utf8_lossy(&body).trim().to_string(),
            });
        }

        if let (Some(sent), Some(echoed)) = (&prepared.signature, &echoed) {
            if sent != echoed {
                warn!(url = %self.url, "Collector echoed a different signature");
            }
        }

        debug!(url = %self.url, status = status.as_u16(), "Batch delivered");
        Ok(())
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, metrics: &[Metric]) -> Result<(), TransportError> {
        let Some(prepared) = self.prepare(metrics)? else {
            debug!("Nothing to send");
            return Ok(());
        };

        debug!(url = %self.url, records = prepared.records, "Sending batch");
        run_with_retry("http send", &self.retry, || self.post(&prepared)).await
    }
}
