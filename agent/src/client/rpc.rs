//! gRPC transport

use super::retry::{run_with_retry, RetryPolicy};
use super::{build_batch, Transport, TransportError, REQUEST_TIMEOUT};
use async_trait::async_trait;
use pulse_core::rpc::metric_service_client::MetricServiceClient;
use pulse_core::rpc::{self, UpdatesIn, REAL_IP_METADATA, SIGNATURE_METADATA};
use pulse_core::security::{EncryptManager, SignManager};
use pulse_core::Metric;
use std::net::IpAddr;
use tonic::codec::CompressionEncoding;
use tonic::metadata::MetadataValue;
use tonic::transport::{Channel, Endpoint};
use tonic::Request;
use tracing::{debug, warn};

pub struct RpcTransport {
    client: MetricServiceClient<Channel>,
    signer: SignManager,
    encryptor: EncryptManager,
    real_ip: MetadataValue<tonic::metadata::Ascii>,
    retry: RetryPolicy,
}

impl RpcTransport {
    /// The channel connects lazily on the first call
    pub fn new(
        address: &str,
        signer: SignManager,
        encryptor: EncryptManager,
        real_ip: IpAddr,
    ) -> Result<Self, TransportError> {
        let uri = if address.contains("://") {
            address.to_string()
        } else {
            format!("http://{}", address)
        };

        let channel = Endpoint::from_shared(uri)?
            .timeout(REQUEST_TIMEOUT)
            .connect_timeout(REQUEST_TIMEOUT)
            .connect_lazy();
        let client = MetricServiceClient::new(channel)
            .send_compressed(CompressionEncoding::Gzip)
            .accept_compressed(CompressionEncoding::Gzip);

        let real_ip = MetadataValue::try_from(real_ip.to_string())
            .map_err(|e| TransportError::Metadata(e.to_string()))?;

        Ok(Self {
            client,
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

    /// Build the request message and its signature. With a public key the
    /// JSON batch travels encrypted and the typed list stays empty.
    pub fn prepare(
        &self,
        metrics: &[Metric],
    ) -> Result<Option<(UpdatesIn, Option<String>)>, TransportError> {
        let Some(batch) = build_batch(metrics)? else {
            return Ok(None);
        };

        let signature = self.signer.sign(&batch.json);
        let message = if self.encryptor.is_enabled() {
            UpdatesIn {
                metrics: Vec::new(),
                encrypted: self.encryptor.encrypt(&batch.json)?,
            }
        } else {
            UpdatesIn {
                metrics: batch.records.into_iter().map(rpc::Metric::from).collect(),
                encrypted: Vec::new(),
            }
        };

        Ok(Some((message, signature)))
    }

    async fn call(
        &self,
        message: &UpdatesIn,
        signature: Option<&str>,
    ) -> Result<(), TransportError> {
        let mut request = Request::new(message.clone());
        request
            .metadata_mut()
            .insert(REAL_IP_METADATA, self.real_ip.clone());

        if let Some(signature) = signature {
            let value = MetadataValue::try_from(signature)
                .map_err(|e| TransportError::Metadata(e.to_string()))?;
            request.metadata_mut().insert(SIGNATURE_METADATA, value);
        }

        let response = self.client.clone().updates(request).await?;
        let echoed = response.into_inner().signature;
        if let Some(sent) = signature {
            if sent != echoed {
                warn!("Collector echoed a different signature");
            }
        }

        Ok(())
    }
}

#[async_trait]
impl Transport for RpcTransport {
    async fn send(&self, metrics: &[Metric]) -> Result<(), TransportError> {
        let Some((message, signature)) = self.prepare(metrics)? else {
            debug!("Nothing to send");
            return Ok(());
        };

        debug!(
            records = message.metrics.len(),
            encrypted = !message.encrypted.is_empty(),
            "Sending batch over RPC"
        );
        run_with_retry("rpc send", &self.retry, || {
            self.call(&message, signature.as_deref())
        })
        .await
    }
}
