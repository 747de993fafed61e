//! gRPC protocol server

use crate::api::middleware::check_ip;
use crate::ingest::{IngestError, Ingestor};
use ipnet::IpNet;
use pulse_core::rpc::metric_service_server::{MetricService, MetricServiceServer};
use pulse_core::rpc::{UpdatesIn, UpdatesOut, REAL_IP_METADATA, SIGNATURE_METADATA};
use pulse_core::MetricRecord;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tonic::codec::CompressionEncoding;
use tonic::service::interceptor::InterceptedService;
use tonic::service::Interceptor;
use tonic::transport::Server;
use tonic::{Request, Response, Status};
use tracing::{info, warn};

/// Rejects calls whose `real-ip` metadata is outside the trusted subnet
#[derive(Clone, Default)]
pub struct TrustedSubnetInterceptor {
    subnet: Option<IpNet>,
}

impl TrustedSubnetInterceptor {
    pub fn new(subnet: Option<IpNet>) -> Self {
        Self { subnet }
    }
}

impl Interceptor for TrustedSubnetInterceptor {
    fn call(&mut self, request: Request<()>) -> Result<Request<()>, Status> {
        let real_ip = request
            .metadata()
            .get(REAL_IP_METADATA)
            .and_then(|v| v.to_str().ok());

        match check_ip(self.subnet.as_ref(), real_ip) {
            Ok(()) => Ok(request),
            Err(reason) => {
                warn!(reason = %reason, "Rejected untrusted RPC caller");
                Err(Status::permission_denied(reason))
            }
        }
    }
}

pub fn to_status(err: IngestError) -> Status {
    match err {
        IngestError::MissingSignature | IngestError::Signature(_) => {
            Status::failed_precondition(err.to_string())
        }
        IngestError::Decompress(_)
        | IngestError::Decrypt(_)
        | IngestError::Malformed(_)
        | IngestError::Validation(_) => Status::invalid_argument(err.to_string()),
        IngestError::Storage(_) => Status::internal(err.to_string()),
    }
}

pub struct MetricRpc {
    ingestor: Arc<Ingestor>,
}

impl MetricRpc {
    pub fn new(ingestor: Arc<Ingestor>) -> Self {
        Self { ingestor }
    }

    async fn ingest(&self, message: UpdatesIn, signature: Option<&str>) -> Result<UpdatesOut, IngestError> {
        let applied = if message.encrypted.is_empty() {
            let records = message.metrics.into_iter().map(MetricRecord::from).collect();
            self.ingestor.ingest_records(records, signature).await?
        } else {
            let json = self.ingestor.decrypt(&message.encrypted)?;
            self.ingestor.ingest_json(&json, signature).await?
        };

        info!(
            gauges = applied.gauges,
            counters = applied.counters,
            rejected = applied.rejected,
            "RPC batch received"
        );
        Ok(UpdatesOut {
            signature: applied.signature.unwrap_or_default(),
        })
    }
}

#[tonic::async_trait]
impl MetricService for MetricRpc {
    async fn updates(&self, request: Request<UpdatesIn>) -> Result<Response<UpdatesOut>, Status> {
        let signature = request
            .metadata()
            .get(SIGNATURE_METADATA)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);

        self.ingest(request.into_inner(), signature.as_deref())
            .await
            .map(Response::new)
            .map_err(|e| {
                warn!(error = %e, "RPC batch rejected");
                to_status(e)
            })
    }
}

/// Service stack: trusted subnet interceptor around the gzip-enabled server
pub fn service(
    ingestor: Arc<Ingestor>,
    subnet: Option<IpNet>,
) -> InterceptedService<MetricServiceServer<MetricRpc>, TrustedSubnetInterceptor> {
    let server = MetricServiceServer::new(MetricRpc::new(ingestor))
        .send_compressed(CompressionEncoding::Gzip)
        .accept_compressed(CompressionEncoding::Gzip);
    InterceptedService::new(server, TrustedSubnetInterceptor::new(subnet))
}

/// Serve until `shutdown` resolves, then drain open calls
pub async fn serve<F>(
    addr: SocketAddr,
    ingestor: Arc<Ingestor>,
    subnet: Option<IpNet>,
    shutdown: F,
) -> Result<(), tonic::transport::Error>
where
    F: Future<Output = ()>,
{
    info!(%addr, "RPC server listening");
    Server::builder()
        .add_service(service(ingestor, subnet))
        .serve_with_shutdown(addr, shutdown)
        .await?;
    info!("RPC server stopped");
    Ok(())
}
