use crate::api::middleware::{RequestLogger, TrustedSubnet};
use crate::api::routes;
use crate::ingest::Ingestor;
use actix_web::dev::{Server, ServerHandle};
use actix_web::{web, App, HttpServer};
use ipnet::IpNet;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Running HTTP protocol server
pub struct HttpApi {
    server: Option<Server>,
    handle: ServerHandle,
    addrs: Vec<SocketAddr>,
}

impl HttpApi {
    /// Bind `address` and prepare the server. Nothing is served until
    /// [`HttpApi::spawn`] is called.
    pub fn bind(
        address: &str,
        ingestor: Arc<Ingestor>,
        subnet: Option<IpNet>,
        grace: Duration,
    ) -> std::io::Result<Self> {
        let data = web::Data::from(ingestor);

        let server = HttpServer::new(move || {
            App::new()
                .app_data(data.clone())
                .wrap(TrustedSubnet::new(subnet))
                .wrap(RequestLogger)
                .configure(routes::configure)
        })
        .shutdown_timeout(grace.as_secs())
        // signals are handled by the binary for both servers
        .disable_signals()
        .bind(address)?;

        let addrs = server.addrs();
        let server = server.run();
        let handle = server.handle();

        info!(address, ?addrs, "HTTP server bound");
        Ok(Self {
            server: Some(server),
            handle,
            addrs,
        })
    }

    pub fn local_addrs(&self) -> &[SocketAddr] {
        &self.addrs
    }

    pub fn handle(&self) -> ServerHandle {
        self.handle.clone()
    }

    /// Serve on the current runtime
    pub fn spawn(&mut self) -> Option<tokio::task::JoinHandle<std::io::Result<()>>> {
        self.server.take().map(tokio::spawn)
    }

    /// Stop accepting and wait for in-flight requests, bounded by the grace
    /// timeout
    pub async fn stop(&self) {
        self.handle.stop(true).await;
        info!("HTTP server stopped");
    }
}
