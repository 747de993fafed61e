//! Trusted subnet admission
//!
//! When a subnet is configured, every request must carry an `X-Real-IP`
//! header with an address inside it. Rejected requests never reach a handler.

use crate::api::error::ApiError;
use actix_web::{
    body::EitherBody,
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    Error,
};
use ipnet::IpNet;
use std::future::{ready, Future, Ready};
use std::net::IpAddr;
use std::pin::Pin;
use tracing::warn;

pub const REAL_IP_HEADER: &str = "X-Real-IP";

/// Admission check shared by the HTTP middleware and the RPC interceptor
pub fn check_ip(subnet: Option<&IpNet>, real_ip: Option<&str>) -> Result<(), String> {
    let Some(subnet) = subnet else {
        return Ok(());
    };

    let raw = real_ip.map(str::trim).filter(|s| !s.is_empty());
    let Some(raw) = raw else {
        return Err("client address missing".to_string());
    };

    // IPv4-mapped IPv6 addresses also match the IPv4 subnet
    match raw.parse::<IpAddr>() {
        Ok(ip) if subnet.contains(&ip) || subnet.contains(&ip.to_canonical()) => Ok(()),
        Ok(ip) => Err(format!("{ip} is outside the trusted subnet")),
        Err(_) => Err(format!("unparsable client address {raw:?}")),
    }
}

#[derive(Clone, Default)]
pub struct TrustedSubnet {
    subnet: Option<IpNet>,
}

impl TrustedSubnet {
    pub fn new(subnet: Option<IpNet>) -> Self {
        Self { subnet }
    }
}

impl<S, B> Transform<S, ServiceRequest> for TrustedSubnet
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type Transform = TrustedSubnetMiddleware<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(TrustedSubnetMiddleware {
            service,
            subnet: self.subnet,
        }))
    }
}

pub struct TrustedSubnetMiddleware<S> {
    service: S,
    subnet: Option<IpNet>,
}

impl<S, B> Service<ServiceRequest> for TrustedSubnetMiddleware<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>>>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let real_ip = req
            .headers()
            .get(REAL_IP_HEADER)
            .and_then(|h| h.to_str().ok());

        if let Err(reason) = check_ip(self.subnet.as_ref(), real_ip) {
            warn!(path = %req.path(), reason = %reason, "Rejected untrusted caller");
            let response = req
                .error_response(ApiError::Forbidden(reason))
                .map_into_right_body();
            return Box::pin(async move { Ok(response) });
        }

        let fut = self.service.call(req);
        Box::pin(async move { fut.await.map(ServiceResponse::map_into_left_body) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::{
        http::StatusCode,
        test::{call_service, init_service, TestRequest},
        web, App, HttpResponse,
    };

    fn subnet() -> IpNet {
        "192.168.1.0/24".parse().unwrap()
    }

    #[test]
    fn test_check_ip() {
        let net = subnet();
        assert!(check_ip(None, None).is_ok());
        assert!(check_ip(Some(&net), Some("192.168.1.20")).is_ok());
        assert!(check_ip(Some(&net), Some("10.0.0.5")).is_err());
        assert!(check_ip(Some(&net), Some("not-an-ip")).is_err());
        assert!(check_ip(Some(&net), None).is_err());
        assert!(check_ip(Some(&net), Some("")).is_err());
    }

    #[test]
    fn test_check_ip_mapped_v6() {
        let net = subnet();
        assert!(check_ip(Some(&net), Some("::ffff:192.168.1.5")).is_ok());
        assert!(check_ip(Some(&net), Some("::ffff:10.0.0.5")).is_err());
        assert!(check_ip(Some(&net), Some("2001:db8::1")).is_err());

        let v6: IpNet = "2001:db8::/32".parse().unwrap();
        assert!(check_ip(Some(&v6), Some("2001:db8::1")).is_ok());
    }

    #[actix_web::test]
    async fn test_middleware_rejects_outside_subnet() {
        let app = init_service(
            App::new()
                .wrap(TrustedSubnet::new(Some(subnet())))
                .route("/", web::get().to(|| async { HttpResponse::Ok().finish() })),
        )
        .await;

        let req = TestRequest::get()
            .uri("/")
            .insert_header((REAL_IP_HEADER, "10.0.0.5"))
            .to_request();
        assert_eq!(call_service(&app, req).await.status(), StatusCode::FORBIDDEN);

        let req = TestRequest::get()
            .uri("/")
            .insert_header((REAL_IP_HEADER, "192.168.1.7"))
            .to_request();
        assert_eq!(call_service(&app, req).await.status(), StatusCode::OK);
    }

    #[actix_web::test]
    async fn test_no_subnet_admits_everyone() {
        let app = init_service(
            App::new()
                .wrap(TrustedSubnet::default())
                .route("/", web::get().to(|| async { HttpResponse::Ok().finish() })),
        )
        .await;

        let req = TestRequest::get().uri("/").to_request();
        assert_eq!(call_service(&app, req).await.status(), StatusCode::OK);
    }
}
