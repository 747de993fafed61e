//! Request body decoding
//!
//! Undoes the agent's framing: gzip when `Content-Encoding` says so, then
//! decryption when a private key is configured. Handlers receive plain JSON.

use crate::api::error::ApiError;
use crate::ingest::{IngestError, Ingestor};
use actix_web::http::header::{HeaderMap, ACCEPT_ENCODING, CONTENT_ENCODING};
use actix_web::{dev::Payload, web, FromRequest, HttpRequest, HttpResponse, HttpResponseBuilder};
use futures::future::LocalBoxFuture;
use pulse_core::compress::{accepts_gzip, compress, decompress_limited, GZIP};
use tracing::warn;

/// Largest request body accepted after gzip inflation
pub const MAX_DECODED_BODY: usize = 8 * 1024 * 1024;

pub struct DecodedBody(pub Vec<u8>);

fn header_lists_gzip(headers: &HeaderMap, name: actix_web::http::header::HeaderName) -> bool {
    headers
        .get(name)
        .and_then(|h| h.to_str().ok())
        .map(accepts_gzip)
        .unwrap_or(false)
}

impl FromRequest for DecodedBody {
    type Error = actix_web::Error;
    type Future = LocalBoxFuture<'static, Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, payload: &mut Payload) -> Self::Future {
        let ingestor = req.app_data::<web::Data<Ingestor>>().cloned();
        let gzipped = header_lists_gzip(req.headers(), CONTENT_ENCODING);
        let bytes = web::Bytes::from_request(req, payload);

        Box::pin(async move {
            let ingestor =
                ingestor.ok_or_else(|| ApiError::Internal("ingestor not registered".into()))?;
            let body = bytes.await?;

            let body = if gzipped {
                decompress_limited(&body, MAX_DECODED_BODY)
                    .map_err(|e| ApiError::from(IngestError::Decompress(e)))?
            } else {
                body.to_vec()
            };

            let body = ingestor.decrypt(&body).map_err(ApiError::from)?;
            Ok(DecodedBody(body))
        })
    }
}

/// Finish `builder` with `body`, gzip-compressed when the caller accepts it
pub fn respond(req: &HttpRequest, mut builder: HttpResponseBuilder, body: Vec<u8>) -> HttpResponse {
    if header_lists_gzip(req.headers(), ACCEPT_ENCODING) {
        match compress(&body) {
            Ok(compressed) => {
                return builder
                    .insert_header((CONTENT_ENCODING, GZIP))
                    .body(compressed)
            }
            Err(e) => warn!(error = %e, "Failed to compress response, sending it plain"),
        }
    }
    builder.body(body)
}
