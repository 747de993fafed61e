//! HTTP route handlers

use crate::api::body::{respond, DecodedBody};
use crate::api::error::{ApiError, Result};
use crate::ingest::{record_for, Ingestor};
use actix_web::http::header::ContentType;
use actix_web::{web, HttpRequest, HttpResponse};
use pulse_core::security::SIGNATURE_HEADER;
use pulse_core::{Metric, MetricKind, MetricRecord, MetricValue};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, error, info};

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/", web::get().to(list))
        .route("/ping", web::get().to(ping))
        .route("/update/", web::post().to(update_json))
        .route("/update/{kind}/{id}/{value}", web::post().to(update_path))
        .route("/updates/", web::post().to(updates))
        .route("/value/", web::post().to(value_json))
        .route("/value/{kind}/{id}", web::get().to(value_path));
}

/// Every stored metric, ordered by id
#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct Listing {
    pub gauges: BTreeMap<String, f64>,
    pub counters: BTreeMap<String, i64>,
}

fn parse_record(body: &[u8]) -> Result<MetricRecord> {
    serde_json::from_slice(body).map_err(|e| ApiError::BadRequest(e.to_string()))
}

fn json_body<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    serde_json::to_vec(value).map_err(|e| ApiError::Internal(e.to_string()))
}

async fn list(req: HttpRequest, ingestor: web::Data<Ingestor>) -> Result<HttpResponse> {
    let (gauges, counters) = ingestor.repository().snapshot().await?;
    let listing = Listing {
        gauges: gauges.into_iter().collect(),
        counters: counters.into_iter().collect(),
    };

    let mut builder = HttpResponse::Ok();
    builder.content_type(ContentType::json());
    Ok(respond(&req, builder, json_body(&listing)?))
}

async fn ping(ingestor: web::Data<Ingestor>) -> HttpResponse {
    match ingestor.repository().ping().await {
        Ok(()) => HttpResponse::Ok().finish(),
        Err(e) => {
            error!(error = %e, "Storage health check failed");
            HttpResponse::InternalServerError().finish()
        }
    }
}

/// Single JSON record; the whole request fails on any validation error
async fn update_json(
    req: HttpRequest,
    ingestor: web::Data<Ingestor>,
    body: DecodedBody,
) -> Result<HttpResponse> {
    let metric = Metric::try_from(parse_record(&body.0)?)?;
    let stored = ingestor.update(metric).await?;

    let mut builder = HttpResponse::Ok();
    builder.content_type(ContentType::json());
    Ok(respond(&req, builder, json_body(&stored)?))
}

async fn update_path(
    ingestor: web::Data<Ingestor>,
    path: web::Path<(String, String, String)>,
) -> Result<HttpResponse> {
    let (kind, id, raw) = path.into_inner();
    let kind: MetricKind = kind.parse()?;
    let value = MetricValue::parse(kind, &raw)?;

    ingestor.update(Metric { id, value }).await?;
    Ok(HttpResponse::Ok().content_type(ContentType::plaintext()).finish())
}

/// Batch of JSON records; invalid records are dropped, the rest applied
async fn updates(
    req: HttpRequest,
    ingestor: web::Data<Ingestor>,
    body: DecodedBody,
) -> Result<HttpResponse> {
    let signature = req
        .headers()
        .get(SIGNATURE_HEADER)
        .and_then(|h| h.to_str().ok());

    let applied = ingestor.ingest_json(&body.0, signature).await?;
    info!(
        gauges = applied.gauges,
        counters = applied.counters,
        rejected = applied.rejected,
        "Batch received"
    );

    let mut builder = HttpResponse::Ok();
    builder.content_type(ContentType::json());
    if let Some(signature) = &applied.signature {
        builder.insert_header((SIGNATURE_HEADER, signature.as_str()));
    }
    Ok(respond(&req, builder, Vec::new()))
}

async fn value_json(
    req: HttpRequest,
    ingestor: web::Data<Ingestor>,
    body: DecodedBody,
) -> Result<HttpResponse> {
    let query = parse_record(&body.0)?;
    if query.id.is_empty() {
        return Err(ApiError::NotFound("metric ID not specified".into()));
    }
    let kind = query.metric_kind()?;

    let value = lookup(&ingestor, kind, &query.id).await?;
    let mut builder = HttpResponse::Ok();
    builder.content_type(ContentType::json());
    Ok(respond(&req, builder, json_body(&record_for(&query.id, value))?))
}

async fn value_path(
    req: HttpRequest,
    ingestor: web::Data<Ingestor>,
    path: web::Path<(String, String)>,
) -> Result<HttpResponse> {
    let (kind, id) = path.into_inner();
    let kind: MetricKind = kind.parse()?;

    let value = lookup(&ingestor, kind, &id).await?;
    let mut builder = HttpResponse::Ok();
    builder.content_type(ContentType::plaintext());
    Ok(respond(&req, builder, value.to_string().into_bytes()))
}

async fn lookup(ingestor: &Ingestor, kind: MetricKind, id: &str) -> Result<MetricValue> {
    ingestor.value(kind, id).await.map_err(|e| {
        if e.is_not_found() {
            debug!(%kind, id, "Metric not found");
        }
        ApiError::from(e)
    })
}
