//! API error types and status mapping

use crate::ingest::IngestError;
use crate::storage::StorageError;
use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use pulse_core::ValidationError;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::error;

pub type Result<T> = std::result::Result<T, ApiError>;

/// Body of every error response
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ErrorResponse {
    /// HTTP status code
    pub code: u16,
    /// Human readable description
    pub message: String,
}

/// Errors returned by HTTP handlers
#[derive(Error, Debug)]
pub enum ApiError {
    /// Unknown metric, or a request without a metric id
    #[error("Not found: {0}")]
    NotFound(String),

    /// Malformed, unsigned or undecodable request
    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// Caller outside the trusted subnet
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Storage or server failure
    #[error("Internal server error: {0}")]
    Internal(String),
}

impl ResponseError for ApiError {
    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();
        HttpResponse::build(status).json(ErrorResponse {
            code: status.as_u16(),
            message: self.to_string(),
        })
    }

    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<ValidationError> for ApiError {
    fn from(err: ValidationError) -> Self {
        match err {
            ValidationError::MissingId => ApiError::NotFound(err.to_string()),
            other => ApiError::BadRequest(other.to_string()),
        }
    }
}

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        if err.is_not_found() {
            return ApiError::NotFound(err.to_string());
        }
        error!(error = %err, "Storage failure");
        ApiError::Internal(err.to_string())
    }
}

impl From<IngestError> for ApiError {
    fn from(err: IngestError) -> Self {
        match err {
            IngestError::Validation(e) => e.into(),
            IngestError::Storage(e) => e.into(),
            IngestError::Decompress(_)
            | IngestError::Decrypt(_)
            | IngestError::MissingSignature
            | IngestError::Signature(_)
            | IngestError::Malformed(_) => ApiError::BadRequest(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pulse_core::security::SignatureError;
    use pulse_core::MetricKind;

    #[test]
    fn test_status_mapping() {
        let cases: Vec<(ApiError, StatusCode)> = vec![
            (
                StorageError::not_found(MetricKind::Gauge, "Alloc").into(),
                StatusCode::NOT_FOUND,
            ),
            (
                StorageError::Task("join".into()).into(),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (ValidationError::MissingId.into(), StatusCode::NOT_FOUND),
            (
                ValidationError::InvalidKind("meter".into()).into(),
                StatusCode::BAD_REQUEST,
            ),
            (
                IngestError::Signature(SignatureError::Mismatch).into(),
                StatusCode::BAD_REQUEST,
            ),
            (IngestError::MissingSignature.into(), StatusCode::BAD_REQUEST),
            (ApiError::Forbidden("10.0.0.5".into()), StatusCode::FORBIDDEN),
        ];

        for (err, status) in cases {
            assert_eq!(err.status_code(), status, "{err}");
        }
    }

    #[test]
    fn test_error_body_is_json() {
        let resp = ApiError::NotFound("gauge Alloc".into()).error_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            resp.headers().get("content-type").unwrap(),
            "application/json"
        );
    }
}
