//! Metric data model
//!
//! A [`Metric`] is either a gauge (point-in-time float, overwritten on every
//! update) or a counter (integer delta, accumulated by the receiver). The kind
//! and the payload live in one closed enum so they can never disagree.
//!
//! [`MetricRecord`] is the JSON wire shape shared by the HTTP endpoints, the
//! RPC signature contract and the snapshot file:
//! `{"id": string, "type": "gauge"|"counter", "delta": i64?, "value": f64?}`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Wire name of the gauge kind
pub const TYPE_GAUGE: &str = "gauge";
/// Wire name of the counter kind
pub const TYPE_COUNTER: &str = "counter";

/// Validation errors for inbound metric records
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("metric ID not specified")]
    MissingId,

    #[error("metric type '{0}' is invalid")]
    InvalidKind(String),

    #[error("{kind} metric '{id}' has no value")]
    MissingValue { kind: MetricKind, id: String },

    #[error("{kind} metric '{id}' has a non-finite value")]
    NonFiniteValue { kind: MetricKind, id: String },

    #[error("metric value '{0}' is invalid")]
    InvalidValue(String),
}

/// Metric kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    Gauge,
    Counter,
}

impl MetricKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Gauge => TYPE_GAUGE,
            MetricKind::Counter => TYPE_COUNTER,
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MetricKind {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            TYPE_GAUGE => Ok(MetricKind::Gauge),
            TYPE_COUNTER => Ok(MetricKind::Counter),
            other => Err(ValidationError::InvalidKind(other.to_string())),
        }
    }
}

/// Metric payload
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MetricValue {
    /// Current value, replaces whatever was stored
    Gauge(f64),
    /// Delta, added to the stored running sum
    Counter(i64),
}

impl MetricValue {
    pub fn kind(&self) -> MetricKind {
        match self {
            MetricValue::Gauge(_) => MetricKind::Gauge,
            MetricValue::Counter(_) => MetricKind::Counter,
        }
    }

    /// Parse a plain-text value for the given kind
    pub fn parse(kind: MetricKind, raw: &str) -> Result<Self, ValidationError> {
        match kind {
            MetricKind::Gauge => raw
                .parse::<f64>()
                .ok()
                .filter(|v| v.is_finite())
                .map(MetricValue::Gauge)
                .ok_or_else(|| ValidationError::InvalidValue(raw.to_string())),
            MetricKind::Counter => raw
                .parse::<i64>()
                .map(MetricValue::Counter)
                .map_err(|_| ValidationError::InvalidValue(raw.to_string())),
        }
    }
}

impl fmt::Display for MetricValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetricValue::Gauge(v) => write!(f, "{}", v),
            MetricValue::Counter(d) => write!(f, "{}", d),
        }
    }
}

/// A single observation
#[derive(Debug, Clone, PartialEq)]
pub struct Metric {
    pub id: String,
    pub value: MetricValue,
}

impl Metric {
    pub fn gauge(id: impl Into<String>, value: f64) -> Self {
        Self {
            id: id.into(),
            value: MetricValue::Gauge(value),
        }
    }

    pub fn counter(id: impl Into<String>, delta: i64) -> Self {
        Self {
            id: id.into(),
            value: MetricValue::Counter(delta),
        }
    }

    pub fn kind(&self) -> MetricKind {
        self.value.kind()
    }
}

/// JSON wire record
///
/// `kind` stays a raw string so an unknown type rejects only its own record,
/// not the whole batch it arrived in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricRecord {
    #[serde(default)]
    pub id: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delta: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
}

impl MetricRecord {
    /// Record carrying only an id and a kind, as used by value lookups
    pub fn query(id: impl Into<String>, kind: MetricKind) -> Self {
        Self {
            id: id.into(),
            kind: kind.as_str().to_string(),
            delta: None,
            value: None,
        }
    }

    /// Parse the kind field
    pub fn metric_kind(&self) -> Result<MetricKind, ValidationError> {
        self.kind.parse()
    }
}

impl TryFrom<&Metric> for MetricRecord {
    type Error = ValidationError;

    /// JSON has no representation for NaN or infinity, so such gauges cannot
    /// be put on the wire.
    fn try_from(metric: &Metric) -> Result<Self, Self::Error> {
        if metric.id.is_empty() {
            return Err(ValidationError::MissingId);
        }

        let mut record = MetricRecord::query(metric.id.clone(), metric.kind());
        match metric.value {
            MetricValue::Gauge(v) if !v.is_finite() => {
                return Err(ValidationError::NonFiniteValue {
                    kind: MetricKind::Gauge,
                    id: metric.id.clone(),
                })
            }
            MetricValue::Gauge(v) => record.value = Some(v),
            MetricValue::Counter(d) => record.delta = Some(d),
        }
        Ok(record)
    }
}

impl TryFrom<MetricRecord> for Metric {
    type Error = ValidationError;

    fn try_from(record: MetricRecord) -> Result<Self, Self::Error> {
        if record.id.is_empty() {
            return Err(ValidationError::MissingId);
        }

        let kind = record.metric_kind()?;
        let value = match kind {
            MetricKind::Gauge => record.value.map(MetricValue::Gauge),
            MetricKind::Counter => record.delta.map(MetricValue::Counter),
        };

        match value {
            Some(value) => Ok(Metric {
                id: record.id,
                value,
            }),
            None => Err(ValidationError::MissingValue {
                kind,
                id: record.id,
            }),
        }
    }
}

/// Outcome of decoding a batch: valid metrics in arrival order plus the
/// records that were dropped.
#[derive(Debug, Default)]
pub struct DecodedBatch {
    pub metrics: Vec<Metric>,
    pub rejected: Vec<ValidationError>,
}

/// Validate a list of wire records, dropping the invalid ones
pub fn validate_records(records: Vec<MetricRecord>) -> DecodedBatch {
    let mut batch = DecodedBatch {
        metrics: Vec::with_capacity(records.len()),
        rejected: Vec::new(),
    };

    for record in records {
        match Metric::try_from(record) {
            Ok(metric) => batch.metrics.push(metric),
            Err(e) => batch.rejected.push(e),
        }
    }

    batch
}

/// Decode a JSON array of records. Malformed JSON fails the whole batch;
/// semantically invalid records are dropped individually.
pub fn decode_batch(body: &[u8]) -> Result<DecodedBatch, serde_json::Error> {
    let records: Vec<MetricRecord> = serde_json::from_slice(body)?;
    Ok(validate_records(records))
}

/// Convert metrics to wire records, skipping the ones that cannot be encoded
pub fn encode_records(metrics: &[Metric]) -> (Vec<MetricRecord>, Vec<ValidationError>) {
    let mut records = Vec::with_capacity(metrics.len());
    let mut skipped = Vec::new();

    for metric in metrics {
        match MetricRecord::try_from(metric) {
            Ok(record) => records.push(record),
            Err(e) => skipped.push(e),
        }
    }

    (records, skipped)
}
