//! gRPC service definition
//!
//! Messages are declared here with prost derives; the client and server stubs
//! for `metrics.MetricService` are generated by `build.rs`.

use crate::model::MetricRecord;

/// Metadata entry carrying the caller's outbound IP
pub const REAL_IP_METADATA: &str = "real-ip";
/// Metadata entry carrying the batch signature
pub const SIGNATURE_METADATA: &str = "hashsha256";

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Metric {
    #[prost(string, tag = "1")]
    pub id: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub r#type: ::prost::alloc::string::String,
    #[prost(int64, optional, tag = "3")]
    pub delta: ::core::option::Option<i64>,
    #[prost(double, optional, tag = "4")]
    pub value: ::core::option::Option<f64>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct UpdatesIn {
    #[prost(message, repeated, tag = "1")]
    pub metrics: ::prost::alloc::vec::Vec<Metric>,
    /// Encrypted JSON batch; when set, `metrics` is left empty
    #[prost(bytes = "vec", tag = "2")]
    pub encrypted: ::prost::alloc::vec::Vec<u8>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct UpdatesOut {
    #[prost(string, tag = "1")]
    pub signature: ::prost::alloc::string::String,
}

impl From<MetricRecord> for Metric {
    fn from(record: MetricRecord) -> Self {
        Self {
            id: record.id,
            r#type: record.kind,
            delta: record.delta,
            value: record.value,
        }
    }
}

impl From<Metric> for MetricRecord {
    fn from(metric: Metric) -> Self {
        Self {
            id: metric.id,
            kind: metric.r#type,
            delta: metric.delta,
            value: metric.value,
        }
    }
}

include!(concat!(env!("OUT_DIR"), "/metrics.MetricService.rs"));
