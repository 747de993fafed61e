//! Metric repositories
//!
//! A gauge keeps the last value written; a counter keeps the running sum of
//! every delta applied. The gauge and counter keyspaces are independent, so
//! one id may exist as both.

pub mod memory;
pub mod sqlite;

use async_trait::async_trait;
use pulse_core::MetricKind;
use std::collections::HashMap;
use thiserror::Error;

pub use memory::MemoryRepository;
pub use sqlite::SqliteRepository;

pub type Gauges = HashMap<String, f64>;
pub type Counters = HashMap<String, i64>;

#[derive(Debug, Clone, PartialEq)]
pub struct Gauge {
    pub id: String,
    pub value: f64,
}

impl Gauge {
    pub fn new(id: impl Into<String>, value: f64) -> Self {
        Self {
            id: id.into(),
            value,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Counter {
    pub id: String,
    pub value: i64,
}

impl Counter {
    pub fn new(id: impl Into<String>, value: i64) -> Self {
        Self {
            id: id.into(),
            value,
        }
    }
}

/// Repository failures
#[derive(Debug, Error)]
pub enum StorageError {
    /// No metric of this kind under the id
    #[error("{kind} metric '{id}' not found")]
    NotFound {
        /// Keyspace that was searched
        kind: MetricKind,
        /// Requested metric id
        id: String,
    },

    /// SQLite call failed
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Blocking database task panicked or was cancelled
    #[error("storage task failed: {0}")]
    Task(String),
}

impl StorageError {
    pub fn not_found(kind: MetricKind, id: &str) -> Self {
        StorageError::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound { .. })
    }
}

/// Metric state store
#[async_trait]
pub trait Repository: Send + Sync {
    async fn get_gauge(&self, id: &str) -> Result<f64, StorageError>;

    /// Unconditional upsert
    async fn set_gauge(&self, id: &str, value: f64) -> Result<(), StorageError>;

    async fn get_counter(&self, id: &str) -> Result<i64, StorageError>;

    /// Create the counter or add `delta` to it
    async fn add_counter(&self, id: &str, delta: i64) -> Result<(), StorageError>;

    async fn get_all_gauges(&self) -> Result<Gauges, StorageError>;

    async fn get_all_counters(&self) -> Result<Counters, StorageError>;

    /// Apply a gauge batch atomically; the last value for a repeated id wins
    async fn set_gauges(&self, gauges: &[Gauge]) -> Result<(), StorageError>;

    /// Apply a counter batch atomically; deltas for a repeated id are summed
    async fn add_counters(&self, counters: &[Counter]) -> Result<(), StorageError>;

    /// Apply a mixed batch. Backends that can do so apply both halves under
    /// one lock or transaction.
    async fn apply(&self, gauges: &[Gauge], counters: &[Counter]) -> Result<(), StorageError> {
        self.set_gauges(gauges).await?;
        self.add_counters(counters).await
    }

    /// Both keyspaces as one consistent view
    async fn snapshot(&self) -> Result<(Gauges, Counters), StorageError> {
        let gauges = self.get_all_gauges().await?;
        let counters = self.get_all_counters().await?;
        Ok((gauges, counters))
    }

    /// Health check
    async fn ping(&self) -> Result<(), StorageError> {
        Ok(())
    }
}

/// Collapse a gauge batch to one entry per id, keeping the last value
pub(crate) fn coalesce_gauges(gauges: &[Gauge]) -> Vec<Gauge> {
    let mut index: HashMap<&str, usize> = HashMap::with_capacity(gauges.len());
    let mut out: Vec<Gauge> = Vec::with_capacity(gauges.len());

    for gauge in gauges {
        match index.get(gauge.id.as_str()) {
            Some(&i) => out[i].value = gauge.value,
            None => {
                index.insert(&gauge.id, out.len());
                out.push(gauge.clone());
            }
        }
    }

    out
}

/// Collapse a counter batch to one entry per id, summing the deltas
pub(crate) fn coalesce_counters(counters: &[Counter]) -> Vec<Counter> {
    let mut index: HashMap<&str, usize> = HashMap::with_capacity(counters.len());
    let mut out: Vec<Counter> = Vec::with_capacity(counters.len());

    for counter in counters {
        match index.get(counter.id.as_str()) {
            Some(&i) => out[i].value = out[i].value.saturating_add(counter.value),
            None => {
                index.insert(&counter.id, out.len());
                out.push(counter.clone());
            }
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coalesce_gauges_last_wins() {
        let out = coalesce_gauges(&[
            Gauge::new("Alloc", 10.0),
            Gauge::new("Heap", 1.0),
            Gauge::new("Alloc", 20.0),
        ]);
        assert_eq!(out, vec![Gauge::new("Alloc", 20.0), Gauge::new("Heap", 1.0)]);
    }

    #[test]
    fn test_coalesce_counters_sums() {
        let out = coalesce_counters(&[
            Counter::new("PollCount", 1),
            Counter::new("Other", 5),
            Counter::new("PollCount", 2),
        ]);
        assert_eq!(
            out,
            vec![Counter::new("PollCount", 3), Counter::new("Other", 5)]
        );
    }

    #[test]
    fn test_not_found_message() {
        let err = StorageError::not_found(MetricKind::Gauge, "Alloc");
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "gauge metric 'Alloc' not found");
    }
}
