//! Snapshot backups
//!
//! A [`BackupCreator`] persists the repository to the snapshot file. The sync
//! policy writes inside every `create` call; the deferred policy only marks
//! the state dirty and writes on its own timer.

pub mod deferred;
pub mod file;
pub mod sync;

use crate::storage::{Counters, Gauges, Repository, StorageError};
use async_trait::async_trait;
use pulse_core::{MetricKind, MetricRecord};
use thiserror::Error;
use tracing::{info, warn};

pub use deferred::{AsyncBackup, BackupState};
pub use file::SnapshotFile;
pub use sync::SyncBackup;

/// Snapshot read and write failures
#[derive(Debug, Error)]
pub enum BackupError {
    /// Snapshot file could not be read, written or renamed
    #[error("snapshot file {path}: {source}")]
    Io {
        /// Snapshot path
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Snapshot is not a JSON array of records
    #[error("snapshot encoding: {0}")]
    Json(#[from] serde_json::Error),

    /// Repository could not be read for the snapshot
    #[error("failed to read repository: {0}")]
    Storage(#[from] StorageError),
}

#[async_trait]
pub trait BackupCreator: Send + Sync {
    /// Request a durable snapshot of the current state
    async fn create(&self) -> Result<(), BackupError>;

    /// Final flush on shutdown
    async fn stop(&self) -> Result<(), BackupError>;
}

/// Convert repository contents to snapshot records
pub fn to_records(gauges: &Gauges, counters: &Counters) -> Vec<MetricRecord> {
    let mut records = Vec::with_capacity(gauges.len() + counters.len());
    records.extend(counters.iter().map(|(id, delta)| MetricRecord {
        delta: Some(*delta),
        ..MetricRecord::query(id.clone(), MetricKind::Counter)
    }));
    records.extend(gauges.iter().map(|(id, value)| MetricRecord {
        value: Some(*value),
        ..MetricRecord::query(id.clone(), MetricKind::Gauge)
    }));
    records
}

/// Read a consistent view of `repo` and write it to `file`. The read happens
/// under the file's write lock.
pub async fn write_snapshot(repo: &dyn Repository, file: &SnapshotFile) -> Result<(), BackupError> {
    file.save_with(|| async {
        let (gauges, counters) = repo.snapshot().await?;
        Ok::<_, BackupError>(to_records(&gauges, &counters))
    })
    .await
}

/// Replay the snapshot into `repo`. Returns the number of records applied;
/// records with a missing value or an unknown type are skipped.
pub async fn restore(file: &SnapshotFile, repo: &dyn Repository) -> Result<usize, BackupError> {
    let records = file.load().await?;
    let mut applied = 0;

    for record in records {
        match (record.metric_kind(), record.value, record.delta) {
            (Ok(MetricKind::Gauge), Some(value), _) => {
                repo.set_gauge(&record.id, value).await?;
            }
            (Ok(MetricKind::Counter), _, Some(delta)) => {
                repo.add_counter(&record.id, delta).await?;
            }
            _ => {
                warn!(id = %record.id, kind = %record.kind, "Skipping snapshot record");
                continue;
            }
        }
        applied += 1;
    }

    info!(path = %file.path().display(), records = applied, "Snapshot restored");
    Ok(applied)
}
