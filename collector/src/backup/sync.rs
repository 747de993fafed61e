use super::{write_snapshot, BackupCreator, BackupError, SnapshotFile};
use crate::storage::Repository;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::error;

/// Writes the snapshot inside every `create` call
pub struct SyncBackup {
    repo: Arc<dyn Repository>,
    file: Arc<SnapshotFile>,
}

impl SyncBackup {
    pub fn new(repo: Arc<dyn Repository>, file: Arc<SnapshotFile>) -> Self {
        Self { repo, file }
    }
}

#[async_trait]
impl BackupCreator for SyncBackup {
    async fn create(&self) -> Result<(), BackupError> {
        let result = write_snapshot(self.repo.as_ref(), &self.file).await;
        if let Err(e) = &result {
            error!(error = %e, "Failed to write snapshot");
        }
        result
    }

    async fn stop(&self) -> Result<(), BackupError> {
        self.create().await
    }
}
