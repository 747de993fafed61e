//! Snapshot file
//!
//! A JSON array of metric records. Every save replaces the whole file by
//! writing a sibling temporary file and renaming it over the target.

use super::BackupError;
use pulse_core::MetricRecord;
use std::future::Future;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::debug;

pub struct SnapshotFile {
    path: PathBuf,
    // held across read and write so saves land in the order they read
    write_lock: Mutex<()>,
}

impl SnapshotFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    fn io_error(&self, source: std::io::Error) -> BackupError {
        BackupError::Io {
            path: self.path.display().to_string(),
            source,
        }
    }

    /// Atomically replace the snapshot with `records`
    pub async fn save(&self, records: &[MetricRecord]) -> Result<(), BackupError> {
        let _guard = self.write_lock.lock().await;
        self.write(records).await
    }

    /// Produce the records and write them under one hold of the write lock,
    /// so a save that read older state can never land after a newer one.
    pub async fn save_with<F, Fut>(&self, read: F) -> Result<(), BackupError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Vec<MetricRecord>, BackupError>>,
    {
        let _guard = self.write_lock.lock().await;
        let records = read().await?;
        self.write(&records).await
    }

    async fn write(&self, records: &[MetricRecord]) -> Result<(), BackupError> {
        let data = serde_json::to_vec_pretty(records)?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| self.io_error(e))?;
        }

        let temp = self.temp_path();
        fs::write(&temp, &data).await.map_err(|e| self.io_error(e))?;
        fs::rename(&temp, &self.path)
            .await
            .map_err(|e| self.io_error(e))?;

        debug!(path = %self.path.display(), records = records.len(), "Snapshot written");
        Ok(())
    }

    /// Read the snapshot. A missing or empty file yields no records.
    pub async fn load(&self) -> Result<Vec<MetricRecord>, BackupError> {
        let data = match fs::read(&self.path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(self.io_error(e)),
        };

        if data.iter().all(u8::is_ascii_whitespace) {
            return Ok(Vec::new());
        }

        Ok(serde_json::from_slice(&data)?)
    }
}
