//! Inbound update pipeline shared by the HTTP and RPC servers
//!
//! decrypt -> verify signature -> decode and validate -> group by kind ->
//! apply to the repository -> notify the backup policy.

use crate::backup::{BackupCreator, BackupError};
use crate::storage::{Counter, Gauge, Repository, StorageError};
use pulse_core::security::{CryptError, DecryptManager, SignManager, SignatureError};
use pulse_core::{
    decode_batch, validate_records, DecodedBatch, Metric, MetricKind, MetricRecord, MetricValue,
    ValidationError,
};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, warn};

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("failed to decompress body: {0}")]
    Decompress(#[source] std::io::Error),

    #[error("failed to decrypt body: {0}")]
    Decrypt(#[from] CryptError),

    #[error("signature missing")]
    MissingSignature,

    #[error("signature rejected: {0}")]
    Signature(#[from] SignatureError),

    #[error("malformed payload: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("invalid metric: {0}")]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Result of applying a batch
#[derive(Debug, Default, PartialEq)]
pub struct Applied {
    pub gauges: usize,
    pub counters: usize,
    pub rejected: usize,
    /// Server-computed signature, when signing is enabled
    pub signature: Option<String>,
}

pub struct Ingestor {
    repo: Arc<dyn Repository>,
    backup: Arc<dyn BackupCreator>,
    signer: SignManager,
    decryptor: DecryptManager,
}

impl Ingestor {
    pub fn new(
        repo: Arc<dyn Repository>,
        backup: Arc<dyn BackupCreator>,
        signer: SignManager,
        decryptor: DecryptManager,
    ) -> Self {
        Self {
            repo,
            backup,
            signer,
            decryptor,
        }
    }

    pub fn repository(&self) -> &Arc<dyn Repository> {
        &self.repo
    }

    pub fn signer(&self) -> &SignManager {
        &self.signer
    }

    pub fn decrypt(&self, body: &[u8]) -> Result<Vec<u8>, IngestError> {
        Ok(self.decryptor.decrypt(body)?)
    }

    /// Check the signature of `body`. With signing disabled any signature is
    /// ignored; with signing enabled it is required.
    pub fn verify(&self, body: &[u8], signature: Option<&str>) -> Result<Option<String>, IngestError> {
        if !self.signer.is_enabled() {
            return Ok(None);
        }

        let signature = signature
            .filter(|s| !s.is_empty())
            .ok_or(IngestError::MissingSignature)?;
        match self.signer.verify(body, signature) {
            Ok(computed) => Ok(Some(computed)),
            Err(e) => {
                warn!(error = %e, "Rejected batch with bad signature");
                Err(e.into())
            }
        }
    }

    /// Batch from a decrypted JSON body
    pub async fn ingest_json(
        &self,
        body: &[u8],
        signature: Option<&str>,
    ) -> Result<Applied, IngestError> {
        let signature = self.verify(body, signature)?;
        let batch = decode_batch(body)?;
        self.apply_batch(batch, signature).await
    }

    /// Batch of typed records. The signature covers their JSON serialization.
    pub async fn ingest_records(
        &self,
        records: Vec<MetricRecord>,
        signature: Option<&str>,
    ) -> Result<Applied, IngestError> {
        let signature = if self.signer.is_enabled() {
            let json = serde_json::to_vec(&records)?;
            self.verify(&json, signature)?
        } else {
            None
        };
        self.apply_batch(validate_records(records), signature).await
    }

    async fn apply_batch(
        &self,
        batch: DecodedBatch,
        signature: Option<String>,
    ) -> Result<Applied, IngestError> {
        for e in &batch.rejected {
            debug!(error = %e, "Dropped invalid record");
        }

        let mut gauges = Vec::new();
        let mut counters = Vec::new();
        for metric in batch.metrics {
            match metric.value {
                MetricValue::Gauge(v) => gauges.push(Gauge::new(metric.id, v)),
                MetricValue::Counter(d) => counters.push(Counter::new(metric.id, d)),
            }
        }

        let applied = Applied {
            gauges: gauges.len(),
            counters: counters.len(),
            rejected: batch.rejected.len(),
            signature,
        };

        if applied.gauges + applied.counters > 0 {
            self.repo.apply(&gauges, &counters).await?;
            self.backup_changed().await;
        }

        debug!(
            gauges = applied.gauges,
            counters = applied.counters,
            rejected = applied.rejected,
            "Batch applied"
        );
        Ok(applied)
    }

    /// Apply one metric and return the stored state
    pub async fn update(&self, metric: Metric) -> Result<MetricRecord, IngestError> {
        let kind = metric.kind();
        match metric.value {
            MetricValue::Gauge(v) => self.repo.set_gauge(&metric.id, v).await?,
            MetricValue::Counter(d) => self.repo.add_counter(&metric.id, d).await?,
        }
        self.backup_changed().await;

        let value = self.value(kind, &metric.id).await?;
        Ok(record_for(&metric.id, value))
    }

    pub async fn value(&self, kind: MetricKind, id: &str) -> Result<MetricValue, StorageError> {
        match kind {
            MetricKind::Gauge => self.repo.get_gauge(id).await.map(MetricValue::Gauge),
            MetricKind::Counter => self.repo.get_counter(id).await.map(MetricValue::Counter),
        }
    }

    // Persistence failures never fail the request
    async fn backup_changed(&self) {
        if let Err(e) = self.backup.create().await {
            log_backup_error(&e);
        }
    }
}

fn log_backup_error(e: &BackupError) {
    error!(error = %e, "Backup failed after update");
}

/// Wire record carrying a stored value
pub fn record_for(id: &str, value: MetricValue) -> MetricRecord {
    let mut record = MetricRecord::query(id, value.kind());
    match value {
        MetricValue::Gauge(v) => record.value = Some(v),
        MetricValue::Counter(d) => record.delta = Some(d),
    }
    record
}
