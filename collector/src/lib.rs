//! Pulse collector
//!
//! Receives metric batches over HTTP and gRPC, keeps the current value of
//! every gauge and the running sum of every counter, and snapshots that state
//! to a JSON file.

pub mod api;
pub mod backup;
pub mod config;
pub mod ingest;
pub mod rpc;
pub mod storage;

pub use backup::{restore, AsyncBackup, BackupCreator, BackupError, SnapshotFile, SyncBackup};
pub use config::{CollectorArgs, CollectorConfig, ConfigError};
pub use ingest::{Applied, IngestError, Ingestor};
pub use storage::{MemoryRepository, Repository, SqliteRepository, StorageError};
