//! Deferred backup policy
//!
//! `create` moves the state from Idle to Dirty and returns. A background
//! timer flushes on every tick where the state is Dirty, so any number of
//! `create` calls within one interval cost at most one write. `stop` halts
//! the timer and then flushes unconditionally.

use super::{write_snapshot, BackupCreator, BackupError, SnapshotFile};
use crate::storage::Repository;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackupState {
    /// Snapshot matches the repository
    Idle,
    /// Repository changed since the last snapshot
    Dirty,
}

struct Inner {
    repo: Arc<dyn Repository>,
    file: Arc<SnapshotFile>,
    state: Mutex<BackupState>,
    writes: AtomicU64,
}

impl Inner {
    fn mark_dirty(&self) {
        *self.state.lock() = BackupState::Dirty;
    }

    /// Dirty -> Idle; true when there was something to flush
    fn take_dirty(&self) -> bool {
        let mut state = self.state.lock();
        let dirty = *state == BackupState::Dirty;
        *state = BackupState::Idle;
        dirty
    }

    async fn flush(&self) -> Result<(), BackupError> {
        match write_snapshot(self.repo.as_ref(), &self.file).await {
            Ok(()) => {
                self.writes.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
            Err(e) => {
                // keep the changes pending for the next attempt
                self.mark_dirty();
                Err(e)
            }
        }
    }
}

struct Worker {
    stop: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Interval-driven backup
pub struct AsyncBackup {
    inner: Arc<Inner>,
    interval: Duration,
    worker: Mutex<Option<Worker>>,
}

impl AsyncBackup {
    pub fn new(repo: Arc<dyn Repository>, file: Arc<SnapshotFile>, interval: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                repo,
                file,
                state: Mutex::new(BackupState::Idle),
                writes: AtomicU64::new(0),
            }),
            interval,
            worker: Mutex::new(None),
        }
    }

    pub fn state(&self) -> BackupState {
        *self.inner.state.lock()
    }

    /// Successful snapshot writes so far
    pub fn writes(&self) -> u64 {
        self.inner.writes.load(Ordering::SeqCst)
    }

    /// Start the flush timer. Calling it twice has no effect.
    pub fn start(&self) {
        let mut worker = self.worker.lock();
        if worker.is_some() {
            return;
        }

        let (stop, mut stopped) = watch::channel(false);
        let inner = self.inner.clone();
        let period = self.interval;

        let handle = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;
                    _ = stopped.changed() => break,
                    _ = ticker.tick() => {
                        if !inner.take_dirty() {
                            continue;
                        }
                        match inner.flush().await {
                            Ok(()) => debug!("Deferred snapshot written"),
                            Err(e) => error!(error = %e, "Failed to write snapshot"),
                        }
                    }
                }
            }
        });

        *worker = Some(Worker { stop, handle });
        info!(interval = ?self.interval, "Deferred backup started");
    }
}

#[async_trait]
impl BackupCreator for AsyncBackup {
    async fn create(&self) -> Result<(), BackupError> {
        self.inner.mark_dirty();
        Ok(())
    }

    async fn stop(&self) -> Result<(), BackupError> {
        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            let _ = worker.stop.send(true);
            if let Err(e) = worker.handle.await {
                error!(error = %e, "Backup worker panicked");
            }
        }

        // unconditional: Dirty or Idle -> flush -> Idle
        self.inner.take_dirty();
        let result = self.inner.flush().await;
        match &result {
            Ok(()) => info!("Backup stopped"),
            Err(e) => error!(error = %e, "Failed to write snapshot while stopping"),
        }
        result
    }
}
