//! Outbound request rate limiting
//!
//! A counting semaphore shared by every task that talks to the collector.
//! Holding a [`SendPermit`] reserves one slot; dropping it frees the slot, so
//! the slot is returned on every exit path including errors.

use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

#[derive(Debug, Error)]
pub enum RateLimitError {
    #[error("rate limiter closed")]
    Closed,
}

/// Bounded concurrency gate for outbound sends
#[derive(Debug, Clone)]
pub struct RateLimiter {
    semaphore: Arc<Semaphore>,
    limit: usize,
}

/// One reserved outbound slot
#[derive(Debug)]
pub struct SendPermit {
    _permit: OwnedSemaphorePermit,
}

impl RateLimiter {
    /// A limit of zero is raised to one
    pub fn new(limit: usize) -> Self {
        let limit = limit.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(limit)),
            limit,
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Slots currently free
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Wait until a slot is free
    pub async fn acquire(&self) -> Result<SendPermit, RateLimitError> {
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| RateLimitError::Closed)?;
        Ok(SendPermit { _permit: permit })
    }

    /// Wake every waiter with an error; used on shutdown
    pub fn close(&self) {
        self.semaphore.close();
    }
}
