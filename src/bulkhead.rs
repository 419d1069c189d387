//! Concurrency gate in front of the circuit breaker.

use crate::error::ClientError;
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Rejects calls beyond `max_concurrent` simultaneous ones. Never queues.
#[derive(Debug, Clone)]
pub struct ConcurrencyGate {
    semaphore: Arc<Semaphore>,
    max_concurrent: usize,
}

impl ConcurrencyGate {
    pub fn new(max_concurrent: usize) -> Self {
        Self { semaphore: Arc::new(Semaphore::new(max_concurrent)), max_concurrent }
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    pub fn in_flight(&self) -> usize {
        self.max_concurrent.saturating_sub(self.semaphore.available_permits())
    }

    /// Take a slot, held until the returned permit is dropped.
    pub fn try_enter(&self) -> Result<OwnedSemaphorePermit, ClientError> {
        self.semaphore
            .clone()
            .try_acquire_owned()
            .map_err(|_| ClientError::ConcurrencyLimit { max: self.max_concurrent })
    }
}
