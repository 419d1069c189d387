//! The wait between retry attempts.
//!
//! Retry backoff goes through [`Sleeper`] rather than calling `tokio::time::sleep`
//! directly, so tests can skip or record delays.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Future returned by [`Sleeper::sleep`].
pub type Sleep = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Waits out a backoff delay.
pub trait Sleeper: Send + Sync + std::fmt::Debug {
    fn sleep(&self, duration: Duration) -> Sleep;
}

/// Real timer on the tokio runtime. Used unless the client builder is given another.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioSleeper;

impl Sleeper for TokioSleeper {
    fn sleep(&self, duration: Duration) -> Sleep {
        Box::pin(tokio::time::sleep(duration))
    }
}

/// Completes immediately.
#[derive(Debug, Default, Clone, Copy)]
pub struct InstantSleeper;

impl Sleeper for InstantSleeper {
    fn sleep(&self, _duration: Duration) -> Sleep {
        Box::pin(std::future::ready(()))
    }
}

/// Completes immediately and remembers each requested delay, in order. Clones share
/// the record.
#[derive(Debug, Clone, Default)]
pub struct TrackingSleeper {
    delays: Arc<Mutex<Vec<Duration>>>,
}

impl TrackingSleeper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<Duration> {
        self.delays().clone()
    }

    pub fn call_at(&self, index: usize) -> Option<Duration> {
        self.delays().get(index).copied()
    }

    /// Sum of every recorded delay.
    pub fn total(&self) -> Duration {
        self.delays().iter().sum()
    }

    pub fn clear(&self) {
        self.delays().clear();
    }

    fn delays(&self) -> MutexGuard<'_, Vec<Duration>> {
        self.delays.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Sleeper for TrackingSleeper {
    fn sleep(&self, duration: Duration) -> Sleep {
        self.delays().push(duration);
        Box::pin(std::future::ready(()))
    }
}
