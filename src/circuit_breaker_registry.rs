//! Registry of named circuit breakers.
//!
//! Every client looks up its breaker by name here at build time, so clients built from
//! the same registry with the same name share one breaker. The registry lives as long as
//! the clients holding it.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use crate::circuit_breaker::{BreakerSettings, BreakerSnapshot, CircuitBreaker, CircuitBreakerError};
use crate::clock::{Clock, MonotonicClock};
use tracing::warn;

/// In-memory registry backed by an `RwLock`. Clones share the same breakers.
#[derive(Clone, Debug)]
pub struct CircuitBreakerRegistry {
    inner: Arc<RwLock<HashMap<String, Arc<CircuitBreaker>>>>,
    clock: Arc<dyn Clock>,
}

impl Default for CircuitBreakerRegistry {
    fn default() -> Self {
        Self::with_clock(Arc::new(MonotonicClock::default()))
    }
}

impl CircuitBreakerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry whose breakers read time from `clock`.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self { inner: Arc::new(RwLock::new(HashMap::new())), clock }
    }

    /// Breaker registered under `name`, created on first use.
    ///
    /// Registering a name again with different settings replaces the breaker; the last
    /// registration wins and the old breaker's state is not carried over.
    pub fn get_or_create(
        &self,
        name: &str,
        settings: &BreakerSettings,
    ) -> Result<Arc<CircuitBreaker>, CircuitBreakerError> {
        if let Some(existing) = self.get(name) {
            if existing.settings() == settings {
                return Ok(existing);
            }
        }

        let mut map = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        match map.get(name) {
            Some(existing) if existing.settings() == settings => return Ok(existing.clone()),
            Some(_) => {
                warn!(
                    target: "steadyhttp::circuit_breaker_registry",
                    breaker = %name,
                    "circuit breaker settings replaced; last registration wins"
                );
            }
            None => {}
        }
        let breaker = Arc::new(CircuitBreaker::with_clock(name, settings.clone(), self.clock.clone())?);
        map.insert(name.to_string(), breaker.clone());
        Ok(breaker)
    }

    pub fn get(&self, name: &str) -> Option<Arc<CircuitBreaker>> {
        let map = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        map.get(name).cloned()
    }

    /// Snapshot of every breaker, sorted by name.
    pub fn snapshot(&self) -> Vec<BreakerSnapshot> {
        let map = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        let mut entries: Vec<BreakerSnapshot> = map.values().map(|b| b.snapshot()).collect();
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        entries
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
