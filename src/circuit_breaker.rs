//! Circuit breaker driven by the error rate over a rolling window.
//!
//! - `Closed`: calls pass. Each outcome lands in a bucket of the rolling window. Once the
//!   window holds at least `request_volume_threshold` outcomes and the error percentage
//!   reaches `error_percent_threshold`, the breaker opens.
//! - `Open`: calls are rejected with [`ClientError::CircuitOpen`] until `sleep_window`
//!   has elapsed since the opening.
//! - `HalfOpen`: up to `half_open_max_calls` trial calls pass. A successful trial closes
//!   the breaker and clears the window; a failed one reopens it and restarts the timer.
//!
//! All breaker state sits behind one mutex, so transitions and window updates are
//! observed atomically by concurrent callers.

use crate::bulkhead::ConcurrencyGate;
use crate::clock::{Clock, MonotonicClock};
use crate::error::ClientError;
use crate::executor::reason_tag;
use crate::instrumentation::Instrumentation;
use crate::pipeline::{Next, Stage};
use crate::request::HttpRequest;
use crate::response::HttpResponse;
use async_trait::async_trait;
use http::StatusCode;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

const BUCKETS: usize = 10;

/// Current state of the circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Normal operating mode.
    Closed,
    /// Short-circuits calls until the sleep window elapses.
    Open,
    /// Probe mode allowing a limited number of calls to test recovery.
    HalfOpen,
}

/// Validated breaker and concurrency-gate settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BreakerSettings {
    error_percent_threshold: u8,
    request_volume_threshold: u64,
    sleep_window: Duration,
    rolling_window: Duration,
    half_open_max_calls: usize,
    max_concurrent_requests: usize,
    timeout: Option<Duration>,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            error_percent_threshold: 80,
            request_volume_threshold: 20,
            sleep_window: Duration::from_secs(5),
            rolling_window: Duration::from_secs(10),
            half_open_max_calls: 1,
            max_concurrent_requests: 10,
            timeout: None,
        }
    }
}

/// Errors produced when validating breaker settings.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CircuitBreakerError {
    #[error("error_percent_threshold must be in 51..=100 (got {provided})")]
    InvalidErrorPercent { provided: u8 },
    #[error("request_volume_threshold must be > 0")]
    InvalidRequestVolume,
    #[error("sleep_window must be > 0")]
    InvalidSleepWindow,
    #[error("rolling_window must be > 0")]
    InvalidRollingWindow,
    #[error("half_open_max_calls must be > 0")]
    InvalidHalfOpenLimit,
    #[error("max_concurrent_requests must be > 0")]
    InvalidMaxConcurrent,
}

impl BreakerSettings {
    pub fn with_error_percent_threshold(mut self, percent: u8) -> Self {
        self.error_percent_threshold = percent;
        self
    }

    pub fn with_request_volume_threshold(mut self, volume: u64) -> Self {
        self.request_volume_threshold = volume;
        self
    }

    pub fn with_sleep_window(mut self, window: Duration) -> Self {
        self.sleep_window = window;
        self
    }

    pub fn with_rolling_window(mut self, window: Duration) -> Self {
        self.rolling_window = window;
        self
    }

    pub fn with_half_open_max_calls(mut self, calls: usize) -> Self {
        self.half_open_max_calls = calls;
        self
    }

    pub fn with_max_concurrent_requests(mut self, max: usize) -> Self {
        self.max_concurrent_requests = max;
        self
    }

    /// Per-call timeout enforced by the breaker stage. `None` means unbounded.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn error_percent_threshold(&self) -> u8 {
        self.error_percent_threshold
    }

    pub fn request_volume_threshold(&self) -> u64 {
        self.request_volume_threshold
    }

    pub fn sleep_window(&self) -> Duration {
        self.sleep_window
    }

    pub fn rolling_window(&self) -> Duration {
        self.rolling_window
    }

    pub fn half_open_max_calls(&self) -> usize {
        self.half_open_max_calls
    }

    pub fn max_concurrent_requests(&self) -> usize {
        self.max_concurrent_requests
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn validate(&self) -> Result<(), CircuitBreakerError> {
        if !(51..=100).contains(&self.error_percent_threshold) {
            return Err(CircuitBreakerError::InvalidErrorPercent {
                provided: self.error_percent_threshold,
            });
        }
        if self.request_volume_threshold == 0 {
            return Err(CircuitBreakerError::InvalidRequestVolume);
        }
        if self.sleep_window.is_zero() {
            return Err(CircuitBreakerError::InvalidSleepWindow);
        }
        if self.rolling_window.is_zero() {
            return Err(CircuitBreakerError::InvalidRollingWindow);
        }
        if self.half_open_max_calls == 0 {
            return Err(CircuitBreakerError::InvalidHalfOpenLimit);
        }
        if self.max_concurrent_requests == 0 {
            return Err(CircuitBreakerError::InvalidMaxConcurrent);
        }
        Ok(())
    }
}

/// Outcome totals currently inside the rolling window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WindowCounts {
    pub total: u64,
    pub failures: u64,
}

impl WindowCounts {
    /// Rounded error percentage; 0 for an empty window.
    pub fn error_percent(&self) -> u64 {
        if self.total == 0 {
            return 0;
        }
        (self.failures * 100 + self.total / 2) / self.total
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Bucket {
    epoch: u64,
    successes: u64,
    failures: u64,
}

#[derive(Debug)]
struct RollingWindow {
    buckets: Vec<Bucket>,
    width_millis: u64,
}

impl RollingWindow {
    fn new(window: Duration) -> Self {
        let window_millis = u64::try_from(window.as_millis()).unwrap_or(u64::MAX);
        Self {
            buckets: vec![Bucket::default(); BUCKETS],
            width_millis: (window_millis / BUCKETS as u64).max(1),
        }
    }

    fn record(&mut self, now_millis: u64, success: bool) {
        let epoch = now_millis / self.width_millis;
        let bucket = &mut self.buckets[(epoch % BUCKETS as u64) as usize];
        if bucket.epoch != epoch {
            *bucket = Bucket { epoch, ..Bucket::default() };
        }
        if success {
            bucket.successes += 1;
        } else {
            bucket.failures += 1;
        }
    }

    fn counts(&self, now_millis: u64) -> WindowCounts {
        let epoch = now_millis / self.width_millis;
        self.buckets
            .iter()
            .filter(|b| b.epoch <= epoch && b.epoch + BUCKETS as u64 > epoch)
            .fold(WindowCounts::default(), |acc, b| WindowCounts {
                total: acc.total + b.successes + b.failures,
                failures: acc.failures + b.failures,
            })
    }

    fn clear(&mut self) {
        self.buckets.fill(Bucket::default());
    }
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    window: RollingWindow,
    opened_at_millis: u64,
    half_open_in_flight: usize,
}

/// Point-in-time view of one breaker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BreakerSnapshot {
    pub name: String,
    pub state: CircuitState,
    pub counts: WindowCounts,
}

/// Named circuit breaker. Shared between clients through a
/// [`CircuitBreakerRegistry`](crate::CircuitBreakerRegistry).
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    settings: BreakerSettings,
    clock: Arc<dyn Clock>,
    gate: ConcurrencyGate,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, settings: BreakerSettings) -> Result<Self, CircuitBreakerError> {
        Self::with_clock(name, settings, Arc::new(MonotonicClock::default()))
    }

    pub fn with_clock(
        name: impl Into<String>,
        settings: BreakerSettings,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, CircuitBreakerError> {
        settings.validate()?;
        let window = RollingWindow::new(settings.rolling_window);
        Ok(Self {
            name: name.into(),
            gate: ConcurrencyGate::new(settings.max_concurrent_requests),
            settings,
            clock,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                window,
                opened_at_millis: 0,
                half_open_in_flight: 0,
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn settings(&self) -> &BreakerSettings {
        &self.settings
    }

    /// Concurrency gate shared by every client using this breaker.
    pub fn gate(&self) -> &ConcurrencyGate {
        &self.gate
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    pub fn counts(&self) -> WindowCounts {
        let now = self.clock.now_millis();
        self.lock().window.counts(now)
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let now = self.clock.now_millis();
        let inner = self.lock();
        BreakerSnapshot { name: self.name.clone(), state: inner.state, counts: inner.window.counts(now) }
    }

    /// Admit one call or reject it with [`ClientError::CircuitOpen`]. The outcome must be
    /// reported through the returned permit; dropping it unreported leaves the window
    /// untouched.
    pub fn try_acquire(&self) -> Result<CallPermit<'_>, ClientError> {
        let now = self.clock.now_millis();
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed => Ok(CallPermit::new(self, false)),
            CircuitState::Open => {
                let open_for = now.saturating_sub(inner.opened_at_millis);
                if open_for >= duration_millis(self.settings.sleep_window) {
                    inner.state = CircuitState::HalfOpen;
                    inner.half_open_in_flight = 1;
                    tracing::info!(breaker = %self.name, "Circuit breaker → half-open");
                    Ok(CallPermit::new(self, true))
                } else {
                    Err(self.open_error(open_for))
                }
            }
            CircuitState::HalfOpen => {
                if inner.half_open_in_flight >= self.settings.half_open_max_calls {
                    let open_for = now.saturating_sub(inner.opened_at_millis);
                    return Err(self.open_error(open_for));
                }
                inner.half_open_in_flight += 1;
                tracing::debug!(
                    breaker = %self.name,
                    in_flight = inner.half_open_in_flight,
                    max = self.settings.half_open_max_calls,
                    "Circuit breaker: half-open trial request"
                );
                Ok(CallPermit::new(self, true))
            }
        }
    }

    fn open_error(&self, open_for_millis: u64) -> ClientError {
        ClientError::CircuitOpen {
            name: self.name.clone(),
            open_for: Duration::from_millis(open_for_millis),
        }
    }

    fn on_outcome(&self, trial: bool, success: bool) {
        let now = self.clock.now_millis();
        let mut inner = self.lock();

        if trial {
            inner.half_open_in_flight = inner.half_open_in_flight.saturating_sub(1);
            if inner.state != CircuitState::HalfOpen {
                return;
            }
            if success {
                inner.state = CircuitState::Closed;
                inner.window.clear();
                inner.opened_at_millis = 0;
                inner.half_open_in_flight = 0;
                tracing::info!(breaker = %self.name, "Circuit breaker → closed");
            } else {
                inner.state = CircuitState::Open;
                inner.opened_at_millis = now;
                tracing::warn!(breaker = %self.name, "Circuit breaker: trial failed → open");
            }
            return;
        }

        if inner.state != CircuitState::Closed {
            return;
        }
        inner.window.record(now, success);
        if success {
            return;
        }
        let counts = inner.window.counts(now);
        if counts.total >= self.settings.request_volume_threshold
            && counts.error_percent() >= u64::from(self.settings.error_percent_threshold)
        {
            inner.state = CircuitState::Open;
            inner.opened_at_millis = now;
            tracing::error!(
                breaker = %self.name,
                total = counts.total,
                failures = counts.failures,
                error_percent = counts.error_percent(),
                threshold = self.settings.error_percent_threshold,
                "Circuit breaker → open"
            );
        }
    }

    fn release_trial(&self) {
        let mut inner = self.lock();
        inner.half_open_in_flight = inner.half_open_in_flight.saturating_sub(1);
    }

    fn lock(&self) -> MutexGuard<'_, BreakerInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn duration_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Admission ticket for one call. Releases a half-open trial slot when dropped
/// without an outcome (e.g. the call was cancelled).
#[derive(Debug)]
#[must_use = "report the call outcome through the permit"]
pub struct CallPermit<'a> {
    breaker: &'a CircuitBreaker,
    trial: bool,
    settled: bool,
}

impl<'a> CallPermit<'a> {
    fn new(breaker: &'a CircuitBreaker, trial: bool) -> Self {
        Self { breaker, trial, settled: false }
    }

    /// True when this call is a half-open trial.
    pub fn is_trial(&self) -> bool {
        self.trial
    }

    pub fn success(mut self) {
        self.settled = true;
        self.breaker.on_outcome(self.trial, true);
    }

    pub fn failure(mut self) {
        self.settled = true;
        self.breaker.on_outcome(self.trial, false);
    }
}

impl Drop for CallPermit<'_> {
    fn drop(&mut self) {
        if !self.settled && self.trial {
            self.breaker.release_trial();
        }
    }
}

/// Statuses the breaker counts as failures even though the caller receives the response.
pub fn is_tracked_failure(status: StatusCode) -> bool {
    matches!(status.as_u16(), 408 | 429 | 500..=508 | 510 | 511)
}

/// Pipeline stage: concurrency gate, then breaker admission, then the rest of the
/// pipeline (optionally under the breaker's own timeout).
#[derive(Debug)]
pub struct CircuitBreakerStage {
    breaker: Arc<CircuitBreaker>,
    instrumentation: Arc<dyn Instrumentation>,
}

impl CircuitBreakerStage {
    pub fn new(breaker: Arc<CircuitBreaker>, instrumentation: Arc<dyn Instrumentation>) -> Self {
        Self { breaker, instrumentation }
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }
}

#[async_trait]
impl Stage for CircuitBreakerStage {
    fn name(&self) -> &'static str {
        "circuit_breaker"
    }

    async fn execute(&self, request: HttpRequest, next: Next<'_>) -> Result<HttpResponse, ClientError> {
        let gate = self.breaker.gate();
        let _slot = match gate.try_enter() {
            Ok(slot) => slot,
            Err(err) => {
                tracing::debug!(
                    breaker = %self.breaker.name(),
                    max = gate.max_concurrent(),
                    "concurrency limit reached; rejecting call"
                );
                self.instrumentation.base_do_err(&err, request.endpoint_tag(), reason_tag(&err));
                return Err(err);
            }
        };
        let permit = match self.breaker.try_acquire() {
            Ok(permit) => permit,
            Err(err) => {
                self.instrumentation.circuit_open(&request);
                return Err(err);
            }
        };

        let head = request.head();
        let result = match self.breaker.settings().timeout() {
            Some(limit) => match tokio::time::timeout(limit, next.run(request)).await {
                Ok(result) => result,
                Err(_) => Err(ClientError::CircuitTimeout { timeout: limit }),
            },
            None => next.run(request).await,
        };

        match &result {
            Ok(response) if is_tracked_failure(response.status()) => {
                self.instrumentation.circuit_tracked_status(&head, response.status());
                permit.failure();
            }
            Ok(_) => permit.success(),
            Err(err) if err.is_cancellation() => drop(permit),
            Err(_) => permit.failure(),
        }
        result
    }
}
