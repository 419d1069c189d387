//! Retry stage for outbound requests.
//!
//! Semantics:
//! - `max_attempts` counts total attempts (initial try + retries).
//! - Attempt 1 sends the caller's request; every later attempt sends an independent clone
//!   of a buffered template, so a consumed body never leaks into a retry.
//! - Statuses 408, 500, 503 and 504 and the ambiguous [`ClientError::Timeout`] are retried.
//!   A fixed list of 4xx/5xx statuses stops immediately (see [`classify_status`]); any
//!   other status is a success. Every other error is returned without retrying.
//! - Exhaustion returns the last outcome unchanged.
//! - Delays grow exponentially with jitter, never shrink between attempts of one call and
//!   never exceed the backoff cap.
//! - Cancellation or deadline expiry during a backoff sleep ends the loop at once.
//!
//! ```rust
//! use std::time::Duration;
//! use steadyhttp::{Backoff, InstantSleeper, Jitter, RetryPolicy};
//!
//! let policy = RetryPolicy::builder()
//!     .max_attempts(3)
//!     .backoff(Backoff::exponential(Duration::from_millis(10), Duration::from_secs(1)).unwrap())
//!     .with_jitter(Jitter::None)
//!     .with_sleeper(InstantSleeper)
//!     .build()
//!     .unwrap();
//! assert_eq!(policy.max_attempts(), 3);
//! ```

use crate::backoff::Backoff;
use crate::error::ClientError;
use crate::executor::reason_tag;
use crate::instrumentation::Instrumentation;
use crate::jitter::Jitter;
use crate::pipeline::{Next, Stage};
use crate::request::HttpRequest;
use crate::response::HttpResponse;
use crate::sleeper::{Sleeper, TokioSleeper};
use async_trait::async_trait;
use http::StatusCode;
use std::sync::Arc;
use std::time::Duration;

/// How the retry loop treats a response status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusClass {
    /// Stop and return the response.
    Success,
    /// Try again if attempts remain.
    Retriable,
    /// Stop and return the response; reported as non-retriable.
    NonRetriable,
}

/// Classify a response status for the retry loop.
pub fn classify_status(status: StatusCode) -> StatusClass {
    match status.as_u16() {
        408 | 500 | 503 | 504 => StatusClass::Retriable,
        400..=407 | 409..=418 | 421..=426 | 428 | 429 | 431 | 451 | 501 | 502 | 505..=508
        | 510 | 511 => StatusClass::NonRetriable,
        _ => StatusClass::Success,
    }
}

/// Attempt budget and delay schedule.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: usize,
    backoff: Backoff,
    jitter: Jitter,
    sleeper: Arc<dyn Sleeper>,
}

impl RetryPolicy {
    pub fn builder() -> RetryPolicyBuilder {
        RetryPolicyBuilder::new()
    }

    pub fn max_attempts(&self) -> usize {
        self.max_attempts
    }

    pub fn backoff(&self) -> &Backoff {
        &self.backoff
    }

    /// Delay before retry number `retry` (1-based), given the delay applied before the
    /// previous retry of the same call.
    pub fn next_delay(&self, retry: usize, previous: Duration) -> Duration {
        let jittered = self.jitter.apply(self.backoff.delay(retry));
        jittered.max(previous).min(self.backoff.max())
    }
}

/// Errors produced while building a retry policy.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RetryBuildError {
    /// `max_attempts` must be > 0.
    #[error("max_attempts must be > 0 (got {0})")]
    InvalidMaxAttempts(usize),
}

/// Builder for [`RetryPolicy`].
#[derive(Debug)]
pub struct RetryPolicyBuilder {
    max_attempts: usize,
    backoff: Backoff,
    jitter: Jitter,
    sleeper: Arc<dyn Sleeper>,
}

impl RetryPolicyBuilder {
    /// Defaults: 3 attempts, 10ms doubling up to 1s, equal jitter, tokio sleeper.
    pub fn new() -> Self {
        Self {
            max_attempts: 3,
            backoff: Backoff::default(),
            jitter: Jitter::Equal,
            sleeper: Arc::new(TokioSleeper),
        }
    }

    /// Set total attempts (initial + retries). Must be > 0.
    pub fn max_attempts(mut self, attempts: usize) -> Self {
        self.max_attempts = attempts;
        self
    }

    pub fn backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_jitter(mut self, jitter: Jitter) -> Self {
        self.jitter = jitter;
        self
    }

    /// Provide a custom sleeper implementation.
    pub fn with_sleeper<S>(mut self, sleeper: S) -> Self
    where
        S: Sleeper + 'static,
    {
        self.sleeper = Arc::new(sleeper);
        self
    }

    pub(crate) fn with_shared_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn build(self) -> Result<RetryPolicy, RetryBuildError> {
        if self.max_attempts == 0 {
            return Err(RetryBuildError::InvalidMaxAttempts(0));
        }
        Ok(RetryPolicy {
            max_attempts: self.max_attempts,
            backoff: self.backoff,
            jitter: self.jitter,
            sleeper: self.sleeper,
        })
    }
}

impl Default for RetryPolicyBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Pipeline stage running the downstream pipeline under a [`RetryPolicy`].
#[derive(Debug)]
pub struct RetryStage {
    policy: RetryPolicy,
    instrumentation: Arc<dyn Instrumentation>,
}

impl RetryStage {
    pub fn new(policy: RetryPolicy, instrumentation: Arc<dyn Instrumentation>) -> Self {
        Self { policy, instrumentation }
    }
}

#[async_trait]
impl Stage for RetryStage {
    fn name(&self) -> &'static str {
        "retry"
    }

    async fn execute(
        &self,
        mut request: HttpRequest,
        next: Next<'_>,
    ) -> Result<HttpResponse, ClientError> {
        if let Err(err) = request.buffer_body().await {
            self.instrumentation.base_do_err(&err, request.endpoint_tag(), reason_tag(&err));
            return Err(err);
        }
        let Some(template) = request.try_clone() else {
            return next.run(request).await;
        };

        let mut pending = Some(request);
        let mut previous_delay = Duration::ZERO;
        let mut attempt = 1;
        loop {
            let current = match pending.take() {
                Some(first) => first,
                None => {
                    if let Err(err) = template.context().check() {
                        self.instrumentation.base_do_err(&err, template.endpoint_tag(), reason_tag(&err));
                        return Err(err);
                    }
                    match template.try_clone() {
                        Some(copy) => copy,
                        None => return next.run(template).await,
                    }
                }
            };

            let result = next.run(current).await;
            match &result {
                Ok(response) => match classify_status(response.status()) {
                    StatusClass::Success => return result,
                    StatusClass::NonRetriable => {
                        self.instrumentation.retry_non_retriable(&template, response.status());
                        return result;
                    }
                    StatusClass::Retriable => {
                        self.instrumentation.retry_retriable(&template, Some(response.status()));
                    }
                },
                Err(ClientError::Timeout(_)) => self.instrumentation.retry_retriable(&template, None),
                Err(_) => return result,
            }

            if attempt >= self.policy.max_attempts {
                tracing::debug!(
                    target: "steadyhttp",
                    attempts = attempt,
                    endpoint = template.endpoint_tag(),
                    "retries exhausted; returning last outcome"
                );
                return result;
            }

            let delay = self.policy.next_delay(attempt, previous_delay);
            previous_delay = delay;
            tracing::debug!(
                target: "steadyhttp",
                attempt,
                delay_ms = delay.as_millis() as u64,
                endpoint = template.endpoint_tag(),
                "retrying request"
            );
            tokio::select! {
                biased;
                err = template.context().done() => {
                    self.instrumentation.base_do_err(&err, template.endpoint_tag(), reason_tag(&err));
                    return Err(err);
                }
                _ = self.policy.sleeper.sleep(delay) => {}
            }
            attempt += 1;
        }
    }
}
