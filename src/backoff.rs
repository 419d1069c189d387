//! Capped exponential backoff for the retry layer.
//!
//! Attempt semantics: attempt `0` is the initial call (no delay); retries start at
//! `attempt = 1`, which waits `base`. Each further retry doubles the delay until it
//! reaches `max`.
//!
//! ```rust
//! use std::time::Duration;
//! use steadyhttp::Backoff;
//!
//! let backoff = Backoff::exponential(Duration::from_millis(10), Duration::from_millis(35)).unwrap();
//! assert_eq!(backoff.delay(0), Duration::ZERO);
//! assert_eq!(backoff.delay(1), Duration::from_millis(10));
//! assert_eq!(backoff.delay(2), Duration::from_millis(20));
//! assert_eq!(backoff.delay(3), Duration::from_millis(35)); // capped
//! ```
//!
//! Computations that would overflow saturate to `max`.

use std::fmt;
use std::time::Duration;

/// Errors returned by backoff configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackoffError {
    MaxMustBePositive,
    MaxLessThanBase { base: Duration, max: Duration },
}

impl fmt::Display for BackoffError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackoffError::MaxMustBePositive => write!(f, "max must be greater than zero"),
            BackoffError::MaxLessThanBase { base, max } => {
                write!(f, "max ({:?}) must be >= base ({:?})", max, base)
            }
        }
    }
}

impl std::error::Error for BackoffError {}

/// Exponential backoff `base * 2^(attempt-1)`, capped at `max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    base: Duration,
    max: Duration,
}

impl Default for Backoff {
    /// 10ms doubling up to 1s.
    fn default() -> Self {
        Self { base: Duration::from_millis(10), max: Duration::from_secs(1) }
    }
}

impl Backoff {
    /// Create a capped exponential backoff. Errors if `max` is zero or below `base`.
    pub fn exponential(base: Duration, max: Duration) -> Result<Self, BackoffError> {
        if max.is_zero() {
            return Err(BackoffError::MaxMustBePositive);
        }
        if max < base {
            return Err(BackoffError::MaxLessThanBase { base, max });
        }
        Ok(Self { base, max })
    }

    pub fn base(&self) -> Duration {
        self.base
    }

    pub fn max(&self) -> Duration {
        self.max
    }

    /// Delay before the given attempt (0-based; 0 = initial call, no delay).
    pub fn delay(&self, attempt: usize) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let exponent = attempt.saturating_sub(1).min(u32::MAX as usize) as u32;
        let multiplier = 2u128.saturating_pow(exponent);
        let nanos = self.base.as_nanos().saturating_mul(multiplier);
        if nanos >= self.max.as_nanos() {
            self.max
        } else {
            // nanos < max.as_nanos(), which fits in u64 for any sane cap
            Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
        }
    }
}
