//! Jitter strategies to prevent thundering herds of retries.
//!
//! - `None`: exact backoff delay; deterministic retries for tests.
//! - `Full`: uniform in `[0, delay]`.
//! - `Equal`: uniform in `[delay/2, delay]`; keeps a floor while adding randomness.
//!
//! RNG: `rand`'s thread-local RNG by default; deterministic RNGs can be injected via
//! [`Jitter::apply_with_rng`]. Millisecond conversions saturate to `u64::MAX`.

use rand::{rng, Rng};
use std::time::Duration;

/// Jitter strategy for randomizing retry delays.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Jitter {
    /// No jitter - use exact backoff delay
    None,
    /// Full jitter: random between 0 and delay
    Full,
    /// Equal jitter: random between delay/2 and delay
    #[default]
    Equal,
}

impl Jitter {
    pub fn full() -> Self {
        Jitter::Full
    }

    pub fn equal() -> Self {
        Jitter::Equal
    }

    /// Apply jitter to a delay duration. The result never exceeds `delay`.
    pub fn apply(&self, delay: Duration) -> Duration {
        let mut rng = rng();
        self.apply_with_rng(delay, &mut rng)
    }

    /// Apply jitter with a caller-supplied RNG.
    pub fn apply_with_rng<R: Rng>(&self, delay: Duration, rng: &mut R) -> Duration {
        let millis = as_millis_saturated(delay);
        match self {
            Jitter::None => delay,
            Jitter::Full if millis == 0 => Duration::ZERO,
            Jitter::Full => Duration::from_millis(rng.random_range(0..=millis)),
            Jitter::Equal if millis == 0 => Duration::ZERO,
            Jitter::Equal => Duration::from_millis(rng.random_range(millis / 2..=millis)),
        }
    }
}

fn as_millis_saturated(duration: Duration) -> u64 {
    duration.as_millis().try_into().unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn none_jitter_returns_exact_delay() {
        let delay = Duration::from_secs(1);
        assert_eq!(Jitter::None.apply(delay), delay);
    }

    #[test]
    fn full_jitter_is_between_zero_and_delay() {
        let delay = Duration::from_secs(1);
        for _ in 0..100 {
            assert!(Jitter::full().apply(delay) <= delay);
        }
    }

    #[test]
    fn equal_jitter_is_between_half_and_delay() {
        let delay = Duration::from_secs(1);
        for _ in 0..100 {
            let jittered = Jitter::equal().apply(delay);
            assert!(jittered <= delay);
            assert!(jittered >= Duration::from_millis(500));
        }
    }

    #[test]
    fn equal_jitter_with_deterministic_rng() {
        let mut rng = StdRng::seed_from_u64(42);
        let jittered = Jitter::equal().apply_with_rng(Duration::from_millis(1000), &mut rng);
        assert!(jittered >= Duration::from_millis(500));
        assert!(jittered <= Duration::from_millis(1000));
    }

    #[test]
    fn jitter_handles_zero_delay() {
        assert_eq!(Jitter::full().apply(Duration::ZERO), Duration::ZERO);
        assert_eq!(Jitter::equal().apply(Duration::ZERO), Duration::ZERO);
    }

    #[test]
    fn saturates_large_durations_without_panicking() {
        let huge = Duration::from_millis(u64::MAX);
        let mut rng = StdRng::seed_from_u64(999);
        assert!(Jitter::full().apply_with_rng(huge, &mut rng) <= huge);
    }
}
