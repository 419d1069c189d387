//! Client configuration: serde-deserializable sections, an environment loader, and
//! resolution of unset or invalid values to defaults.
//!
//! A zero (or empty) value means "unset". Resolution replaces every unset or invalid
//! value with its default and reports an init warning through the client's
//! [`Instrumentation`], so a misconfigured client still works and says so.
//!
//! ```rust
//! use std::time::Duration;
//! use steadyhttp::{ClientConfig, RetryConfig};
//!
//! let config: ClientConfig = serde_json::from_str(
//!     r#"{ "name": "billing", "timeout": 2500, "retries": { "max_attempts": 4 } }"#,
//! )
//! .unwrap();
//! assert_eq!(config.timeout, Duration::from_millis(2500));
//! assert_eq!(config.retries.map(|r| r.max_attempts), Some(4));
//! ```

use crate::backoff::Backoff;
use crate::circuit_breaker::BreakerSettings;
use crate::coalesce::KeyFn;
use crate::instrumentation::Instrumentation;
use serde::Deserialize;
use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(3);
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(1);
pub const DEFAULT_MAX_ATTEMPTS: usize = 3;
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(10);
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(1);
pub const DEFAULT_ERROR_PERCENT_THRESHOLD: u32 = 80;
pub const DEFAULT_MAX_CONCURRENT_REQUESTS: usize = 10;
pub const DEFAULT_REQUEST_VOLUME_THRESHOLD: u64 = 20;
pub const DEFAULT_SLEEP_WINDOW: Duration = Duration::from_secs(5);
pub const DEFAULT_ROLLING_WINDOW: Duration = Duration::from_secs(10);
pub const DEFAULT_HALF_OPEN_MAX_CALLS: usize = 1;

/// Error-rate thresholds at or below this are rejected.
pub const ERROR_PERCENT_FLOOR: u32 = 50;

/// Top-level client configuration. Durations are given in milliseconds.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Unique, informative client name; also names the circuit breaker.
    pub name: String,
    /// Overall per-attempt timeout, connection included.
    #[serde(deserialize_with = "duration_ms::deserialize")]
    pub timeout: Duration,
    /// Connect-phase timeout. Should be lower than `timeout`.
    #[serde(deserialize_with = "duration_ms::deserialize")]
    pub connect_timeout: Duration,
    /// Retry layer; `None` disables retries.
    pub retries: Option<RetryConfig>,
    /// Circuit breaker; `None` disables it.
    pub circuit_breaker: Option<CircuitBreakerConfig>,
    /// Request coalescing; `None` disables it.
    pub coalescing: Option<CoalescingConfig>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts, initial call included.
    pub max_attempts: usize,
    #[serde(deserialize_with = "duration_ms::deserialize")]
    pub base_delay: Duration,
    #[serde(deserialize_with = "duration_ms::deserialize")]
    pub max_delay: Duration,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Error percentage that opens the circuit. Must be above 50 and at most 100.
    pub error_percent_threshold: u32,
    pub max_concurrent_requests: usize,
    /// Minimum outcomes in the rolling window before the error rate is evaluated.
    pub request_volume_threshold: u64,
    /// How long the circuit stays open before admitting a trial call.
    #[serde(deserialize_with = "duration_ms::deserialize")]
    pub sleep_window: Duration,
    #[serde(deserialize_with = "duration_ms::deserialize")]
    pub rolling_window: Duration,
    pub half_open_max_calls: usize,
    /// Breaker-level timeout around the whole retry sequence; unbounded when `None`.
    #[serde(deserialize_with = "duration_ms::deserialize_opt")]
    pub timeout: Option<Duration>,
}

/// Coalescing section. Its presence enables coalescing of safe methods; a key
/// function (code only) extends it to every method.
#[derive(Clone, Default, Deserialize)]
#[serde(default)]
pub struct CoalescingConfig {
    #[serde(skip)]
    pub key_fn: Option<KeyFn>,
}

impl CoalescingConfig {
    pub fn with_key_fn<F>(key_fn: F) -> Self
    where
        F: Fn(&crate::HttpRequest) -> String + Send + Sync + 'static,
    {
        Self { key_fn: Some(std::sync::Arc::new(key_fn)) }
    }
}

impl fmt::Debug for CoalescingConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CoalescingConfig")
            .field("key_fn", &self.key_fn.as_ref().map(|_| "<custom>"))
            .finish()
    }
}

impl ClientConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), ..Self::default() }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_retries(mut self, retries: RetryConfig) -> Self {
        self.retries = Some(retries);
        self
    }

    pub fn with_circuit_breaker(mut self, breaker: CircuitBreakerConfig) -> Self {
        self.circuit_breaker = Some(breaker);
        self
    }

    pub fn with_coalescing(mut self, coalescing: CoalescingConfig) -> Self {
        self.coalescing = Some(coalescing);
        self
    }

    /// Load from process environment variables named `<PREFIX>_...`.
    pub fn from_env(prefix: &str) -> Self {
        Self::from_lookup(prefix, |key| std::env::var(key).ok())
    }

    /// Load through an arbitrary lookup, e.g. a map in tests.
    ///
    /// Unparseable values are logged and left unset, so resolution later applies the
    /// default and reports it.
    pub fn from_lookup<F>(prefix: &str, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = EnvReader { prefix, lookup: &lookup };
        let mut config = ClientConfig {
            name: env.raw("NAME").unwrap_or_default(),
            timeout: env.millis("TIMEOUT_MS").unwrap_or_default(),
            connect_timeout: env.millis("CONNECT_TIMEOUT_MS").unwrap_or_default(),
            ..ClientConfig::default()
        };

        if env.any(&["RETRY_MAX_ATTEMPTS", "RETRY_BASE_DELAY_MS", "RETRY_MAX_DELAY_MS"]) {
            config.retries = Some(RetryConfig {
                max_attempts: env.number("RETRY_MAX_ATTEMPTS").unwrap_or_default(),
                base_delay: env.millis("RETRY_BASE_DELAY_MS").unwrap_or_default(),
                max_delay: env.millis("RETRY_MAX_DELAY_MS").unwrap_or_default(),
            });
        }

        if env.any(&["CB_ERROR_PERCENT", "CB_MAX_CONCURRENT", "CB_REQUEST_VOLUME", "CB_SLEEP_WINDOW_MS"]) {
            config.circuit_breaker = Some(CircuitBreakerConfig {
                error_percent_threshold: env.number("CB_ERROR_PERCENT").unwrap_or_default(),
                max_concurrent_requests: env.number("CB_MAX_CONCURRENT").unwrap_or_default(),
                request_volume_threshold: env.number("CB_REQUEST_VOLUME").unwrap_or_default(),
                sleep_window: env.millis("CB_SLEEP_WINDOW_MS").unwrap_or_default(),
                ..CircuitBreakerConfig::default()
            });
        }

        if env.number::<bool>("COALESCING").unwrap_or(false) {
            config.coalescing = Some(CoalescingConfig::default());
        }
        config
    }

    /// Apply defaults, reporting every substitution as an init warning.
    pub(crate) fn resolve(&self, instrumentation: &dyn Instrumentation) -> ResolvedConfig {
        let warn = |message: &str| instrumentation.init_warning(message);

        let name = if self.name.is_empty() {
            warn("name was not supplied; use of unique and informative names is strongly recommended");
            generated_name()
        } else {
            self.name.clone()
        };

        let timeout = or_default(self.timeout, DEFAULT_TIMEOUT, "using default 'timeout' setting", &warn);
        let connect_timeout = or_default(
            self.connect_timeout,
            DEFAULT_CONNECT_TIMEOUT,
            "using default 'connect timeout' setting",
            &warn,
        );
        if connect_timeout >= timeout {
            warn("connect timeout should be lower than timeout; connect timeouts cannot be told apart");
        }

        let retry = self.retries.as_ref().map(|retries| resolve_retries(retries, &warn));

        let breaker = match &self.circuit_breaker {
            Some(breaker) => Some(resolve_breaker(breaker, &warn)),
            None => {
                warn("no circuit breaker has been configured; use is strongly recommended");
                None
            }
        };

        let coalescing = match &self.coalescing {
            Some(coalescing) => Some(coalescing.key_fn.clone()),
            None => {
                warn("no request coalescing has been configured; use is strongly recommended for all read requests");
                None
            }
        };

        ResolvedConfig { name, timeout, connect_timeout, retry, breaker, coalescing }
    }
}

/// Fully-defaulted settings the client is built from.
pub(crate) struct ResolvedConfig {
    pub name: String,
    pub timeout: Duration,
    pub connect_timeout: Duration,
    pub retry: Option<ResolvedRetry>,
    pub breaker: Option<BreakerSettings>,
    /// `Some` when coalescing is enabled, carrying the optional custom key function.
    pub coalescing: Option<Option<KeyFn>>,
}

pub(crate) struct ResolvedRetry {
    pub max_attempts: usize,
    pub backoff: Backoff,
}

fn resolve_retries(retries: &RetryConfig, warn: &dyn Fn(&str)) -> ResolvedRetry {
    let max_attempts = if retries.max_attempts == 0 {
        warn("using default 'max attempts' setting for retries");
        DEFAULT_MAX_ATTEMPTS
    } else {
        retries.max_attempts
    };
    let base = or_default(retries.base_delay, DEFAULT_BASE_DELAY, "using default 'base retry delay' setting for retries", warn);
    let mut max = or_default(retries.max_delay, DEFAULT_MAX_DELAY, "using default 'max retry delay' setting for retries", warn);
    if max < base {
        warn("'max retry delay' is lower than 'base retry delay'; using the base delay as the cap");
        max = base;
    }
    ResolvedRetry { max_attempts, backoff: Backoff::exponential(base, max).unwrap_or_default() }
}

fn resolve_breaker(config: &CircuitBreakerConfig, warn: &dyn Fn(&str)) -> BreakerSettings {
    let percent = match config.error_percent_threshold {
        0 => {
            warn("using default 'error percent threshold' setting for the circuit breaker");
            DEFAULT_ERROR_PERCENT_THRESHOLD
        }
        p if p <= ERROR_PERCENT_FLOOR || p > 100 => {
            warn(&format!(
                "'error percent threshold' of {p} is outside ({ERROR_PERCENT_FLOOR}, 100]; using the default"
            ));
            DEFAULT_ERROR_PERCENT_THRESHOLD
        }
        p => p,
    };
    let max_concurrent = nonzero_or_default(
        config.max_concurrent_requests,
        DEFAULT_MAX_CONCURRENT_REQUESTS,
        "using default 'max concurrent requests' setting for the circuit breaker",
        warn,
    );
    let volume = if config.request_volume_threshold == 0 {
        warn("using default 'request volume threshold' setting for the circuit breaker");
        DEFAULT_REQUEST_VOLUME_THRESHOLD
    } else {
        config.request_volume_threshold
    };
    let sleep_window = or_default(
        config.sleep_window,
        DEFAULT_SLEEP_WINDOW,
        "using default 'sleep window' setting for the circuit breaker",
        warn,
    );
    let rolling_window = or_default(
        config.rolling_window,
        DEFAULT_ROLLING_WINDOW,
        "using default 'rolling window' setting for the circuit breaker",
        warn,
    );
    let half_open = nonzero_or_default(
        config.half_open_max_calls,
        DEFAULT_HALF_OPEN_MAX_CALLS,
        "using default 'half-open max calls' setting for the circuit breaker",
        warn,
    );

    BreakerSettings::default()
        .with_error_percent_threshold(u8::try_from(percent).unwrap_or(80))
        .with_max_concurrent_requests(max_concurrent)
        .with_request_volume_threshold(volume)
        .with_sleep_window(sleep_window)
        .with_rolling_window(rolling_window)
        .with_half_open_max_calls(half_open)
        .with_timeout(config.timeout.filter(|t| !t.is_zero()))
}

fn or_default(value: Duration, default: Duration, message: &str, warn: &dyn Fn(&str)) -> Duration {
    if value.is_zero() {
        warn(message);
        default
    } else {
        value
    }
}

fn nonzero_or_default(value: usize, default: usize, message: &str, warn: &dyn Fn(&str)) -> usize {
    if value == 0 {
        warn(message);
        default
    } else {
        value
    }
}

fn generated_name() -> String {
    let nanos = SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_nanos()).unwrap_or_default();
    format!("steadyhttp-{nanos}")
}

struct EnvReader<'a, F> {
    prefix: &'a str,
    lookup: &'a F,
}

impl<F> EnvReader<'_, F>
where
    F: Fn(&str) -> Option<String>,
{
    fn key(&self, suffix: &str) -> String {
        format!("{}_{}", self.prefix, suffix)
    }

    fn raw(&self, suffix: &str) -> Option<String> {
        (self.lookup)(&self.key(suffix)).map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
    }

    fn any(&self, suffixes: &[&str]) -> bool {
        suffixes.iter().any(|s| self.raw(s).is_some())
    }

    fn number<T: std::str::FromStr>(&self, suffix: &str) -> Option<T> {
        let raw = self.raw(suffix)?;
        match raw.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(
                    target: "steadyhttp::config",
                    variable = %self.key(suffix),
                    value = %raw,
                    "ignoring unparseable configuration value"
                );
                None
            }
        }
    }

    fn millis(&self, suffix: &str) -> Option<Duration> {
        self.number::<u64>(suffix).map(Duration::from_millis)
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }

    pub fn deserialize_opt<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        Option::<u64>::deserialize(deserializer).map(|ms| ms.map(Duration::from_millis))
    }
}
