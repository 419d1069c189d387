//! Instrumentation hooks for the request pipeline.
//!
//! Every stage reports its decisions through an [`Instrumentation`] implementation. All
//! methods default to no-ops so implementors only override what they record.
//!
//! Implementations shipped here:
//!
//! - [`NoopInstrumentation`]: used when the caller supplies nothing.
//! - [`TracingInstrumentation`]: structured `tracing` events, one per hook.
//! - [`MemoryInstrumentation`]: records [`InstrumentationEvent`]s in memory for tests
//!   and diagnostics.
//!
//! ```rust
//! use steadyhttp::instrumentation::{endpoint_tag, Instrumentation, NoopInstrumentation};
//!
//! let noop = NoopInstrumentation;
//! let path = noop.sanitize_path("/users/1234/orders");
//! assert_eq!(endpoint_tag(&http::Method::GET, &path), "GET::/users/:id/orders");
//! ```

use crate::error::ClientError;
use crate::request::HttpRequest;
use http::{Method, StatusCode};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Placeholder substituted for variable path segments.
pub const ID_PLACEHOLDER: &str = ":id";

/// Sink for pipeline telemetry.
pub trait Instrumentation: Send + Sync + fmt::Debug {
    /// Called once when a client is built.
    fn init(&self, _name: &str) {}

    /// Called while building a client whenever a default replaces a missing or
    /// invalid setting.
    fn init_warning(&self, _message: &str) {}

    /// Reduce a URL path to a low-cardinality form suitable for a metric tag.
    fn sanitize_path(&self, path: &str) -> String {
        sanitize_path(path)
    }

    /// Total time of one `execute` call, including every retry.
    fn do_duration(&self, _start: Instant, _endpoint_tag: &str) {}

    /// Time of a single network attempt. `status` is `None` when the attempt failed.
    fn base_do_duration(&self, _start: Instant, _status: Option<StatusCode>, _endpoint_tag: &str) {
    }

    /// A single network attempt failed; `reason` is a short classification tag.
    fn base_do_err(&self, _err: &ClientError, _endpoint_tag: &str, _reason: &str) {}

    /// The circuit breaker rejected a request.
    fn circuit_open(&self, _request: &HttpRequest) {}

    /// The circuit breaker counted a response status as a failure.
    fn circuit_tracked_status(&self, _request: &HttpRequest, _status: StatusCode) {}

    /// The retry layer stopped on a status it will not retry.
    fn retry_non_retriable(&self, _request: &HttpRequest, _status: StatusCode) {}

    /// The retry layer saw a retriable outcome. `status` is `None` for a timeout.
    fn retry_retriable(&self, _request: &HttpRequest, _status: Option<StatusCode>) {}

    /// The coalescing plumbing failed to deliver a shared result.
    fn coalesce_err(&self, _request: &HttpRequest, _err: &ClientError) {}
}

/// Build the telemetry tag for an endpoint: `METHOD::path`.
pub fn endpoint_tag(method: &Method, sanitized_path: &str) -> String {
    format!("{}::{}", method, sanitized_path)
}

/// Default path sanitizer: numeric, UUID-shaped, and long hexadecimal segments become
/// [`ID_PLACEHOLDER`].
pub fn sanitize_path(path: &str) -> String {
    path.split('/')
        .map(|segment| if is_variable_segment(segment) { ID_PLACEHOLDER } else { segment })
        .collect::<Vec<_>>()
        .join("/")
}

fn is_variable_segment(segment: &str) -> bool {
    if segment.is_empty() {
        return false;
    }
    if segment.bytes().all(|b| b.is_ascii_digit()) {
        return true;
    }
    let hex_or_dash = segment.bytes().all(|b| b.is_ascii_hexdigit() || b == b'-');
    let digits = segment.bytes().filter(u8::is_ascii_digit).count();
    hex_or_dash && segment.len() >= 16 && digits > 0
}

/// Instrumentation that discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopInstrumentation;

impl Instrumentation for NoopInstrumentation {}

/// Instrumentation that emits one structured `tracing` event per hook.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingInstrumentation;

impl Instrumentation for TracingInstrumentation {
    fn init(&self, name: &str) {
        tracing::info!(target: "steadyhttp", client = name, "client initialized");
    }

    fn init_warning(&self, message: &str) {
        tracing::warn!(target: "steadyhttp", warning = message, "client init warning");
    }

    fn do_duration(&self, start: Instant, endpoint_tag: &str) {
        tracing::debug!(
            target: "steadyhttp",
            endpoint = endpoint_tag,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "request completed"
        );
    }

    fn base_do_duration(&self, start: Instant, status: Option<StatusCode>, endpoint_tag: &str) {
        tracing::debug!(
            target: "steadyhttp",
            endpoint = endpoint_tag,
            status = status.map(|s| s.as_u16()).unwrap_or(0),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "attempt completed"
        );
    }

    fn base_do_err(&self, err: &ClientError, endpoint_tag: &str, reason: &str) {
        tracing::warn!(target: "steadyhttp", endpoint = endpoint_tag, reason, error = %err, "attempt failed");
    }

    fn circuit_open(&self, request: &HttpRequest) {
        tracing::warn!(target: "steadyhttp", endpoint = request.endpoint_tag(), "circuit open, request rejected");
    }

    fn circuit_tracked_status(&self, request: &HttpRequest, status: StatusCode) {
        tracing::info!(
            target: "steadyhttp",
            endpoint = request.endpoint_tag(),
            status = status.as_u16(),
            "circuit tracked failure status"
        );
    }

    fn retry_non_retriable(&self, request: &HttpRequest, status: StatusCode) {
        tracing::debug!(
            target: "steadyhttp",
            endpoint = request.endpoint_tag(),
            status = status.as_u16(),
            "non-retriable status"
        );
    }

    fn retry_retriable(&self, request: &HttpRequest, status: Option<StatusCode>) {
        tracing::debug!(
            target: "steadyhttp",
            endpoint = request.endpoint_tag(),
            status = status.map(|s| s.as_u16()).unwrap_or(0),
            "retriable outcome"
        );
    }

    fn coalesce_err(&self, request: &HttpRequest, err: &ClientError) {
        tracing::error!(target: "steadyhttp", endpoint = request.endpoint_tag(), error = %err, "coalescing failed");
    }
}

/// Events captured by [`MemoryInstrumentation`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstrumentationEvent {
    Init { name: String },
    InitWarning { message: String },
    DoDuration { endpoint: String, elapsed: Duration },
    BaseDoDuration { endpoint: String, status: Option<StatusCode>, elapsed: Duration },
    BaseDoErr { endpoint: String, reason: String, error: String },
    CircuitOpen { endpoint: String },
    CircuitTrackedStatus { endpoint: String, status: StatusCode },
    RetryNonRetriable { endpoint: String, status: StatusCode },
    RetryRetriable { endpoint: String, status: Option<StatusCode> },
    CoalesceErr { endpoint: String, error: String },
}

impl fmt::Display for InstrumentationEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Init { name } => write!(f, "Init({})", name),
            Self::InitWarning { message } => write!(f, "InitWarning({})", message),
            Self::DoDuration { endpoint, elapsed } => {
                write!(f, "DoDuration({}, {:?})", endpoint, elapsed)
            }
            Self::BaseDoDuration { endpoint, status, elapsed } => {
                write!(f, "BaseDoDuration({}, status={:?}, {:?})", endpoint, status, elapsed)
            }
            Self::BaseDoErr { endpoint, reason, error } => {
                write!(f, "BaseDoErr({}, {}, {})", endpoint, reason, error)
            }
            Self::CircuitOpen { endpoint } => write!(f, "CircuitOpen({})", endpoint),
            Self::CircuitTrackedStatus { endpoint, status } => {
                write!(f, "CircuitTrackedStatus({}, {})", endpoint, status)
            }
            Self::RetryNonRetriable { endpoint, status } => {
                write!(f, "RetryNonRetriable({}, {})", endpoint, status)
            }
            Self::RetryRetriable { endpoint, status } => {
                write!(f, "RetryRetriable({}, {:?})", endpoint, status)
            }
            Self::CoalesceErr { endpoint, error } => write!(f, "CoalesceErr({}, {})", endpoint, error),
        }
    }
}

/// Instrumentation that stores events in memory, evicting the oldest past `capacity`.
#[derive(Clone, Debug)]
pub struct MemoryInstrumentation {
    events: Arc<Mutex<Vec<InstrumentationEvent>>>,
    capacity: usize,
    evicted: Arc<AtomicU64>,
}

impl MemoryInstrumentation {
    pub fn new() -> Self {
        Self::with_capacity(10_000)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            events: Arc::new(Mutex::new(Vec::new())),
            capacity: capacity.max(1),
            evicted: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Snapshot of recorded events, oldest first.
    pub fn events(&self) -> Vec<InstrumentationEvent> {
        self.lock().clone()
    }

    /// Number of recorded events matching `predicate`.
    pub fn count<F>(&self, predicate: F) -> usize
    where
        F: Fn(&InstrumentationEvent) -> bool,
    {
        self.lock().iter().filter(|e| predicate(e)).count()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn evicted(&self) -> u64 {
        self.evicted.load(Ordering::Relaxed)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<InstrumentationEvent>> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn push(&self, event: InstrumentationEvent) {
        let mut guard = self.lock();
        if guard.len() >= self.capacity {
            guard.remove(0);
            self.evicted.fetch_add(1, Ordering::Relaxed);
        }
        guard.push(event);
    }
}

impl Default for MemoryInstrumentation {
    fn default() -> Self {
        Self::new()
    }
}

impl Instrumentation for MemoryInstrumentation {
    fn init(&self, name: &str) {
        self.push(InstrumentationEvent::Init { name: name.to_string() });
    }

    fn init_warning(&self, message: &str) {
        self.push(InstrumentationEvent::InitWarning { message: message.to_string() });
    }

    fn do_duration(&self, start: Instant, endpoint_tag: &str) {
        self.push(InstrumentationEvent::DoDuration {
            endpoint: endpoint_tag.to_string(),
            elapsed: start.elapsed(),
        });
    }

    fn base_do_duration(&self, start: Instant, status: Option<StatusCode>, endpoint_tag: &str) {
        self.push(InstrumentationEvent::BaseDoDuration {
            endpoint: endpoint_tag.to_string(),
            status,
            elapsed: start.elapsed(),
        });
    }

    fn base_do_err(&self, err: &ClientError, endpoint_tag: &str, reason: &str) {
        self.push(InstrumentationEvent::BaseDoErr {
            endpoint: endpoint_tag.to_string(),
            reason: reason.to_string(),
            error: err.to_string(),
        });
    }

    fn circuit_open(&self, request: &HttpRequest) {
        self.push(InstrumentationEvent::CircuitOpen { endpoint: request.endpoint_tag().to_string() });
    }

    fn circuit_tracked_status(&self, request: &HttpRequest, status: StatusCode) {
        self.push(InstrumentationEvent::CircuitTrackedStatus {
            endpoint: request.endpoint_tag().to_string(),
            status,
        });
    }

    fn retry_non_retriable(&self, request: &HttpRequest, status: StatusCode) {
        self.push(InstrumentationEvent::RetryNonRetriable {
            endpoint: request.endpoint_tag().to_string(),
            status,
        });
    }

    fn retry_retriable(&self, request: &HttpRequest, status: Option<StatusCode>) {
        self.push(InstrumentationEvent::RetryRetriable {
            endpoint: request.endpoint_tag().to_string(),
            status,
        });
    }

    fn coalesce_err(&self, request: &HttpRequest, err: &ClientError) {
        self.push(InstrumentationEvent::CoalesceErr {
            endpoint: request.endpoint_tag().to_string(),
            error: err.to_string(),
        });
    }
}
