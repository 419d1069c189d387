//! Error types for the request pipeline.
//!
//! `ClientError` is `Clone` so a coalesced group of callers can each receive the same
//! failure. Foreign error sources are therefore held behind an `Arc`.
use std::sync::Arc;
use std::time::Duration;

/// Shared, clonable handle to an underlying error source.
pub type ErrorSource = Arc<dyn std::error::Error + Send + Sync>;

/// Errors surfaced to callers of [`PreparedClient::execute`](crate::PreparedClient::execute).
#[derive(Debug, Clone, thiserror::Error)]
pub enum ClientError {
    /// The destination could not be reached within the connect timeout. The request was
    /// never delivered, so it cannot have been processed.
    #[error("connection timeout")]
    ConnectTimeout,
    /// Connecting to the destination failed for a reason other than a timeout.
    #[error("error initiating connection: {0}")]
    Connection(#[source] ErrorSource),
    /// Connected, but no complete response arrived before the overall timeout. The
    /// destination may have partially processed the request.
    #[error("timeout: {0}")]
    Timeout(#[source] ErrorSource),
    /// The request's cancellation token fired.
    #[error("request cancelled")]
    Cancelled,
    /// The request's deadline expired.
    #[error("request deadline exceeded")]
    DeadlineExceeded,
    /// The circuit breaker for this client is open.
    #[error("the circuit '{name}' is open")]
    CircuitOpen {
        /// Client (breaker) name.
        name: String,
        /// How long the circuit has been open.
        open_for: Duration,
    },
    /// More concurrent requests than the circuit allows are in flight.
    #[error("the circuit's max concurrency is reached ({max} in flight)")]
    ConcurrencyLimit {
        /// Configured concurrency cap.
        max: usize,
    },
    /// The circuit breaker's own per-call timeout elapsed.
    #[error("the circuit timed out the request after {timeout:?}")]
    CircuitTimeout {
        /// Configured breaker timeout.
        timeout: Duration,
    },
    /// The shared-result plumbing of request coalescing failed; the underlying call's
    /// outcome is unknown to this caller.
    #[error("request coalescing failed: {reason}")]
    Coalescing {
        /// What went wrong.
        reason: String,
    },
    /// Unclassified transport failure.
    #[error("transport error: {0}")]
    Transport(#[source] ErrorSource),
    /// The request body could not be read into memory.
    #[error("failed to read request body: {0}")]
    Body(#[source] ErrorSource),
}

impl ClientError {
    /// True for the ambiguous mid-request timeout (not the connect timeout).
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }

    /// True for connect-phase failures, timeout or otherwise.
    pub fn is_connect(&self) -> bool {
        matches!(self, Self::ConnectTimeout | Self::Connection(_))
    }

    /// True when the caller cancelled or the request deadline expired.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled | Self::DeadlineExceeded)
    }

    /// True when the circuit breaker rejected the call.
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, Self::CircuitOpen { .. })
    }

    /// True when the concurrency gate rejected the call.
    pub fn is_concurrency_limit(&self) -> bool {
        matches!(self, Self::ConcurrencyLimit { .. })
    }
}

/// Errors produced while building a [`PreparedClient`](crate::PreparedClient).
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    /// The underlying HTTP transport could not be constructed.
    #[error("failed to build HTTP transport: {0}")]
    Transport(#[source] reqwest::Error),
    /// Resolved circuit breaker settings were rejected.
    #[error("invalid circuit breaker settings: {0}")]
    CircuitBreaker(#[from] crate::circuit_breaker::CircuitBreakerError),
    /// Resolved retry settings were rejected.
    #[error("invalid retry settings: {0}")]
    Retry(#[from] crate::retry::RetryBuildError),
}
