#![forbid(unsafe_code)]
#![cfg_attr(not(test), deny(clippy::all))]

//! # steadyhttp
//!
//! Resilient outbound HTTP for async Rust: request coalescing, circuit breaking, and
//! retry with backoff layered around a single HTTP call, with instrumentation at every
//! decision point.
//!
//! ## Pipeline
//!
//! Every request runs through a fixed order of optional stages:
//!
//! ```text
//! PreparedClient → coalesce → circuit breaker → retry → base executor → transport
//! ```
//!
//! - **Coalescing** shares one execution between concurrent identical requests (safe
//!   methods by default, any method with a custom key function).
//! - **Circuit breaker** rejects calls over the concurrency limit and fails fast while
//!   the error rate over the rolling window is too high. It sees the outcome of the whole
//!   retry sequence.
//! - **Retry** re-issues an independent copy of the request on retriable statuses and
//!   ambiguous timeouts, with capped exponential backoff.
//! - **Base executor** performs exactly one round trip and classifies its failure.
//!
//! A layer whose configuration section is absent is skipped.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use steadyhttp::{ClientConfig, HttpRequest, PreparedClient, RetryConfig, CircuitBreakerConfig};
//! use url::Url;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = PreparedClient::build(
//!         ClientConfig::new("catalog")
//!             .with_retries(RetryConfig::default())
//!             .with_circuit_breaker(CircuitBreakerConfig::default()),
//!     )?;
//!
//!     let response = client
//!         .execute(HttpRequest::get(Url::parse("http://catalog.internal/items/42")?))
//!         .await?;
//!     println!("{} {}", response.status(), response.text());
//!     Ok(())
//! }
//! ```

pub mod backoff;
pub mod bulkhead;
pub mod circuit_breaker;
pub mod circuit_breaker_registry;
pub mod client;
pub mod clock;
pub mod coalesce;
pub mod config;
pub mod error;
pub mod executor;
pub mod instrumentation;
pub mod jitter;
pub mod pipeline;
pub mod prelude;
pub mod request;
pub mod response;
pub mod retry;
pub mod sleeper;
pub mod transport;

// Re-exports
pub use backoff::{Backoff, BackoffError};
pub use bulkhead::ConcurrencyGate;
pub use circuit_breaker::{
    BreakerSettings, BreakerSnapshot, CallPermit, CircuitBreaker, CircuitBreakerError,
    CircuitBreakerStage, CircuitState, WindowCounts,
};
pub use circuit_breaker_registry::CircuitBreakerRegistry;
pub use client::{ClientBuilder, PreparedClient};
pub use clock::{Clock, ManualClock, MonotonicClock};
pub use coalesce::{CoalesceStage, KeyFn};
pub use config::{CircuitBreakerConfig, ClientConfig, CoalescingConfig, RetryConfig};
pub use error::{BuildError, ClientError, ErrorSource};
pub use executor::BaseExecutor;
pub use instrumentation::{
    Instrumentation, InstrumentationEvent, MemoryInstrumentation, NoopInstrumentation,
    TracingInstrumentation,
};
pub use jitter::Jitter;
pub use pipeline::{Next, Pipeline, Stage};
pub use request::{Body, HttpRequest, RequestContext};
pub use response::HttpResponse;
pub use retry::{RetryBuildError, RetryPolicy, RetryPolicyBuilder, RetryStage, StatusClass};
pub use sleeper::{InstantSleeper, Sleep, Sleeper, TokioSleeper, TrackingSleeper};
pub use transport::{ReqwestTransport, Transport, TransportError};
