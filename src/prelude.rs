//! Convenient re-exports for building and calling a client.
pub use crate::{
    config::{CircuitBreakerConfig, ClientConfig, CoalescingConfig, RetryConfig},
    error::{BuildError, ClientError},
    instrumentation::{Instrumentation, TracingInstrumentation},
    request::{Body, HttpRequest},
    response::HttpResponse,
    ClientBuilder, CircuitBreakerRegistry, PreparedClient,
};
