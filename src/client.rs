//! Client facade: builds the pipeline once and runs every request through it.

use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerStage};
use crate::circuit_breaker_registry::CircuitBreakerRegistry;
use crate::coalesce::CoalesceStage;
use crate::config::ClientConfig;
use crate::error::{BuildError, ClientError};
use crate::executor::BaseExecutor;
use crate::instrumentation::{endpoint_tag, Instrumentation, NoopInstrumentation};
use crate::jitter::Jitter;
use crate::pipeline::{Pipeline, Stage};
use crate::request::HttpRequest;
use crate::response::HttpResponse;
use crate::retry::{RetryPolicy, RetryStage};
use crate::sleeper::{Sleeper, TokioSleeper};
use crate::transport::{ReqwestTransport, Transport};
use futures::future::BoxFuture;
use std::fmt;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Instant;

/// Assembles a [`PreparedClient`] from a [`ClientConfig`] plus optional collaborators.
///
/// ```rust
/// use steadyhttp::{ClientBuilder, ClientConfig, CircuitBreakerConfig, RetryConfig};
///
/// let client = ClientBuilder::new(
///     ClientConfig::new("inventory")
///         .with_retries(RetryConfig::default())
///         .with_circuit_breaker(CircuitBreakerConfig::default()),
/// )
/// .build()
/// .unwrap();
/// assert_eq!(client.name(), "inventory");
/// assert_eq!(client.stage_names(), vec!["circuit_breaker", "retry"]);
/// ```
pub struct ClientBuilder {
    config: ClientConfig,
    instrumentation: Arc<dyn Instrumentation>,
    registry: Option<CircuitBreakerRegistry>,
    transport: Option<Arc<dyn Transport>>,
    sleeper: Arc<dyn Sleeper>,
    jitter: Jitter,
}

impl fmt::Debug for ClientBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientBuilder")
            .field("config", &self.config)
            .field("instrumentation", &self.instrumentation)
            .field("transport", &self.transport)
            .field("jitter", &self.jitter)
            .finish()
    }
}

impl ClientBuilder {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            instrumentation: Arc::new(NoopInstrumentation),
            registry: None,
            transport: None,
            sleeper: Arc::new(TokioSleeper),
            jitter: Jitter::Equal,
        }
    }

    pub fn instrumentation<I>(self, instrumentation: I) -> Self
    where
        I: Instrumentation + 'static,
    {
        self.shared_instrumentation(Arc::new(instrumentation))
    }

    pub fn shared_instrumentation(mut self, instrumentation: Arc<dyn Instrumentation>) -> Self {
        self.instrumentation = instrumentation;
        self
    }

    /// Share circuit breakers with other clients built from the same registry.
    pub fn registry(mut self, registry: CircuitBreakerRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Replace the default `reqwest` transport.
    pub fn transport<T>(mut self, transport: T) -> Self
    where
        T: Transport + 'static,
    {
        self.transport = Some(Arc::new(transport));
        self
    }

    pub fn shared_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Sleeper used for retry backoff.
    pub fn sleeper<S>(mut self, sleeper: S) -> Self
    where
        S: Sleeper + 'static,
    {
        self.sleeper = Arc::new(sleeper);
        self
    }

    pub fn jitter(mut self, jitter: Jitter) -> Self {
        self.jitter = jitter;
        self
    }

    /// Resolve defaults, build the transport, and assemble the stage list
    /// (coalescing, then circuit breaker, then retry).
    pub fn build(self) -> Result<PreparedClient, BuildError> {
        let instrumentation = self.instrumentation;
        let resolved = self.config.resolve(instrumentation.as_ref());
        instrumentation.init(&resolved.name);

        let transport: Arc<dyn Transport> = match self.transport {
            Some(transport) => transport,
            None => Arc::new(ReqwestTransport::new(resolved.timeout, resolved.connect_timeout)?),
        };
        let registry = self.registry.unwrap_or_default();

        let mut stages: Vec<Arc<dyn Stage>> = Vec::new();
        if let Some(key_fn) = resolved.coalescing {
            stages.push(Arc::new(CoalesceStage::new(key_fn, instrumentation.clone())));
        }
        let breaker = match resolved.breaker {
            Some(settings) => {
                let breaker = registry.get_or_create(&resolved.name, &settings)?;
                stages.push(Arc::new(CircuitBreakerStage::new(breaker.clone(), instrumentation.clone())));
                Some(breaker)
            }
            None => None,
        };
        if let Some(retry) = resolved.retry {
            let policy = RetryPolicy::builder()
                .max_attempts(retry.max_attempts)
                .backoff(retry.backoff)
                .with_jitter(self.jitter)
                .with_shared_sleeper(self.sleeper)
                .build()?;
            stages.push(Arc::new(RetryStage::new(policy, instrumentation.clone())));
        }

        let pipeline = Pipeline::new(stages, BaseExecutor::new(transport, instrumentation.clone()));
        tracing::debug!(
            target: "steadyhttp",
            client = %resolved.name,
            stages = ?pipeline.stage_names(),
            "client built"
        );
        Ok(PreparedClient {
            inner: Arc::new(ClientInner {
                name: resolved.name,
                pipeline,
                instrumentation,
                registry,
                breaker,
            }),
        })
    }
}

#[derive(Debug)]
struct ClientInner {
    name: String,
    pipeline: Pipeline,
    instrumentation: Arc<dyn Instrumentation>,
    registry: CircuitBreakerRegistry,
    breaker: Option<Arc<CircuitBreaker>>,
}

/// Ready-to-use client. Cheap to clone; clones share the pipeline, breaker, and
/// coalescing groups.
#[derive(Debug, Clone)]
pub struct PreparedClient {
    inner: Arc<ClientInner>,
}

impl PreparedClient {
    /// Shorthand for `ClientBuilder::new(config).build()`.
    pub fn build(config: ClientConfig) -> Result<Self, BuildError> {
        ClientBuilder::new(config).build()
    }

    pub fn builder(config: ClientConfig) -> ClientBuilder {
        ClientBuilder::new(config)
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// This client's circuit breaker, if one is configured.
    pub fn breaker(&self) -> Option<&Arc<CircuitBreaker>> {
        self.inner.breaker.as_ref()
    }

    pub fn registry(&self) -> &CircuitBreakerRegistry {
        &self.inner.registry
    }

    /// Stage names, outermost first.
    pub fn stage_names(&self) -> Vec<&'static str> {
        self.inner.pipeline.stage_names()
    }

    /// Send `request` through the pipeline. The total duration, retries included, is
    /// reported whatever the outcome, even when the returned future is dropped.
    pub async fn execute(&self, mut request: HttpRequest) -> Result<HttpResponse, ClientError> {
        let instrumentation = &self.inner.instrumentation;
        let path = instrumentation.sanitize_path(request.url().path());
        let tag: Arc<str> = Arc::from(endpoint_tag(request.method(), &path));
        request.endpoint_tag = Some(tag.clone());

        let _report = DurationReport { start: Instant::now(), tag, instrumentation: instrumentation.as_ref() };
        self.inner.pipeline.execute(request).await
    }
}

struct DurationReport<'a> {
    start: Instant,
    tag: Arc<str>,
    instrumentation: &'a dyn Instrumentation,
}

impl Drop for DurationReport<'_> {
    fn drop(&mut self) {
        self.instrumentation.do_duration(self.start, &self.tag);
    }
}

impl tower_service::Service<HttpRequest> for PreparedClient {
    type Response = HttpResponse;
    type Error = ClientError;
    type Future = BoxFuture<'static, Result<HttpResponse, ClientError>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, request: HttpRequest) -> Self::Future {
        let client = self.clone();
        Box::pin(async move { client.execute(request).await })
    }
}
