//! Outbound request type and its cancellation context.

use crate::error::ClientError;
use bytes::{Bytes, BytesMut};
use futures::stream::{BoxStream, StreamExt};
use http::{HeaderMap, Method};
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use url::Url;

/// Request body. A `Stream` body can be read exactly once; it is buffered into `Bytes`
/// before the first network attempt so every later attempt gets its own copy.
#[derive(Default)]
pub enum Body {
    /// No body.
    #[default]
    Empty,
    /// Fully buffered body; clones are cheap and independent.
    Bytes(Bytes),
    /// Once-readable streaming body.
    Stream(Mutex<BoxStream<'static, std::io::Result<Bytes>>>),
}

impl Body {
    /// Wrap a once-readable stream of chunks.
    pub fn stream<S>(stream: S) -> Self
    where
        S: futures::Stream<Item = std::io::Result<Bytes>> + Send + 'static,
    {
        Body::Stream(Mutex::new(stream.boxed()))
    }

    /// Buffered bytes, if the body is not a pending stream.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Body::Empty => Some(&[]),
            Body::Bytes(b) => Some(b),
            Body::Stream(_) => None,
        }
    }

    fn try_clone(&self) -> Option<Body> {
        match self {
            Body::Empty => Some(Body::Empty),
            Body::Bytes(b) => Some(Body::Bytes(b.clone())),
            Body::Stream(_) => None,
        }
    }
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Body::Empty => f.write_str("Empty"),
            Body::Bytes(b) => write!(f, "Bytes({} bytes)", b.len()),
            Body::Stream(_) => f.write_str("Stream(<pending>)"),
        }
    }
}

impl From<Bytes> for Body {
    fn from(bytes: Bytes) -> Self {
        Body::Bytes(bytes)
    }
}

impl From<Vec<u8>> for Body {
    fn from(bytes: Vec<u8>) -> Self {
        Body::Bytes(Bytes::from(bytes))
    }
}

impl From<String> for Body {
    fn from(text: String) -> Self {
        Body::Bytes(Bytes::from(text))
    }
}

impl From<&'static str> for Body {
    fn from(text: &'static str) -> Self {
        Body::Bytes(Bytes::from_static(text.as_bytes()))
    }
}

/// Caller-supplied cancellation and deadline, carried with the request through every
/// stage of the pipeline.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    cancel: Option<CancellationToken>,
    deadline: Option<Instant>,
}

impl RequestContext {
    /// Cancellation token, if one was attached.
    pub fn cancellation(&self) -> Option<&CancellationToken> {
        self.cancel.as_ref()
    }

    /// Deadline, if one was attached.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// The error a request with this context must fail with right now, if any.
    pub fn check(&self) -> Result<(), ClientError> {
        if self.cancel.as_ref().is_some_and(|t| t.is_cancelled()) {
            return Err(ClientError::Cancelled);
        }
        if self.deadline.is_some_and(|d| Instant::now() >= d) {
            return Err(ClientError::DeadlineExceeded);
        }
        Ok(())
    }

    /// Resolves once the request is cancelled or its deadline passes; pending forever
    /// when neither is set.
    pub async fn done(&self) -> ClientError {
        let cancelled = async {
            match &self.cancel {
                Some(token) => token.cancelled().await,
                None => futures::future::pending::<()>().await,
            }
        };
        let expired = async {
            match self.deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => futures::future::pending::<()>().await,
            }
        };
        tokio::select! {
            biased;
            _ = cancelled => ClientError::Cancelled,
            _ = expired => ClientError::DeadlineExceeded,
        }
    }
}

/// An outbound HTTP request.
#[derive(Debug)]
pub struct HttpRequest {
    method: Method,
    url: Url,
    headers: HeaderMap,
    body: Body,
    context: RequestContext,
    pub(crate) endpoint_tag: Option<Arc<str>>,
}

impl HttpRequest {
    /// New request with no headers and an empty body.
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            headers: HeaderMap::new(),
            body: Body::Empty,
            context: RequestContext::default(),
            endpoint_tag: None,
        }
    }

    /// Shorthand for a `GET` request.
    pub fn get(url: Url) -> Self {
        Self::new(Method::GET, url)
    }

    /// Shorthand for a `POST` request.
    pub fn post(url: Url) -> Self {
        Self::new(Method::POST, url)
    }

    /// Attach a body.
    pub fn with_body(mut self, body: impl Into<Body>) -> Self {
        self.body = body.into();
        self
    }

    /// Insert a header, replacing any previous value.
    pub fn with_header(mut self, name: http::HeaderName, value: http::HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Attach a cancellation token honored by every pipeline stage.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.context.cancel = Some(token);
        self
    }

    /// Attach an absolute deadline honored by every pipeline stage.
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.context.deadline = Some(deadline);
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    pub fn body(&self) -> &Body {
        &self.body
    }

    pub fn context(&self) -> &RequestContext {
        &self.context
    }

    /// Telemetry tag stamped by the client facade (`METHOD::sanitized-path`).
    pub fn endpoint_tag(&self) -> &str {
        self.endpoint_tag.as_deref().unwrap_or("")
    }

    /// Independent copy of this request, or `None` while the body is an unread stream.
    pub fn try_clone(&self) -> Option<HttpRequest> {
        Some(HttpRequest {
            method: self.method.clone(),
            url: self.url.clone(),
            headers: self.headers.clone(),
            body: self.body.try_clone()?,
            context: self.context.clone(),
            endpoint_tag: self.endpoint_tag.clone(),
        })
    }

    /// Copy of everything but the body, for reporting after the request was sent.
    pub(crate) fn head(&self) -> HttpRequest {
        HttpRequest {
            method: self.method.clone(),
            url: self.url.clone(),
            headers: self.headers.clone(),
            body: Body::Empty,
            context: self.context.clone(),
            endpoint_tag: self.endpoint_tag.clone(),
        }
    }

    /// Drain a streaming body into memory. No-op for buffered bodies.
    pub async fn buffer_body(&mut self) -> Result<(), ClientError> {
        let stream = match std::mem::take(&mut self.body) {
            Body::Stream(stream) => stream.into_inner().unwrap_or_else(PoisonError::into_inner),
            other => {
                self.body = other;
                return Ok(());
            }
        };
        self.body = Body::Bytes(collect(stream).await?);
        Ok(())
    }

    /// Split into the parts a transport needs. The body must already be buffered.
    pub fn into_parts(self) -> (Method, Url, HeaderMap, Bytes) {
        let body = match self.body {
            Body::Bytes(bytes) => bytes,
            Body::Empty | Body::Stream(_) => Bytes::new(),
        };
        (self.method, self.url, self.headers, body)
    }
}

async fn collect(mut stream: BoxStream<'static, std::io::Result<Bytes>>) -> Result<Bytes, ClientError> {
    let mut buf = BytesMut::new();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| ClientError::Body(Arc::new(e)))?;
        buf.extend_from_slice(&chunk);
    }
    Ok(buf.freeze())
}
