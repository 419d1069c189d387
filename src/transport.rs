//! The raw network round trip.
//!
//! [`Transport`] is the seam between the pipeline and the wire. [`ReqwestTransport`] is
//! the production implementation; tests plug in scripted transports.

use crate::error::{BuildError, ErrorSource};
use crate::request::HttpRequest;
use crate::response::HttpResponse;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Failure of a single round trip, classified by phase.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    /// The connect phase did not finish within the connect timeout.
    #[error("connect timed out: {0}")]
    ConnectTimeout(#[source] ErrorSource),
    /// The connect phase failed for another reason (refused, DNS, TLS, ...).
    #[error("connect failed: {0}")]
    Connect(#[source] ErrorSource),
    /// Connected, but the response did not complete within the overall timeout.
    #[error("request timed out: {0}")]
    Timeout(#[source] ErrorSource),
    /// Anything else.
    #[error("transport failure: {0}")]
    Other(#[source] ErrorSource),
}

/// Performs exactly one HTTP round trip. The request body is already buffered.
#[async_trait]
pub trait Transport: Send + Sync + fmt::Debug {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError>;
}

/// `reqwest`-backed transport with a connect timeout distinct from the overall timeout.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    /// Build a transport. `connect_timeout` should be shorter than `timeout`, otherwise
    /// connect timeouts surface as overall timeouts.
    pub fn new(timeout: Duration, connect_timeout: Duration) -> Result<Self, BuildError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(connect_timeout)
            .build()
            .map_err(BuildError::Transport)?;
        Ok(Self { client })
    }

    /// Wrap an existing `reqwest` client. Its timeouts are used as configured.
    pub fn from_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let (method, url, headers, body) = request.into_parts();
        let mut outbound = reqwest::Request::new(method, url);
        *outbound.headers_mut() = headers;
        if !body.is_empty() {
            *outbound.body_mut() = Some(reqwest::Body::from(body));
        }

        let response = self.client.execute(outbound).await.map_err(classify)?;
        HttpResponse::from_reqwest(response).await.map_err(classify)
    }
}

fn classify(err: reqwest::Error) -> TransportError {
    let connect = err.is_connect();
    let timeout = err.is_timeout();
    let source: ErrorSource = Arc::new(err);
    match (connect, timeout) {
        (true, true) => TransportError::ConnectTimeout(source),
        (true, false) => TransportError::Connect(source),
        (false, true) => TransportError::Timeout(source),
        (false, false) => TransportError::Other(source),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::Method;
    use url::Url;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn refused_connection_is_a_connect_error() {
        // Bind then drop to get a local port with nothing listening.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let transport =
            ReqwestTransport::new(Duration::from_secs(3), Duration::from_secs(1)).unwrap();
        let url = Url::parse(&format!("http://{}/", addr)).unwrap();
        let err = transport.send(HttpRequest::new(Method::GET, url)).await.unwrap_err();
        assert!(matches!(err, TransportError::Connect(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn wrapped_client_keeps_its_own_timeout() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/fast"))
            .respond_with(ResponseTemplate::new(200).set_body_string("pong"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/slow"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
            .mount(&server)
            .await;

        let client = reqwest::Client::builder().timeout(Duration::from_millis(100)).build().unwrap();
        let transport = ReqwestTransport::from_client(client);
        let base = Url::parse(&server.uri()).unwrap();

        let response = transport.send(HttpRequest::get(base.join("/fast").unwrap())).await.unwrap();
        assert_eq!(response.status().as_u16(), 200);
        assert_eq!(response.into_body(), bytes::Bytes::from_static(b"pong"));

        let err = transport.send(HttpRequest::get(base.join("/slow").unwrap())).await.unwrap_err();
        assert!(matches!(err, TransportError::Timeout(_)), "got {err:?}");
    }
}
