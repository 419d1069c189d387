//! Buffered HTTP response.

use bytes::Bytes;
use http::{HeaderMap, StatusCode};
use url::Url;

/// HTTP response with a fully buffered body.
///
/// Clones share the body bytes; every holder, including each caller of a coalesced
/// request, reads the complete body.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    status: StatusCode,
    headers: HeaderMap,
    url: Url,
    body: Bytes,
}

impl HttpResponse {
    pub fn new(status: StatusCode, headers: HeaderMap, url: Url, body: Bytes) -> Self {
        Self { status, headers, url, body }
    }

    /// Build a response from a `reqwest` response, reading its body to the end.
    pub(crate) async fn from_reqwest(response: reqwest::Response) -> Result<Self, reqwest::Error> {
        let status = response.status();
        let headers = response.headers().clone();
        let url = response.url().clone();
        let body = response.bytes().await?;
        Ok(Self { status, headers, url, body })
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Final URL after redirects.
    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Consume the response and return its body.
    pub fn into_body(self) -> Bytes {
        self.body
    }

    /// Body decoded as UTF-8, replacing invalid sequences.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}
