#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use http::{HeaderMap, Method, StatusCode};
use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use steadyhttp::{
    ClientBuilder, ClientConfig, ErrorSource, HttpRequest, HttpResponse, InstantSleeper, Jitter,
    MemoryInstrumentation, PreparedClient, Transport, TransportError,
};

/// One scripted outcome of a round trip.
#[derive(Debug, Clone)]
pub enum Reply {
    Status(u16),
    StatusAfter(u16, Duration),
    ConnectTimeout,
    Refused,
    Timeout,
    Hang,
}

/// A request as the transport saw it.
#[derive(Debug, Clone)]
pub struct Seen {
    pub method: Method,
    pub path: String,
    pub body: Bytes,
}

/// In-process transport replaying scripted replies; `Status(200)` once the script runs out.
#[derive(Debug, Default)]
pub struct ScriptedTransport {
    replies: Mutex<VecDeque<Reply>>,
    seen: Mutex<Vec<Seen>>,
}

impl ScriptedTransport {
    pub fn new(replies: impl IntoIterator<Item = Reply>) -> Arc<Self> {
        Arc::new(Self { replies: Mutex::new(replies.into_iter().collect()), seen: Mutex::default() })
    }

    pub fn calls(&self) -> usize {
        self.seen.lock().unwrap().len()
    }

    pub fn seen(&self) -> Vec<Seen> {
        self.seen.lock().unwrap().clone()
    }
}

fn source(what: &str) -> ErrorSource {
    Arc::new(io::Error::new(io::ErrorKind::Other, what.to_string()))
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let url = request.url().clone();
        let (method, _, _, body) = request.into_parts();
        self.seen.lock().unwrap().push(Seen { method, path: url.path().to_string(), body });
        let reply = self.replies.lock().unwrap().pop_front().unwrap_or(Reply::Status(200));

        let status = match reply {
            Reply::Status(code) => code,
            Reply::StatusAfter(code, delay) => {
                tokio::time::sleep(delay).await;
                code
            }
            Reply::ConnectTimeout => return Err(TransportError::ConnectTimeout(source("dial timeout"))),
            Reply::Refused => return Err(TransportError::Connect(source("connection refused"))),
            Reply::Timeout => return Err(TransportError::Timeout(source("read timeout"))),
            Reply::Hang => futures::future::pending().await,
        };
        let calls = self.seen.lock().unwrap().len();
        Ok(HttpResponse::new(
            StatusCode::from_u16(status).unwrap(),
            HeaderMap::new(),
            url,
            Bytes::from(format!("status {status} call {calls}")),
        ))
    }
}

/// Client over `transport` with instant, jitter-free backoff and recorded instrumentation.
pub fn scripted_client(
    config: ClientConfig,
    transport: Arc<ScriptedTransport>,
) -> (PreparedClient, MemoryInstrumentation) {
    let memory = MemoryInstrumentation::new();
    let client = ClientBuilder::new(config)
        .instrumentation(memory.clone())
        .shared_transport(transport)
        .sleeper(InstantSleeper)
        .jitter(Jitter::None)
        .build()
        .expect("client builds");
    (client, memory)
}

pub fn url(path: &str) -> url::Url {
    url::Url::parse("http://upstream.test").unwrap().join(path).unwrap()
}
