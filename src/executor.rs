//! Base executor: one network attempt, classified and reported.

use crate::error::ClientError;
use crate::instrumentation::Instrumentation;
use crate::request::HttpRequest;
use crate::response::HttpResponse;
use crate::transport::{Transport, TransportError};
use std::sync::Arc;
use std::time::Instant;

/// Terminal stage of every pipeline.
///
/// Classification of failures:
/// - connect-phase timeout → [`ClientError::ConnectTimeout`]
/// - other connect-phase failure → [`ClientError::Connection`]
/// - timeout after connecting → [`ClientError::Timeout`]
/// - request cancellation / deadline → [`ClientError::Cancelled`] /
///   [`ClientError::DeadlineExceeded`], passed through unwrapped
/// - anything else → [`ClientError::Transport`]
///
/// Duration and outcome are reported on every path before returning.
#[derive(Debug, Clone)]
pub struct BaseExecutor {
    transport: Arc<dyn Transport>,
    instrumentation: Arc<dyn Instrumentation>,
}

impl BaseExecutor {
    pub fn new(transport: Arc<dyn Transport>, instrumentation: Arc<dyn Instrumentation>) -> Self {
        Self { transport, instrumentation }
    }

    pub async fn execute(&self, mut request: HttpRequest) -> Result<HttpResponse, ClientError> {
        let start = Instant::now();
        let tag = request.endpoint_tag.clone();
        let tag = tag.as_deref().unwrap_or("");

        let result = match request.context().check() {
            Err(e) => Err(e),
            Ok(()) => match request.buffer_body().await {
                Err(e) => Err(e),
                Ok(()) => {
                    let context = request.context().clone();
                    tokio::select! {
                        biased;
                        err = context.done() => Err(err),
                        sent = self.transport.send(request) => sent.map_err(ClientError::from),
                    }
                }
            },
        };

        match &result {
            Ok(response) => {
                self.instrumentation.base_do_duration(start, Some(response.status()), tag);
            }
            Err(err) => {
                self.instrumentation.base_do_duration(start, None, tag);
                self.instrumentation.base_do_err(err, tag, reason_tag(err));
            }
        }
        result
    }
}

impl From<TransportError> for ClientError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::ConnectTimeout(_) => ClientError::ConnectTimeout,
            TransportError::Connect(source) => ClientError::Connection(source),
            TransportError::Timeout(source) => ClientError::Timeout(source),
            TransportError::Other(source) => ClientError::Transport(source),
        }
    }
}

/// Short classification tag reported alongside a failed attempt.
pub fn reason_tag(err: &ClientError) -> &'static str {
    match err {
        ClientError::ConnectTimeout => "connect_timeout",
        ClientError::Connection(_) => "connection",
        ClientError::Timeout(_) => "timeout",
        ClientError::DeadlineExceeded => "deadline",
        ClientError::Cancelled => "cancelled",
        ClientError::Body(_) => "body",
        ClientError::ConcurrencyLimit { .. } => "concurrency_limit",
        _ => "other",
    }
}
