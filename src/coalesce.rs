//! Request coalescing: concurrent identical requests share one execution.
//!
//! The first caller for a key leads: it runs the rest of the pipeline and broadcasts the
//! buffered result. Callers arriving with the same key before the leader finishes wait
//! for that result instead of going to the network. The group is removed before the
//! result is sent, so a caller arriving afterwards starts a fresh execution.

use crate::error::ClientError;
use crate::instrumentation::Instrumentation;
use crate::pipeline::{Next, Stage};
use crate::request::HttpRequest;
use crate::response::HttpResponse;
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::broadcast;

/// Custom coalescing key. When set, every method is eligible for coalescing.
pub type KeyFn = Arc<dyn Fn(&HttpRequest) -> String + Send + Sync>;

type SharedResult = Result<HttpResponse, ClientError>;
type Groups = Mutex<HashMap<String, broadcast::Sender<SharedResult>>>;

/// Default key: `METHOD||url`.
pub fn default_key(request: &HttpRequest) -> String {
    format!("{}||{}", request.method(), request.url())
}

/// Pipeline stage de-duplicating concurrent identical requests.
pub struct CoalesceStage {
    groups: Groups,
    key_fn: Option<KeyFn>,
    instrumentation: Arc<dyn Instrumentation>,
}

impl fmt::Debug for CoalesceStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CoalesceStage")
            .field("in_flight", &self.in_flight())
            .field("key_fn", &self.key_fn.as_ref().map(|_| "<custom>"))
            .finish()
    }
}

enum Role {
    Leader(broadcast::Sender<SharedResult>),
    Waiter(broadcast::Receiver<SharedResult>),
}

impl CoalesceStage {
    pub fn new(key_fn: Option<KeyFn>, instrumentation: Arc<dyn Instrumentation>) -> Self {
        Self { groups: Mutex::new(HashMap::new()), key_fn, instrumentation }
    }

    /// Number of groups with an execution in flight.
    pub fn in_flight(&self) -> usize {
        lock(&self.groups).len()
    }

    fn key_for(&self, request: &HttpRequest) -> Option<String> {
        match &self.key_fn {
            Some(key_fn) => Some(key_fn(request)),
            None if request.method().is_safe() => Some(default_key(request)),
            None => None,
        }
    }

    fn join(&self, key: &str) -> Role {
        let mut groups = lock(&self.groups);
        if let Some(sender) = groups.get(key) {
            return Role::Waiter(sender.subscribe());
        }
        let (sender, _) = broadcast::channel(1);
        groups.insert(key.to_string(), sender.clone());
        Role::Leader(sender)
    }
}

#[async_trait]
impl Stage for CoalesceStage {
    fn name(&self) -> &'static str {
        "coalesce"
    }

    async fn execute(&self, request: HttpRequest, next: Next<'_>) -> Result<HttpResponse, ClientError> {
        let Some(key) = self.key_for(&request) else {
            return next.run(request).await;
        };

        match self.join(&key) {
            Role::Leader(sender) => {
                let mut group = GroupGuard { groups: &self.groups, key: Some(key) };
                let result = next.run(request).await;
                group.finish(&sender, &result);
                result
            }
            Role::Waiter(mut receiver) => {
                tracing::trace!(target: "steadyhttp", key = %key, "joined in-flight request");
                let context = request.context().clone();
                tokio::select! {
                    biased;
                    err = context.done() => Err(err),
                    received = receiver.recv() => match received {
                        Ok(result) => result,
                        Err(recv) => {
                            let err = ClientError::Coalescing { reason: recv.to_string() };
                            self.instrumentation.coalesce_err(&request, &err);
                            Err(err)
                        }
                    },
                }
            }
        }
    }
}

/// Removes the leader's group when dropped, so waiters of a cancelled leader see the
/// channel close instead of waiting forever.
struct GroupGuard<'a> {
    groups: &'a Groups,
    key: Option<String>,
}

impl GroupGuard<'_> {
    fn finish(&mut self, sender: &broadcast::Sender<SharedResult>, result: &SharedResult) {
        let mut groups = lock(self.groups);
        if let Some(key) = self.key.take() {
            groups.remove(&key);
        }
        // No receivers is fine: nobody joined.
        let _ = sender.send(result.clone());
    }
}

impl Drop for GroupGuard<'_> {
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            lock(self.groups).remove(&key);
        }
    }
}

fn lock(groups: &Groups) -> MutexGuard<'_, HashMap<String, broadcast::Sender<SharedResult>>> {
    groups.lock().unwrap_or_else(PoisonError::into_inner)
}
