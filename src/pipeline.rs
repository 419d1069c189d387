//! Ordered stage list terminated by the base executor.
//!
//! Each resilience layer implements [`Stage`]; a stage receives the request and a
//! [`Next`] handle that runs the remainder of the pipeline. Stages are assembled once at
//! build time and never change afterwards.

use crate::error::ClientError;
use crate::executor::BaseExecutor;
use crate::request::HttpRequest;
use crate::response::HttpResponse;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

/// One layer of the request pipeline.
#[async_trait]
pub trait Stage: Send + Sync + fmt::Debug {
    /// Short name used in debug output.
    fn name(&self) -> &'static str;

    async fn execute(&self, request: HttpRequest, next: Next<'_>) -> Result<HttpResponse, ClientError>;
}

/// Handle to the remainder of the pipeline. `Copy`, so a stage may run it more than once.
#[derive(Clone, Copy)]
pub struct Next<'a> {
    stages: &'a [Arc<dyn Stage>],
    executor: &'a BaseExecutor,
}

impl<'a> Next<'a> {
    /// Run the rest of the pipeline for `request`.
    pub async fn run(self, request: HttpRequest) -> Result<HttpResponse, ClientError> {
        match self.stages.split_first() {
            Some((stage, rest)) => {
                let next = Next { stages: rest, executor: self.executor };
                stage.execute(request, next).await
            }
            None => self.executor.execute(request).await,
        }
    }
}

impl fmt::Debug for Next<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Next")
            .field("stages", &self.stages.iter().map(|s| s.name()).collect::<Vec<_>>())
            .finish()
    }
}

/// Immutable stage list plus the terminal executor.
#[derive(Debug, Clone)]
pub struct Pipeline {
    stages: Arc<[Arc<dyn Stage>]>,
    executor: BaseExecutor,
}

impl Pipeline {
    /// Stages run outermost first.
    pub fn new(stages: Vec<Arc<dyn Stage>>, executor: BaseExecutor) -> Self {
        Self { stages: stages.into(), executor }
    }

    pub async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, ClientError> {
        Next { stages: &self.stages, executor: &self.executor }.run(request).await
    }

    /// Stage names, outermost first.
    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }
}
