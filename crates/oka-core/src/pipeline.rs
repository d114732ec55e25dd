//! Ordered admission stages.

use crate::identity::ClientIdentity;
use async_trait::async_trait;
use axum::response::Response;
use http::request::Parts;
use std::fmt;
use std::sync::Arc;
use tracing::trace;

/// Result of evaluating one stage against a request.
pub enum StageOutcome {
    /// Hand the request to the next stage.
    Continue,
    /// Stop here and answer the client with this response.
    Respond(Response),
}

impl StageOutcome {
    /// Whether the request may proceed.
    #[must_use]
    pub const fn is_continue(&self) -> bool {
        matches!(self, Self::Continue)
    }
}

impl fmt::Debug for StageOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Continue => f.write_str("Continue"),
            Self::Respond(response) => f
                .debug_tuple("Respond")
                .field(&response.status())
                .finish(),
        }
    }
}

/// A single admission check.
///
/// Stages only see the request head; bodies are never buffered for admission.
#[async_trait]
pub trait Stage: Send + Sync {
    /// Stage name for logs.
    fn name(&self) -> &'static str;

    /// Decide whether the request continues.
    async fn evaluate(&self, request: &Parts, client: &ClientIdentity) -> StageOutcome;
}

/// Stages evaluated in insertion order; the first response wins.
#[derive(Clone, Default)]
pub struct Pipeline {
    stages: Vec<Arc<dyn Stage>>,
}

impl Pipeline {
    /// Create an empty pipeline that admits everything.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a stage.
    #[must_use]
    pub fn with_stage(mut self, stage: Arc<dyn Stage>) -> Self {
        self.stages.push(stage);
        self
    }

    /// Run every stage until one responds.
    ///
    /// Returns `None` when the request is admitted.
    pub async fn run(&self, request: &Parts, client: &ClientIdentity) -> Option<Response> {
        for stage in &self.stages {
            match stage.evaluate(request, client).await {
                StageOutcome::Continue => {}
                StageOutcome::Respond(response) => {
                    trace!(
                        stage = stage.name(),
                        client = %client,
                        status = %response.status(),
                        "Request answered by admission stage"
                    );
                    return Some(response);
                }
            }
        }
        None
    }

    /// Names of the configured stages, in order.
    #[must_use]
    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    /// Number of stages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// Whether the pipeline has no stages.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("stages", &self.stage_names())
            .finish()
    }
}
