//! Request rewrite pipeline
//!
//! Steps run in registration order against one `OutboundRequest`. The first
//! failing step stops the run and the request is dropped. A successful run
//! must end with a step that finalizes the payload, otherwise the run fails;
//! only a finalized `ReadyRequest` can be sent.

use std::future::Future;
use std::pin::Pin;

use bytes::Bytes;
use openai_api::ChatCompletionRequest;
use reqwest::header::HeaderMap;
use tracing::{debug, warn};

use crate::error::{PipelineError, RewriteError};
use crate::kobold::KoboldRequest;

/// Request being built for the upstream.
#[derive(Debug, Default)]
pub struct OutboundRequest {
    pub headers: HeaderMap,
    /// Native body, present once the payload step has run.
    pub body: Option<ChatCompletionRequest>,
    /// Hash of the key injected into `headers`.
    pub key: Option<String>,
    payload: Option<Bytes>,
}

impl OutboundRequest {
    pub fn new(headers: HeaderMap) -> Self {
        Self {
            headers,
            ..Default::default()
        }
    }

    /// Native body, or an internal error if no step has produced it yet.
    pub fn body_mut(&mut self) -> Result<&mut ChatCompletionRequest, RewriteError> {
        self.body
            .as_mut()
            .ok_or_else(|| RewriteError::Internal("request body not built yet".into()))
    }

    pub(crate) fn set_payload(&mut self, payload: Bytes) {
        self.payload = Some(payload);
    }
}

/// A finalized request, ready to send.
#[derive(Debug)]
pub struct ReadyRequest {
    pub headers: HeaderMap,
    pub body: Bytes,
    pub key: Option<String>,
}

/// Read-only inputs every step can see.
#[derive(Debug)]
pub struct RewriteContext<'a> {
    pub request_id: &'a str,
    /// Model the request will run against.
    pub model: &'a str,
    pub inbound: &'a KoboldRequest,
    pub inbound_headers: &'a HeaderMap,
}

/// One step of the pipeline.
///
/// Uses `Pin<Box<dyn Future>>` so steps can be stored as trait objects.
pub trait RequestRewriter: Send + Sync {
    /// Step name for logs and rejection metrics.
    fn name(&self) -> &'static str;

    fn rewrite<'a>(
        &'a self,
        request: &'a mut OutboundRequest,
        ctx: &'a RewriteContext<'a>,
    ) -> Pin<Box<dyn Future<Output = Result<(), RewriteError>> + Send + 'a>>;
}

/// Ordered chain of rewrite steps.
#[derive(Default)]
pub struct Pipeline {
    steps: Vec<Box<dyn RequestRewriter>>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a step.
    pub fn with(mut self, step: impl RequestRewriter + 'static) -> Self {
        self.steps.push(Box::new(step));
        self
    }

    pub fn step_names(&self) -> Vec<&'static str> {
        self.steps.iter().map(|s| s.name()).collect()
    }

    /// Run every step in order. Consumes the request; on error it is dropped.
    pub async fn run(
        &self,
        mut request: OutboundRequest,
        ctx: &RewriteContext<'_>,
    ) -> Result<ReadyRequest, PipelineError> {
        for step in &self.steps {
            if let Err(source) = step.rewrite(&mut request, ctx).await {
                warn!(
                    step = step.name(),
                    request_id = ctx.request_id,
                    error = %source,
                    "request pipeline aborted"
                );
                return Err(PipelineError {
                    step: step.name(),
                    source,
                });
            }
            debug!(step = step.name(), request_id = ctx.request_id, "pipeline step done");
        }

        let Some(body) = request.payload else {
            return Err(PipelineError {
                step: "finalize",
                source: RewriteError::Internal("pipeline ended without finalizing".into()),
            });
        };
        Ok(ReadyRequest {
            headers: request.headers,
            body,
            key: request.key,
        })
    }
}
