//! Pure rewrite steps
//!
//! Registration order in the proxy: key injection (lives with the pool, in
//! the service), `TransformPayload`, `ContentFilter`, `DisableStreaming`,
//! `CapOutputTokens`, `Finalize`.

use std::future::Future;
use std::pin::Pin;

use bytes::Bytes;
use regex::Regex;
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE, HeaderValue};

use crate::error::RewriteError;
use crate::pipeline::{OutboundRequest, RequestRewriter, RewriteContext};

type StepFuture<'a> = Pin<Box<dyn Future<Output = Result<(), RewriteError>> + Send + 'a>>;

/// Wraps a synchronous step body.
fn ready<'a>(result: Result<(), RewriteError>) -> StepFuture<'a> {
    Box::pin(std::future::ready(result))
}

/// Legacy body → native chat completion body.
pub struct TransformPayload;

impl RequestRewriter for TransformPayload {
    fn name(&self) -> &'static str {
        "transform_payload"
    }

    fn rewrite<'a>(
        &'a self,
        request: &'a mut OutboundRequest,
        ctx: &'a RewriteContext<'a>,
    ) -> StepFuture<'a> {
        ready(
            ctx.inbound
                .to_chat_request(ctx.model)
                .map(|body| request.body = Some(body)),
        )
    }
}

/// Rejects requests whose messages match an operator-supplied pattern.
pub struct ContentFilter {
    pattern: Regex,
    message: String,
}

impl ContentFilter {
    pub fn new(pattern: &str, message: impl Into<String>) -> Result<Self, regex::Error> {
        Ok(Self {
            pattern: Regex::new(pattern)?,
            message: message.into(),
        })
    }
}

impl RequestRewriter for ContentFilter {
    fn name(&self) -> &'static str {
        "content_filter"
    }

    fn rewrite<'a>(
        &'a self,
        request: &'a mut OutboundRequest,
        _ctx: &'a RewriteContext<'a>,
    ) -> StepFuture<'a> {
        let result = request.body_mut().and_then(|body| {
            if body.messages.iter().any(|m| self.pattern.is_match(&m.content)) {
                Err(RewriteError::PolicyViolation(self.message.clone()))
            } else {
                Ok(())
            }
        });
        ready(result)
    }
}

/// Forces a buffered upstream response.
pub struct DisableStreaming;

impl RequestRewriter for DisableStreaming {
    fn name(&self) -> &'static str {
        "disable_streaming"
    }

    fn rewrite<'a>(
        &'a self,
        request: &'a mut OutboundRequest,
        _ctx: &'a RewriteContext<'a>,
    ) -> StepFuture<'a> {
        ready(request.body_mut().map(|body| body.stream = Some(false)))
    }
}

/// Clamps `max_tokens` to a ceiling. A missing value becomes the ceiling.
pub struct CapOutputTokens {
    pub max: u32,
}

impl RequestRewriter for CapOutputTokens {
    fn name(&self) -> &'static str {
        "cap_output_tokens"
    }

    fn rewrite<'a>(
        &'a self,
        request: &'a mut OutboundRequest,
        _ctx: &'a RewriteContext<'a>,
    ) -> StepFuture<'a> {
        let max = self.max;
        ready(request.body_mut().map(|body| {
            body.max_tokens = Some(body.max_tokens.map_or(max, |n| n.min(max)));
        }))
    }
}

/// Serializes the body and sets the entity headers. Must be last.
pub struct Finalize;

impl RequestRewriter for Finalize {
    fn name(&self) -> &'static str {
        "finalize"
    }

    fn rewrite<'a>(
        &'a self,
        request: &'a mut OutboundRequest,
        _ctx: &'a RewriteContext<'a>,
    ) -> StepFuture<'a> {
        let result = request.body_mut().and_then(|body| {
            serde_json::to_vec(body)
                .map_err(|e| RewriteError::Internal(format!("failed to serialize body: {e}")))
        });
        let payload = match result {
            Ok(payload) => payload,
            Err(e) => return ready(Err(e)),
        };

        request
            .headers
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        request
            .headers
            .insert(CONTENT_LENGTH, HeaderValue::from(payload.len()));
        request.set_payload(Bytes::from(payload));
        ready(Ok(()))
    }
}
