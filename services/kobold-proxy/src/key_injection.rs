//! Pool-backed key injection, the first pipeline step.
//!
//! Picks a key for the requested model tier and writes it as the outbound
//! Bearer credential. Any client-supplied Authorization is discarded.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use key_pool::{Capability, KeyPool};
use openai_api::PREMIUM_MODEL_PREFIX;
use reqwest::header::{AUTHORIZATION, HeaderValue};
use tracing::debug;
use translate::{OutboundRequest, RequestRewriter, RewriteContext, RewriteError};

/// Capability a model name requires of its key.
pub fn required_capability(model: &str) -> Option<Capability> {
    model
        .starts_with(PREMIUM_MODEL_PREFIX)
        .then_some(Capability::Premium)
}

pub struct KeyInjection {
    pool: Arc<KeyPool>,
}

impl KeyInjection {
    pub fn new(pool: Arc<KeyPool>) -> Self {
        Self { pool }
    }
}

impl RequestRewriter for KeyInjection {
    fn name(&self) -> &'static str {
        "key_injection"
    }

    fn rewrite<'a>(
        &'a self,
        request: &'a mut OutboundRequest,
        ctx: &'a RewriteContext<'a>,
    ) -> Pin<Box<dyn Future<Output = Result<(), RewriteError>> + Send + 'a>> {
        Box::pin(async move {
            let selected = self
                .pool
                .select(required_capability(ctx.model))
                .await
                .map_err(|e| match e {
                    key_pool::Error::NoKeyAvailable(msg) => RewriteError::NoKeyAvailable(msg),
                    other => RewriteError::Internal(other.to_string()),
                })?;

            let mut value = HeaderValue::from_str(&format!("Bearer {}", selected.secret.expose()))
                .map_err(|e| RewriteError::Internal(format!("invalid key value: {e}")))?;
            value.set_sensitive(true);

            request.headers.remove(AUTHORIZATION);
            request.headers.insert(AUTHORIZATION, value);
            debug!(key = %selected.hash, request_id = ctx.request_id, "key injected");
            request.key = Some(selected.hash);
            Ok(())
        })
    }
}
