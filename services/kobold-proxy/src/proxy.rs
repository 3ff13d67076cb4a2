//! Proxied generate call
//!
//! Parses the Kobold body, runs the rewrite pipeline, forwards the finalized
//! request to `{upstream_url}/v1/chat/completions`, and translates a 2xx
//! response back into the Kobold shape. Upstream failures are classified and
//! fed back to the key pool; usage is only accounted after a full success, so
//! a request dropped mid-flight leaves the pool untouched.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use axum::body::Body;
use axum::http::{HeaderMap, StatusCode};
use axum::response::Response;
use bytes::Bytes;
use key_pool::KeyPool;
use openai_api::CHAT_COMPLETIONS_PATH;
use reqwest::header::{ACCEPT_ENCODING, CONTENT_ENCODING, CONTENT_TYPE, HeaderValue};
use tracing::{error, info, instrument, warn};
use translate::{
    ContentEncoding, KoboldRequest, OutboundRequest, Pipeline, ReadyRequest, RewriteContext,
    negotiate_accept_encoding, translate_response,
};

use crate::error::ProxyError;
use crate::metrics;

/// Attempts per request; only timeouts are retried.
const MAX_ATTEMPTS: u32 = 3;
const RETRY_DELAY: Duration = Duration::from_millis(100);

/// Shared state for the generate handler
#[derive(Clone)]
pub struct ProxyState {
    pub client: reqwest::Client,
    pub upstream_url: String,
    pub timeout: Duration,
    pub pool: Arc<KeyPool>,
    pub pipeline: Arc<Pipeline>,
    pub default_model: String,
    pub requests_total: Arc<AtomicU64>,
    pub errors_total: Arc<AtomicU64>,
}

/// Handle one `POST /api/v1/generate`.
#[instrument(skip_all, fields(request_id = %request_id, method = "POST", path = "/api/v1/generate"))]
pub async fn generate(
    state: &ProxyState,
    headers: &HeaderMap,
    body: Bytes,
    request_id: &str,
) -> Result<Response, ProxyError> {
    state.requests_total.fetch_add(1, Ordering::Relaxed);
    let result = generate_inner(state, headers, body, request_id).await;
    if result.is_err() {
        state.errors_total.fetch_add(1, Ordering::Relaxed);
    }
    result
}

async fn generate_inner(
    state: &ProxyState,
    headers: &HeaderMap,
    body: Bytes,
    request_id: &str,
) -> Result<Response, ProxyError> {
    if !state.pool.any_available().await {
        return Err(ProxyError::NoKeyAvailable("No keys available".into()));
    }

    let inbound: KoboldRequest = serde_json::from_slice(&body)
        .map_err(|e| ProxyError::InvalidRequest(format!("invalid generate body: {e}")))?;
    let model = inbound
        .model
        .clone()
        .unwrap_or_else(|| state.default_model.clone());

    let mut outbound_headers = HeaderMap::new();
    let accept = negotiate_accept_encoding(
        headers
            .get(ACCEPT_ENCODING)
            .and_then(|v| v.to_str().ok()),
    );
    if let Ok(value) = HeaderValue::from_str(&accept) {
        outbound_headers.insert(ACCEPT_ENCODING, value);
    }

    let ctx = RewriteContext {
        request_id,
        model: &model,
        inbound: &inbound,
        inbound_headers: headers,
    };
    let ready = state
        .pipeline
        .run(OutboundRequest::new(outbound_headers), &ctx)
        .await
        .inspect_err(|e| metrics::record_pipeline_rejection(e.step))?;

    let upstream = send_with_retry(state, &ready).await?;
    let key = ready.key.as_deref();
    let status = upstream.status();
    let encoding = upstream
        .headers()
        .get(CONTENT_ENCODING)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);
    let bytes = upstream.bytes().await.map_err(|e| {
        metrics::record_upstream_error("body");
        error!(error = %e, "failed to read upstream response body");
        ProxyError::BadGateway(format!("upstream response read error: {e}"))
    })?;

    if !status.is_success() {
        return Err(upstream_failure(state, key, status, encoding.as_deref(), &bytes).await);
    }

    let translated = translate_response(encoding.as_deref(), &bytes).inspect_err(|e| {
        error!(error = %e, "response translation failed");
    })?;

    if let Some(hash) = key {
        state.pool.record_prompt_served(hash).await;
    }
    info!(key = ?key, model = %model, "generate served");

    let mut response = Response::builder()
        .status(StatusCode::OK)
        .header(CONTENT_TYPE, "application/json");
    if let Some(coding) = translated.encoding.header_value() {
        response = response.header(CONTENT_ENCODING, coding);
    }
    response
        .body(Body::from(translated.body))
        .map_err(|e| ProxyError::Internal(format!("response build error: {e}")))
}

/// POST the finalized request. Timeouts are retried on the same key.
async fn send_with_retry(
    state: &ProxyState,
    ready: &ReadyRequest,
) -> Result<reqwest::Response, ProxyError> {
    let url = format!(
        "{}{CHAT_COMPLETIONS_PATH}",
        state.upstream_url.trim_end_matches('/')
    );

    for attempt in 0..MAX_ATTEMPTS {
        if attempt > 0 {
            warn!(attempt, "retrying after upstream timeout");
            tokio::time::sleep(RETRY_DELAY).await;
        }

        let request = state
            .client
            .post(&url)
            .headers(ready.headers.clone())
            .timeout(state.timeout)
            .body(ready.body.clone());

        match request.send().await {
            Ok(response) => return Ok(response),
            Err(e) if e.is_timeout() && attempt < MAX_ATTEMPTS - 1 => continue,
            Err(e) if e.is_timeout() => {
                metrics::record_upstream_error("timeout");
                error!(error = %e, attempts = MAX_ATTEMPTS, "upstream timeout after all retries");
                return Err(ProxyError::Timeout(format!(
                    "upstream timeout after {}s ({MAX_ATTEMPTS} attempts)",
                    state.timeout.as_secs()
                )));
            }
            Err(e) => {
                metrics::record_upstream_error("connection");
                error!(error = %e, "upstream request failed");
                return Err(ProxyError::BadGateway(format!("upstream error: {e}")));
            }
        }
    }

    Err(ProxyError::Internal("unexpected retry exhaustion".into()))
}

/// Classify a non-2xx upstream answer, apply the pool consequence, and build
/// the client error.
async fn upstream_failure(
    state: &ProxyState,
    key: Option<&str>,
    status: StatusCode,
    encoding: Option<&str>,
    bytes: &[u8],
) -> ProxyError {
    let body = ContentEncoding::from_header(encoding)
        .and_then(|coding| coding.decode(bytes))
        .unwrap_or_else(|_| bytes.to_vec());
    let body = String::from_utf8_lossy(&body);

    let classification = key_pool::classify_status(status.as_u16(), &body);
    metrics::record_upstream_error("status");
    warn!(
        key = ?key,
        status = status.as_u16(),
        ?classification,
        "upstream returned an error"
    );
    if let Some(hash) = key {
        state.pool.report_error(hash, classification).await;
    }

    ProxyError::Upstream {
        status: status.as_u16(),
        message: upstream_message(&body)
            .unwrap_or_else(|| format!("upstream returned HTTP {}", status.as_u16())),
    }
}

/// `error.message` from an OpenAI-style error body.
fn upstream_message(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    value["error"]["message"].as_str().map(str::to_owned)
}
