//! Kobold-to-OpenAI Reverse Proxy
//!
//! Single-binary Rust service that:
//! 1. Accepts Kobold `POST /api/v1/generate` calls
//! 2. Picks a healthy OpenAI key from an in-process pool
//! 3. Rewrites the call into a chat completion and forwards it upstream
//! 4. Translates the answer back, preserving gzip/deflate coding
//!
//! A background checker probes keys for trial status, GPT-4 access and quota.

mod config;
mod error;
mod key_injection;
mod metrics;
mod proxy;
mod rate_limit;
mod status;

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use axum::Router;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use bytes::Bytes;
use key_pool::{KeyPool, OpenAiProbe, spawn_key_checker};
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use translate::{
    CapOutputTokens, ContentFilter, DisableStreaming, Finalize, Pipeline, TransformPayload,
};

use crate::config::{Config, PolicyConfig};
use crate::key_injection::KeyInjection;
use crate::proxy::ProxyState;
use crate::rate_limit::IpRateLimiter;
use crate::status::StatusState;

/// How long in-flight requests get to finish after a shutdown signal.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// Shared application state accessible from all handlers
#[derive(Clone)]
struct AppState {
    proxy: ProxyState,
    started_at: Instant,
    prometheus: PrometheusHandle,
}

/// Build the axum router with all routes and shared state.
///
/// The rate limiter only guards the generate route; the informational
/// endpoints stay reachable for monitoring.
fn build_router(
    state: AppState,
    limiter: Option<Arc<IpRateLimiter>>,
    max_connections: usize,
) -> Router {
    let generate = Router::new()
        .route("/api/v1/generate", post(generate_handler))
        .route_layer(axum::middleware::from_fn_with_state(
            limiter,
            rate_limit::rate_limit_middleware,
        ))
        .with_state(state.clone());

    Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state.clone())
        .merge(generate)
        .merge(status::build_status_router(StatusState::new(
            state.proxy.pool.clone(),
        )))
        .layer(tower::limit::ConcurrencyLimitLayer::new(max_connections))
}

/// Assemble the rewrite steps in their fixed order. Key injection runs first
/// so a request that cannot get a key fails before any other work.
fn build_pipeline(pool: Arc<KeyPool>, policy: &PolicyConfig) -> Result<Pipeline> {
    let mut pipeline = Pipeline::new()
        .with(KeyInjection::new(pool))
        .with(TransformPayload);

    if policy.reject_disallowed {
        let filter = ContentFilter::new(&policy.reject_pattern, policy.reject_message.clone())
            .context("invalid policy.reject_pattern")?;
        pipeline = pipeline.with(filter);
    }

    Ok(pipeline
        .with(DisableStreaming)
        .with(CapOutputTokens {
            max: policy.max_output_tokens,
        })
        .with(Finalize))
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and LOG_LEVEL / RUST_LOG support
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("starting kobold-proxy");

    // Install Prometheus metrics recorder before any metrics are emitted
    let prometheus_handle = metrics::install_recorder()?;

    // CLI: simple --config flag parsing
    let args: Vec<String> = std::env::args().collect();
    let cli_config_path = args
        .iter()
        .position(|a| a == "--config")
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str());

    let config_path = Config::resolve_path(cli_config_path);
    info!(path = %config_path.display(), "loading configuration");

    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;

    let raw_keys = config
        .keys
        .raw
        .as_ref()
        .map(|s| s.expose().as_str())
        .unwrap_or_default();
    let pool = Arc::new(
        KeyPool::from_csv(raw_keys, config.keys.check_keys)
            .context("no usable keys: set OPENAI_KEY or keys.keys_file")?,
    );
    let pipeline = build_pipeline(pool.clone(), &config.policy)?;

    info!(
        listen_addr = %config.proxy.listen_addr,
        upstream_url = %config.proxy.upstream_url,
        keys = pool.list_public().await.len(),
        check_keys = config.keys.check_keys,
        steps = ?pipeline.step_names(),
        requests_per_minute = config.rate_limit.requests_per_minute,
        "configuration loaded"
    );

    let client = reqwest::Client::new();

    if config.keys.check_keys {
        let probe = Arc::new(OpenAiProbe::new(
            client.clone(),
            config.proxy.upstream_url.clone(),
        ));
        spawn_key_checker(pool.clone(), probe, config.keys.checker_config());
    }

    let app_state = AppState {
        proxy: ProxyState {
            client,
            upstream_url: config.proxy.upstream_url.clone(),
            timeout: Duration::from_secs(config.proxy.timeout_secs),
            pool,
            pipeline: Arc::new(pipeline),
            default_model: config.policy.default_model.clone(),
            requests_total: Arc::new(AtomicU64::new(0)),
            errors_total: Arc::new(AtomicU64::new(0)),
        },
        started_at: Instant::now(),
        prometheus: prometheus_handle,
    };

    let limiter = IpRateLimiter::per_minute(config.rate_limit.requests_per_minute);
    let app = build_router(app_state, limiter, config.proxy.max_connections);

    let listen_addr = config.proxy.listen_addr;
    let listener = TcpListener::bind(listen_addr)
        .await
        .with_context(|| format!("failed to bind to {listen_addr}"))?;
    info!(addr = %listen_addr, "accepting requests");

    // The drain deadline starts at signal receipt, not at server start.
    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

    let server_handle = tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async {
            let _ = shutdown_rx.await;
        })
        .await
    });

    shutdown_signal().await;
    let _ = shutdown_tx.send(());

    match tokio::time::timeout(DRAIN_TIMEOUT, server_handle).await {
        Ok(Ok(Ok(()))) => {
            info!("all in-flight requests drained");
        }
        Ok(Ok(Err(e))) => {
            error!(error = %e, "server error during shutdown");
        }
        Ok(Err(e)) => {
            error!(error = %e, "server task panicked");
        }
        Err(_) => {
            warn!(
                drain_timeout_secs = DRAIN_TIMEOUT.as_secs(),
                "drain timeout exceeded, forcing shutdown"
            );
        }
    }

    info!("shutdown complete");
    Ok(())
}

/// POST /api/v1/generate
async fn generate_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let start = Instant::now();
    let request_id = format!("req_{}", uuid::Uuid::new_v4().as_simple());

    let response = match proxy::generate(&state.proxy, &headers, body, &request_id).await {
        Ok(response) => response,
        Err(e) => {
            warn!(request_id = %request_id, status = e.status().as_u16(), error = %e, "generate failed");
            e.into_response_for(&request_id)
        }
    };

    metrics::record_request(
        response.status().as_u16(),
        "POST",
        start.elapsed().as_secs_f64(),
    );
    response
}

/// Pool health plus uptime and request counters. 503 when no key is active.
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let summary = state.proxy.pool.summary().await;
    let status_code = if summary.status == "unhealthy" {
        axum::http::StatusCode::SERVICE_UNAVAILABLE
    } else {
        axum::http::StatusCode::OK
    };

    let body = serde_json::json!({
        "status": summary.status,
        "keys_total": summary.total,
        "keys_active": summary.active,
        "uptime_seconds": state.started_at.elapsed().as_secs(),
        "requests_served": state.proxy.requests_total.load(Ordering::Relaxed),
        "errors_total": state.proxy.errors_total.load(Ordering::Relaxed),
    });

    (
        status_code,
        [(axum::http::header::CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
}

/// Prometheus metrics endpoint in text exposition format.
async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    (
        axum::http::StatusCode::OK,
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        state.prometheus.render(),
    )
}

/// Wait for SIGTERM or SIGINT for graceful shutdown.
///
/// A handler that fails to install is logged and never fires; the other
/// signal still works.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}
