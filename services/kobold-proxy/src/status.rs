//! Informational endpoints
//!
//! - GET /status                            pool summary plus per-key public view
//! - GET /api/v1/model                      fixed banner expected by Kobold clients
//! - GET /api/v1/config/soft_prompts_list   always empty
//!
//! Nothing here ever renders a secret; keys are identified by hash only.

use std::sync::Arc;

use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;

use key_pool::KeyPool;

/// Banner returned by `GET /api/v1/model`.
pub const MODEL_BANNER: &str = "Connected to OpenAI reverse proxy";

#[derive(Clone)]
pub struct StatusState {
    pool: Arc<KeyPool>,
}

impl StatusState {
    pub fn new(pool: Arc<KeyPool>) -> Self {
        Self { pool }
    }
}

pub fn build_status_router(state: StatusState) -> Router {
    Router::new()
        .route("/status", get(pool_status))
        .route("/api/v1/model", get(model_banner))
        .route("/api/v1/config/soft_prompts_list", get(soft_prompts))
        .with_state(state)
}

fn json(status: StatusCode, body: serde_json::Value) -> impl IntoResponse {
    (
        status,
        [(axum::http::header::CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
}

/// GET /status
async fn pool_status(State(state): State<StatusState>) -> impl IntoResponse {
    let keys = state.pool.list_public().await;
    let summary = key_pool::PoolSummary::from_keys(&keys, state.pool.check_keys());

    json(
        StatusCode::OK,
        serde_json::json!({
            "summary": summary,
            "keys": keys,
        }),
    )
}

async fn model_banner() -> impl IntoResponse {
    json(StatusCode::OK, serde_json::json!({ "result": MODEL_BANNER }))
}

async fn soft_prompts() -> impl IntoResponse {
    json(StatusCode::OK, serde_json::json!({ "values": [] }))
}
