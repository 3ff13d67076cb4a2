//! Per-request error type and its HTTP mapping
//!
//! Every failure on the generate path becomes one of these and is rendered as
//! `{"error":{"type","message","request_id"}}` with a matching status code.
//! Startup failures use `anyhow` in `main` instead.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;
use translate::{PipelineError, ResponseError, RewriteError};

#[derive(Error, Debug)]
pub enum ProxyError {
    #[error("{0}")]
    NoKeyAvailable(String),

    #[error("{0}")]
    InvalidRequest(String),

    #[error("{0}")]
    Policy(String),

    #[error("{0}")]
    RateLimited(String),

    #[error("{0}")]
    Internal(String),

    #[error("{0}")]
    BadGateway(String),

    #[error("{0}")]
    Timeout(String),

    #[error("upstream returned {status}: {message}")]
    Upstream { status: u16, message: String },
}

impl ProxyError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::NoKeyAvailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Self::Policy(_) => StatusCode::FORBIDDEN,
            Self::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::BadGateway(_) => StatusCode::BAD_GATEWAY,
            Self::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            Self::Upstream { status, .. } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY)
            }
        }
    }

    pub fn error_type(&self) -> &'static str {
        match self {
            Self::NoKeyAvailable(_) => "no_key_available",
            Self::InvalidRequest(_) => "invalid_request",
            Self::Policy(_) => "policy_error",
            Self::RateLimited(_) => "rate_limited",
            Self::Internal(_) => "internal_error",
            Self::BadGateway(_) | Self::Timeout(_) => "proxy_error",
            Self::Upstream { .. } => "upstream_error",
        }
    }

    /// Render as the JSON error body, tagged with `request_id`.
    pub fn into_response_for(self, request_id: &str) -> Response {
        let message = match &self {
            Self::Upstream { message, .. } => message.clone(),
            other => other.to_string(),
        };
        let body = serde_json::json!({
            "error": {
                "type": self.error_type(),
                "message": message,
                "request_id": request_id,
            }
        });
        (
            self.status(),
            [(axum::http::header::CONTENT_TYPE, "application/json")],
            body.to_string(),
        )
            .into_response()
    }
}

impl From<PipelineError> for ProxyError {
    fn from(err: PipelineError) -> Self {
        match err.source {
            RewriteError::NoKeyAvailable(msg) => Self::NoKeyAvailable(msg),
            RewriteError::InvalidRequest(msg) => Self::InvalidRequest(msg),
            RewriteError::PolicyViolation(msg) => Self::Policy(msg),
            RewriteError::Internal(msg) => Self::Internal(msg),
        }
    }
}

impl From<ResponseError> for ProxyError {
    fn from(err: ResponseError) -> Self {
        Self::Internal(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[test]
    fn status_and_type_mapping() {
        let cases = [
            (ProxyError::NoKeyAvailable("x".into()), 503, "no_key_available"),
            (ProxyError::InvalidRequest("x".into()), 400, "invalid_request"),
            (ProxyError::Policy("x".into()), 403, "policy_error"),
            (ProxyError::RateLimited("x".into()), 429, "rate_limited"),
            (ProxyError::Internal("x".into()), 500, "internal_error"),
            (ProxyError::BadGateway("x".into()), 502, "proxy_error"),
            (ProxyError::Timeout("x".into()), 504, "proxy_error"),
            (
                ProxyError::Upstream {
                    status: 401,
                    message: "x".into(),
                },
                401,
                "upstream_error",
            ),
        ];
        for (err, status, kind) in cases {
            assert_eq!(err.status().as_u16(), status, "{err:?}");
            assert_eq!(err.error_type(), kind, "{err:?}");
        }
    }

    #[test]
    fn pipeline_errors_keep_their_meaning() {
        let err: ProxyError = PipelineError {
            step: "content_filter",
            source: RewriteError::PolicyViolation("English only".into()),
        }
        .into();
        assert!(matches!(err, ProxyError::Policy(ref m) if m == "English only"));

        let err: ProxyError = PipelineError {
            step: "key_injection",
            source: RewriteError::NoKeyAvailable("No keys available".into()),
        }
        .into();
        assert_eq!(err.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn response_errors_are_internal() {
        let err: ProxyError = ResponseError::UnsupportedEncoding("br".into()).into();
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn body_carries_request_id() {
        let response = ProxyError::Timeout("upstream timeout".into()).into_response_for("req_abc");
        assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
        let json = body_json(response).await;
        assert_eq!(json["error"]["type"], "proxy_error");
        assert_eq!(json["error"]["message"], "upstream timeout");
        assert_eq!(json["error"]["request_id"], "req_abc");
    }

    #[tokio::test]
    async fn upstream_body_uses_bare_message() {
        let response = ProxyError::Upstream {
            status: 429,
            message: "Rate limit reached".into(),
        }
        .into_response_for("req_x");
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(body_json(response).await["error"]["message"], "Rate limit reached");
    }
}
