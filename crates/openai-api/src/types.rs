//! Native request/response shapes
//!
//! Only the fields the proxy reads or writes are modelled; unknown fields in
//! responses are ignored by serde.

use serde::{Deserialize, Serialize};

/// One role-tagged chat message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".into(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".into(),
            content: content.into(),
        }
    }
}

/// Body of `POST /v1/chat/completions`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,
}

/// Message inside a completion choice. `content` is null for tool-call turns.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResponseMessage {
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Choice {
    #[serde(default)]
    pub index: u32,
    #[serde(default)]
    pub message: Option<ResponseMessage>,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

/// Body returned by a non-streaming chat completion.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatCompletionResponse {
    #[serde(default)]
    pub id: Option<String>,
    pub model: String,
    #[serde(default)]
    pub choices: Vec<Choice>,
}

impl ChatCompletionResponse {
    /// Text of the first choice, if it carries any.
    pub fn primary_text(&self) -> Option<&str> {
        self.choices
            .first()
            .and_then(|c| c.message.as_ref())
            .and_then(|m| m.content.as_deref())
    }
}

/// `GET /dashboard/billing/subscription`. Limits are in USD.
#[derive(Debug, Clone, Deserialize)]
pub struct Subscription {
    #[serde(default)]
    pub has_payment_method: bool,
    #[serde(default)]
    pub soft_limit_usd: f64,
    #[serde(default)]
    pub hard_limit_usd: f64,
    #[serde(default)]
    pub system_hard_limit_usd: f64,
}

/// `GET /dashboard/billing/usage`. `total_usage` is reported in cents.
#[derive(Debug, Clone, Deserialize)]
pub struct UsageReport {
    #[serde(default)]
    pub total_usage: f64,
}

impl UsageReport {
    pub fn usd(&self) -> f64 {
        self.total_usage / 100.0
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ModelEntry {
    pub id: String,
}

/// `GET /v1/models`.
#[derive(Debug, Clone, Deserialize)]
pub struct ModelList {
    #[serde(default)]
    pub data: Vec<ModelEntry>,
}

impl ModelList {
    pub fn has_prefix(&self, prefix: &str) -> bool {
        self.data.iter().any(|m| m.id.starts_with(prefix))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_omits_unset_sampling_fields() {
        let req = ChatCompletionRequest {
            model: "gpt-3.5-turbo".into(),
            messages: vec![ChatMessage::user("hi")],
            temperature: Some(0.7),
            top_p: None,
            max_tokens: Some(100),
            stream: None,
        };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["temperature"], 0.7);
        assert_eq!(json["max_tokens"], 100);
        assert!(json.get("top_p").is_none());
        assert!(json.get("stream").is_none());
        assert_eq!(json["messages"][0]["role"], "user");
    }

    #[test]
    fn response_primary_text_reads_first_choice() {
        let json = r#"{
            "id": "chatcmpl-1",
            "model": "gpt-3.5-turbo-0613",
            "choices": [
                {"index": 0, "message": {"role": "assistant", "content": "hello"}, "finish_reason": "stop"},
                {"index": 1, "message": {"role": "assistant", "content": "ignored"}}
            ],
            "usage": {"prompt_tokens": 3, "completion_tokens": 1, "total_tokens": 4}
        }"#;
        let resp: ChatCompletionResponse = serde_json::from_str(json).unwrap();
        assert_eq!(resp.primary_text(), Some("hello"));
        assert_eq!(resp.model, "gpt-3.5-turbo-0613");
    }

    #[test]
    fn response_without_choices_has_no_text() {
        let resp: ChatCompletionResponse =
            serde_json::from_str(r#"{"model":"gpt-x","choices":[]}"#).unwrap();
        assert_eq!(resp.primary_text(), None);
    }

    #[test]
    fn response_with_null_content_has_no_text() {
        let resp: ChatCompletionResponse = serde_json::from_str(
            r#"{"model":"gpt-x","choices":[{"message":{"role":"assistant","content":null}}]}"#,
        )
        .unwrap();
        assert_eq!(resp.primary_text(), None);
    }

    #[test]
    fn subscription_tolerates_missing_limits() {
        let sub: Subscription = serde_json::from_str(r#"{"has_payment_method":true}"#).unwrap();
        assert!(sub.has_payment_method);
        assert_eq!(sub.hard_limit_usd, 0.0);
    }

    #[test]
    fn usage_converts_cents_to_dollars() {
        let usage: UsageReport = serde_json::from_str(r#"{"total_usage": 1234.0}"#).unwrap();
        assert!((usage.usd() - 12.34).abs() < 1e-9);
    }

    #[test]
    fn model_list_prefix_detection() {
        let list: ModelList = serde_json::from_str(
            r#"{"data":[{"id":"gpt-3.5-turbo"},{"id":"gpt-4-0613"},{"id":"whisper-1"}]}"#,
        )
        .unwrap();
        assert!(list.has_prefix("gpt-4"));
        assert!(!list.has_prefix("gpt-5"));
    }
}
