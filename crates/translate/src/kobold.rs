//! Kobold generate protocol shapes and the mapping to chat completions

use openai_api::{ChatCompletionRequest, ChatMessage};
use serde::{Deserialize, Serialize};

use crate::error::RewriteError;

/// Body of `POST /api/v1/generate`.
///
/// Only samplers with a chat-completion equivalent are modelled. `rep_pen`,
/// `top_k`, `top_a`, `typical`, `tfs` and the rest are accepted and ignored.
#[derive(Debug, Clone, Deserialize)]
pub struct KoboldRequest {
    pub prompt: String,
    #[serde(default)]
    pub max_length: Option<u32>,
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub top_p: Option<f64>,
    /// Not part of the Kobold protocol; lets a client ask for a specific model.
    #[serde(default)]
    pub model: Option<String>,
}

impl KoboldRequest {
    /// Build the native request for `model`.
    pub fn to_chat_request(&self, model: &str) -> Result<ChatCompletionRequest, RewriteError> {
        let max_tokens = self
            .max_length
            .ok_or_else(|| RewriteError::InvalidRequest("max_length is required".into()))?;

        Ok(ChatCompletionRequest {
            model: model.to_string(),
            messages: prompt_messages(&self.prompt),
            temperature: self.temperature,
            top_p: self.top_p,
            max_tokens: Some(max_tokens),
            stream: None,
        })
    }
}

/// First line becomes the system message, the rest the user message.
fn prompt_messages(prompt: &str) -> Vec<ChatMessage> {
    match prompt.split_once('\n') {
        Some((first, rest)) if !rest.trim().is_empty() => {
            let first = first.trim_end_matches('\r');
            if first.trim().is_empty() {
                vec![ChatMessage::user(rest)]
            } else {
                vec![ChatMessage::system(first), ChatMessage::user(rest)]
            }
        }
        _ => vec![ChatMessage::user(prompt)],
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KoboldResult {
    pub text: String,
}

/// Response of `POST /api/v1/generate`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KoboldResponse {
    pub results: Vec<KoboldResult>,
    pub model: String,
}

impl KoboldResponse {
    pub fn new(text: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            results: vec![KoboldResult { text: text.into() }],
            model: model.into(),
        }
    }
}
