//! OpenAI HTTP API surface used by the proxy
//!
//! Holds the native wire types the translation layer converts to and from,
//! and the three lightweight account queries the key health checker issues:
//!
//! 1. `billing::get_subscription()`: plan limits and trial status
//! 2. `billing::get_usage()`: month-to-date spend
//! 3. `billing::list_models()`: premium model availability
//!
//! Failures are mapped onto `Error` variants the checker can act on without
//! inspecting raw status codes.

pub mod billing;
pub mod constants;
pub mod error;
pub mod types;

pub use billing::{get_subscription, get_usage, list_models, usage_window};
pub use constants::*;
pub use error::{Error, Result};
pub use types::{
    ChatCompletionRequest, ChatCompletionResponse, ChatMessage, Choice, ModelList, Subscription,
    UsageReport,
};
