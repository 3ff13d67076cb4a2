//! OpenAI endpoint paths and model naming

/// Default upstream base URL.
pub const DEFAULT_API_BASE: &str = "https://api.openai.com";

/// Chat completion endpoint every proxied generate call is sent to.
pub const CHAT_COMPLETIONS_PATH: &str = "/v1/chat/completions";

/// Model listing; used to detect premium model access.
pub const MODELS_PATH: &str = "/v1/models";

/// Billing subscription: plan limits and payment method.
pub const SUBSCRIPTION_PATH: &str = "/dashboard/billing/subscription";

/// Billing usage over a date window (`start_date`, `end_date`, both `YYYY-MM-DD`).
pub const USAGE_PATH: &str = "/dashboard/billing/usage";

/// Model-name prefix identifying the premium tier.
pub const PREMIUM_MODEL_PREFIX: &str = "gpt-4";

/// Body fragments of a 429 that mean the account is out of quota or
/// billing, as opposed to a per-minute rate limit. Matched lowercase.
pub const QUOTA_MARKERS: &[&str] = &[
    "insufficient_quota",
    "billing_not_active",
    "exceeded your current quota",
    "access was terminated",
];

/// Whether a 429 body describes quota/billing exhaustion.
pub fn is_quota_message(body: &str) -> bool {
    let lower = body.to_lowercase();
    QUOTA_MARKERS.iter().any(|m| lower.contains(m))
}
