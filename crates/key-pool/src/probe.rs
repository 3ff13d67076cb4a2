//! Key probes used by the health checker
//!
//! A probe runs against one secret and yields a partial `KeyUpdate`. The
//! first probe of a key learns everything (plan, limits, usage, models);
//! later probes only refresh usage.

use std::future::Future;
use std::pin::Pin;

use openai_api::PREMIUM_MODEL_PREFIX;
use tracing::debug;

use crate::key::KeyUpdate;

/// Why a probe did not produce an update.
#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    /// Provider rejected the key. Disable.
    #[error("key revoked: {0}")]
    Revoked(String),

    /// Provider reports the key out of quota or billing. Disable.
    #[error("key out of quota: {0}")]
    QuotaExhausted(String),

    /// Network failure, rate limit or unexpected response. Retry next period.
    #[error("transient probe failure: {0}")]
    Transient(String),
}

impl From<openai_api::Error> for ProbeError {
    fn from(err: openai_api::Error) -> Self {
        match err {
            openai_api::Error::InvalidCredentials(msg) => ProbeError::Revoked(msg),
            openai_api::Error::QuotaExhausted(msg) => ProbeError::QuotaExhausted(msg),
            other => ProbeError::Transient(other.to_string()),
        }
    }
}

/// Queries the provider about one key.
///
/// Uses `Pin<Box<dyn Future>>` so the checker can hold an `Arc<dyn KeyProbe>`.
pub trait KeyProbe: Send + Sync {
    /// Probe `secret`. `initial` is true for a key that has never been checked.
    fn probe<'a>(
        &'a self,
        secret: &'a str,
        initial: bool,
    ) -> Pin<Box<dyn Future<Output = Result<KeyUpdate, ProbeError>> + Send + 'a>>;
}

/// Probe backed by the provider's billing and model endpoints.
pub struct OpenAiProbe {
    client: reqwest::Client,
    api_base: String,
}

impl OpenAiProbe {
    pub fn new(client: reqwest::Client, api_base: impl Into<String>) -> Self {
        Self {
            client,
            api_base: api_base.into(),
        }
    }
}

impl KeyProbe for OpenAiProbe {
    fn probe<'a>(
        &'a self,
        secret: &'a str,
        initial: bool,
    ) -> Pin<Box<dyn Future<Output = Result<KeyUpdate, ProbeError>> + Send + 'a>> {
        Box::pin(async move {
            if !initial {
                let usage = openai_api::get_usage(&self.client, &self.api_base, secret).await?;
                return Ok(KeyUpdate {
                    usage: Some(usage),
                    ..Default::default()
                });
            }

            let (subscription, usage, models) = tokio::try_join!(
                openai_api::get_subscription(&self.client, &self.api_base, secret),
                openai_api::get_usage(&self.client, &self.api_base, secret),
                openai_api::list_models(&self.client, &self.api_base, secret),
            )?;

            let update = KeyUpdate {
                is_trial: Some(!subscription.has_payment_method),
                is_gpt4: Some(models.has_prefix(PREMIUM_MODEL_PREFIX)),
                soft_limit: Some(subscription.soft_limit_usd),
                hard_limit: Some(subscription.hard_limit_usd),
                system_hard_limit: Some(subscription.system_hard_limit_usd),
                usage: Some(usage),
            };
            debug!(?update, "initial probe complete");
            Ok(update)
        })
    }
}
