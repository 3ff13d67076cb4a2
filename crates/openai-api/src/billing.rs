//! Account queries issued by the key health checker
//!
//! All three calls authenticate with the key being probed and share one
//! failure mapping (`classify_failure`). Usage is requested for the current
//! calendar month, ending tomorrow so today's spend is included.

use chrono::{Datelike, NaiveDate};
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::constants::{MODELS_PATH, SUBSCRIPTION_PATH, USAGE_PATH, is_quota_message};
use crate::error::{Error, Result};
use crate::types::{ModelList, Subscription, UsageReport};

/// Map a non-success probe response onto an `Error`.
///
/// 401 means the key is unusable. 429 is split by body: quota/billing
/// markers mean the key is exhausted, anything else is a transient rate limit.
pub fn classify_failure(status: u16, body: &str) -> Error {
    match status {
        401 => Error::InvalidCredentials(format!("key rejected ({status}): {body}")),
        429 if is_quota_message(body) => Error::QuotaExhausted(body.to_string()),
        429 => Error::RateLimited(body.to_string()),
        _ => Error::UnexpectedStatus {
            status,
            body: body.to_string(),
        },
    }
}

/// Usage window for `date`: first of the month through the following day.
pub fn usage_window(date: NaiveDate) -> (String, String) {
    let start = date.with_day(1).unwrap_or(date);
    let end = date.succ_opt().unwrap_or(date);
    (
        start.format("%Y-%m-%d").to_string(),
        end.format("%Y-%m-%d").to_string(),
    )
}

async fn get_json<T: DeserializeOwned>(
    client: &reqwest::Client,
    url: &str,
    key: &str,
) -> Result<T> {
    let response = client
        .get(url)
        .bearer_auth(key)
        .send()
        .await
        .map_err(|e| Error::Http(format!("probe request failed: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| String::from("<no body>"));
        return Err(classify_failure(status.as_u16(), &body));
    }

    response
        .json::<T>()
        .await
        .map_err(|e| Error::Parse(format!("invalid probe response from {url}: {e}")))
}

/// Fetch plan limits and payment status for `key`.
pub async fn get_subscription(
    client: &reqwest::Client,
    api_base: &str,
    key: &str,
) -> Result<Subscription> {
    let url = format!("{}{SUBSCRIPTION_PATH}", api_base.trim_end_matches('/'));
    get_json(client, &url, key).await
}

/// Fetch month-to-date usage for `key`, in USD.
pub async fn get_usage(client: &reqwest::Client, api_base: &str, key: &str) -> Result<f64> {
    let (start, end) = usage_window(chrono::Utc::now().date_naive());
    let url = format!(
        "{}{USAGE_PATH}?start_date={start}&end_date={end}",
        api_base.trim_end_matches('/')
    );
    let report: UsageReport = get_json(client, &url, key).await?;
    debug!(usage_usd = report.usd(), "usage fetched");
    Ok(report.usd())
}

/// List models visible to `key`.
pub async fn list_models(
    client: &reqwest::Client,
    api_base: &str,
    key: &str,
) -> Result<ModelList> {
    let url = format!("{}{MODELS_PATH}", api_base.trim_end_matches('/'));
    get_json(client, &url, key).await
}
