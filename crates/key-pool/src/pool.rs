//! Credential pool and key selection
//!
//! The pool owns every `KeyRecord` behind a single `RwLock`. Each public
//! operation takes the lock once, does O(1)/O(n) bookkeeping, and releases it;
//! no lock is ever held across network I/O. The identity set is fixed at
//! construction: keys are never added or removed, only disabled.
//!
//! Selection order: trial keys first, then least recently used. `select`
//! stamps `last_used` under the write lock, so two concurrent selections
//! observe each other's stamp.

use std::time::{SystemTime, UNIX_EPOCH};

use common::Secret;
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};
use crate::key::{Capability, KeyRecord, KeyUpdate, PublicKey, SelectedKey};
use crate::quota::ErrorClassification;

pub(crate) fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// `1 - Σ min(usage, hard_limit) / Σ hard_limit`, clamped to `[0, 1]`.
/// An empty set or a zero limit total counts as fully exhausted.
fn remaining_fraction(keys: impl Iterator<Item = (f64, f64)>) -> f64 {
    let (used, limit) = keys.fold((0.0_f64, 0.0_f64), |(used, limit), (usage, hard)| {
        (used + usage.min(hard).max(0.0), limit + hard)
    });
    if limit <= 0.0 || !limit.is_finite() {
        return 0.0;
    }
    (1.0 - used / limit).clamp(0.0, 1.0)
}

fn no_key_message(required: Option<Capability>) -> &'static str {
    match required {
        None => "No keys available",
        Some(Capability::Premium) => "No GPT-4 keys available",
    }
}

/// What the checker needs to probe one key.
pub(crate) struct ProbeTarget {
    pub hash: String,
    pub secret: Secret<String>,
    pub last_checked: u64,
}

/// Aggregate view of the pool for the status and health endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct PoolSummary {
    /// "healthy" (every key active), "degraded", or "unhealthy" (none active)
    pub status: &'static str,
    pub total: usize,
    pub active: usize,
    pub trial: usize,
    pub gpt4: usize,
    pub disabled: usize,
    pub unchecked: usize,
    pub prompts_served: u64,
    pub remaining_quota: f64,
    pub remaining_gpt4_quota: f64,
    pub checking_keys: bool,
}

impl PoolSummary {
    /// Derive the aggregate from a public listing. Trial and GPT-4 counts
    /// cover active keys only.
    pub fn from_keys(keys: &[PublicKey], check_keys: bool) -> Self {
        let active: Vec<&PublicKey> = keys.iter().filter(|k| !k.is_disabled).collect();
        let unchecked = keys.iter().filter(|k| k.last_checked == 0).count();
        let status = if !keys.is_empty() && active.len() == keys.len() {
            "healthy"
        } else if !active.is_empty() {
            "degraded"
        } else {
            "unhealthy"
        };

        Self {
            status,
            total: keys.len(),
            active: active.len(),
            trial: active.iter().filter(|k| k.is_trial).count(),
            gpt4: active.iter().filter(|k| k.is_gpt4).count(),
            disabled: keys.len() - active.len(),
            unchecked,
            prompts_served: keys.iter().map(|k| k.prompt_count).sum(),
            remaining_quota: remaining_fraction(active.iter().map(|k| (k.usage, k.hard_limit))),
            remaining_gpt4_quota: remaining_fraction(
                active
                    .iter()
                    .filter(|k| k.is_gpt4)
                    .map(|k| (k.usage, k.hard_limit)),
            ),
            checking_keys: check_keys && active.iter().any(|k| k.last_checked == 0),
        }
    }
}

/// Pool of provider keys shared by the request path and the health checker.
pub struct KeyPool {
    keys: RwLock<Vec<KeyRecord>>,
    check_keys: bool,
}

impl KeyPool {
    /// Build the pool from raw secrets.
    ///
    /// Entries are trimmed; blanks and duplicates are dropped (first occurrence
    /// wins, preserving input order). Fails with `Configuration` when nothing
    /// usable remains.
    pub fn new<I, S>(secrets: I, check_keys: bool) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut records: Vec<KeyRecord> = Vec::new();
        for raw in secrets {
            let secret = raw.as_ref().trim();
            if secret.is_empty() {
                continue;
            }
            let record = KeyRecord::new(secret.to_owned());
            if records.iter().any(|r| r.hash == record.hash) {
                continue;
            }
            records.push(record);
        }

        if records.is_empty() {
            return Err(Error::Configuration(
                "no API keys configured (set OPENAI_KEY or keys.keys_file)".into(),
            ));
        }

        info!(keys = records.len(), check_keys, "key pool initialized");
        Ok(Self {
            keys: RwLock::new(records),
            check_keys,
        })
    }

    /// Build the pool from a comma-separated key list.
    pub fn from_csv(raw: &str, check_keys: bool) -> Result<Self> {
        Self::new(raw.split(','), check_keys)
    }

    /// Whether the health checker is enabled for this pool.
    pub fn check_keys(&self) -> bool {
        self.check_keys
    }

    /// Snapshot of every key without secrets.
    pub async fn list_public(&self) -> Vec<PublicKey> {
        self.keys.read().await.iter().map(KeyRecord::to_public).collect()
    }

    /// Pick a key for one request.
    ///
    /// Filters to enabled keys with `required`; returns the first trial key if
    /// any, else the key with the oldest `last_used` (ties go to input order).
    /// Stamps `last_used` on the chosen key.
    pub async fn select(&self, required: Option<Capability>) -> Result<SelectedKey> {
        let mut keys = self.keys.write().await;

        let eligible = |k: &KeyRecord| !k.is_disabled && k.has(required);
        let chosen = keys
            .iter()
            .position(|k| eligible(k) && k.is_trial)
            .or_else(|| {
                keys.iter()
                    .enumerate()
                    .filter(|(_, k)| eligible(k))
                    .min_by_key(|(_, k)| k.last_used)
                    .map(|(i, _)| i)
            });

        let Some(idx) = chosen else {
            let message = no_key_message(required);
            warn!(?required, "{message}");
            return Err(Error::NoKeyAvailable(message.to_string()));
        };

        let key = &mut keys[idx];
        key.last_used = now_millis();
        debug!(key = %key.hash, trial = key.is_trial, "key selected");
        Ok(SelectedKey {
            hash: key.hash.clone(),
            secret: key.secret.clone(),
            is_trial: key.is_trial,
        })
    }

    /// Merge checker results into a key and stamp `last_checked`.
    ///
    /// Never re-enables a disabled key.
    pub async fn apply_health_update(&self, hash: &str, update: KeyUpdate) -> Result<()> {
        let mut keys = self.keys.write().await;
        let Some(key) = keys.iter_mut().find(|k| k.hash == hash) else {
            error!(key = hash, "health update for a key the pool does not hold");
            return Err(Error::UnknownKey(hash.to_string()));
        };
        key.merge(&update);
        key.last_checked = now_millis();
        debug!(
            key = hash,
            trial = key.is_trial,
            gpt4 = key.is_gpt4,
            usage = key.usage,
            hard_limit = key.hard_limit,
            "key health updated"
        );
        Ok(())
    }

    /// Retire a key for the rest of the process lifetime.
    ///
    /// Returns true only for the call that performed the transition; later
    /// calls (and unknown hashes) are no-ops.
    pub async fn disable(&self, hash: &str, reason: &'static str) -> bool {
        let mut keys = self.keys.write().await;
        let Some(key) = keys.iter_mut().find(|k| k.hash == hash) else {
            warn!(key = hash, reason, "disable requested for unknown key");
            return false;
        };
        if key.is_disabled {
            return false;
        }
        key.is_disabled = true;
        warn!(key = hash, reason, "key disabled");
        metrics::counter!("key_pool_keys_disabled_total", "reason" => reason).increment(1);
        true
    }

    /// Count one completed prompt against a key. Unknown hashes are ignored.
    pub async fn record_prompt_served(&self, hash: &str) {
        let mut keys = self.keys.write().await;
        if let Some(key) = keys.iter_mut().find(|k| k.hash == hash) {
            key.prompt_count += 1;
            metrics::counter!("key_pool_prompts_served_total").increment(1);
        }
    }

    /// Apply the pool consequence of a failed upstream call.
    pub async fn report_error(&self, hash: &str, classification: ErrorClassification) {
        match classification {
            ErrorClassification::Permanent => {
                self.disable(hash, "revoked").await;
            }
            ErrorClassification::QuotaExceeded => {
                self.disable(hash, "quota").await;
            }
            ErrorClassification::PremiumUnavailable => {
                let mut keys = self.keys.write().await;
                if let Some(key) = keys.iter_mut().find(|k| k.hash == hash)
                    && key.is_gpt4
                {
                    key.is_gpt4 = false;
                    info!(key = hash, "premium model denied, key downgraded");
                }
            }
            ErrorClassification::Transient => {
                debug!(key = hash, "transient upstream error, no pool action");
            }
        }
    }

    /// True if at least one key is enabled.
    pub async fn any_available(&self) -> bool {
        self.keys.read().await.iter().any(|k| !k.is_disabled)
    }

    /// True if checking is enabled and some enabled key has never been checked.
    pub async fn any_unchecked(&self) -> bool {
        self.check_keys
            && self
                .keys
                .read()
                .await
                .iter()
                .any(|k| !k.is_disabled && k.last_checked == 0)
    }

    /// Remaining quota across enabled keys matching `filter`, in `[0, 1]`.
    pub async fn remaining_quota_fraction(&self, filter: Option<Capability>) -> f64 {
        let keys = self.keys.read().await;
        remaining_fraction(
            keys.iter()
                .filter(|k| !k.is_disabled && k.has(filter))
                .map(|k| (k.usage, k.hard_limit)),
        )
    }

    /// Aggregate counts derived from `list_public`.
    pub async fn summary(&self) -> PoolSummary {
        PoolSummary::from_keys(&self.list_public().await, self.check_keys)
    }

    /// True if the key has a known hard limit and usage has reached it.
    pub(crate) async fn over_hard_limit(&self, hash: &str) -> bool {
        self.keys
            .read()
            .await
            .iter()
            .find(|k| k.hash == hash)
            .is_some_and(|k| k.hard_limit > 0.0 && k.usage >= k.hard_limit)
    }

    /// Enabled keys in input order, with secrets, for the checker.
    pub(crate) async fn probe_targets(&self) -> Vec<ProbeTarget> {
        self.keys
            .read()
            .await
            .iter()
            .filter(|k| !k.is_disabled)
            .map(|k| ProbeTarget {
                hash: k.hash.clone(),
                secret: k.secret.clone(),
                last_checked: k.last_checked,
            })
            .collect()
    }
}
