//! Key Record and the values derived from it
//!
//! `KeyRecord` is private to the pool. Everything that leaves the pool is
//! either a `PublicKey` (no secret) or a `SelectedKey` (secret still wrapped
//! in `Secret`, so it cannot reach a log line by accident).

use common::Secret;
use serde::Serialize;
use sha2::{Digest, Sha256};

/// Capability a request may require of its key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    /// Provisioned for the premium (GPT-4) model tier.
    Premium,
}

/// Stable fingerprint of a secret: `oai-` plus the first 8 hex chars of SHA-256.
pub fn key_hash(secret: &str) -> String {
    let digest = format!("{:x}", Sha256::digest(secret.as_bytes()));
    format!("oai-{}", &digest[..8])
}

/// One pooled credential and its health/usage state.
#[derive(Debug)]
pub(crate) struct KeyRecord {
    pub secret: Secret<String>,
    pub hash: String,
    pub is_trial: bool,
    pub is_gpt4: bool,
    pub is_disabled: bool,
    pub soft_limit: f64,
    pub hard_limit: f64,
    pub system_hard_limit: f64,
    pub usage: f64,
    pub prompt_count: u64,
    /// Epoch millis; 0 = never.
    pub last_used: u64,
    /// Epoch millis; 0 = never.
    pub last_checked: u64,
}

impl KeyRecord {
    pub fn new(secret: String) -> Self {
        let hash = key_hash(&secret);
        Self {
            secret: Secret::new(secret),
            hash,
            is_trial: false,
            is_gpt4: false,
            is_disabled: false,
            soft_limit: 0.0,
            hard_limit: 0.0,
            system_hard_limit: 0.0,
            usage: 0.0,
            prompt_count: 0,
            last_used: 0,
            last_checked: 0,
        }
    }

    pub fn has(&self, capability: Option<Capability>) -> bool {
        match capability {
            None => true,
            Some(Capability::Premium) => self.is_gpt4,
        }
    }

    pub fn to_public(&self) -> PublicKey {
        PublicKey {
            hash: self.hash.clone(),
            is_trial: self.is_trial,
            is_gpt4: self.is_gpt4,
            is_disabled: self.is_disabled,
            soft_limit: self.soft_limit,
            hard_limit: self.hard_limit,
            system_hard_limit: self.system_hard_limit,
            usage: self.usage,
            prompt_count: self.prompt_count,
            last_used: self.last_used,
            last_checked: self.last_checked,
        }
    }

    /// Merge the fields the checker learned. Usage is only ever written here,
    /// so it stays constant between checks; it drops at a billing-month rollover.
    pub fn merge(&mut self, update: &KeyUpdate) {
        if let Some(v) = update.is_trial {
            self.is_trial = v;
        }
        if let Some(v) = update.is_gpt4 {
            self.is_gpt4 = v;
        }
        if let Some(v) = update.soft_limit {
            self.soft_limit = v;
        }
        if let Some(v) = update.hard_limit {
            self.hard_limit = v;
        }
        if let Some(v) = update.system_hard_limit {
            self.system_hard_limit = v;
        }
        if let Some(v) = update.usage {
            self.usage = v;
        }
    }
}

/// Read-only snapshot of a key. Carries no secret.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PublicKey {
    pub hash: String,
    pub is_trial: bool,
    pub is_gpt4: bool,
    pub is_disabled: bool,
    pub soft_limit: f64,
    pub hard_limit: f64,
    pub system_hard_limit: f64,
    pub usage: f64,
    pub prompt_count: u64,
    pub last_used: u64,
    pub last_checked: u64,
}

/// Partial update produced by a health probe. `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct KeyUpdate {
    pub is_trial: Option<bool>,
    pub is_gpt4: Option<bool>,
    pub soft_limit: Option<f64>,
    pub hard_limit: Option<f64>,
    pub system_hard_limit: Option<f64>,
    pub usage: Option<f64>,
}

/// A key handed to the request path.
#[derive(Debug, Clone)]
pub struct SelectedKey {
    pub hash: String,
    pub secret: Secret<String>,
    pub is_trial: bool,
}
