//! Credential pool for OpenAI API keys
//!
//! Pools many provider keys behind one upstream identity: selection prefers
//! trial keys, then the least recently used key; keys are retired one-way on
//! revocation or quota exhaustion; a background checker keeps limits, usage
//! and capability flags current.
//!
//! Key lifecycle:
//! 1. Startup: `KeyPool::new` fingerprints each configured secret, all keys enabled and unchecked
//! 2. Checker probes each key → capability flags, limits and usage merged via `apply_health_update`
//! 3. Request path selects a key with `select`, then `record_prompt_served` on success
//! 4. Upstream 401/403 or quota 429 → `report_error` → key disabled for the process lifetime
//! 5. Checker disables keys whose usage reaches their hard limit

pub mod checker;
pub mod error;
pub mod key;
pub mod pool;
pub mod probe;
pub mod quota;

pub use checker::{CheckerConfig, spawn_key_checker};
pub use error::{Error, Result};
pub use key::{Capability, KeyUpdate, PublicKey, SelectedKey, key_hash};
pub use pool::{KeyPool, PoolSummary};
pub use probe::{KeyProbe, OpenAiProbe, ProbeError};
pub use quota::{ErrorClassification, classify_status};
