//! Configuration types and loading
//!
//! Config precedence: CLI args > env vars > config file > defaults.
//! Provider keys come from the OPENAI_KEY env var or `keys.keys_file`,
//! never from the TOML itself.

use common::Secret;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// CJK ideographs and kana/hangul.
pub const DEFAULT_REJECT_PATTERN: &str = r"[\p{Han}\p{Hiragana}\p{Katakana}\p{Hangul}]";

/// Root configuration
#[derive(Debug, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub proxy: ProxyConfig,
    #[serde(default)]
    pub keys: KeysConfig,
    #[serde(default)]
    pub policy: PolicyConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
}

/// HTTP listener and upstream settings
#[derive(Debug, Deserialize)]
pub struct ProxyConfig {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,
    #[serde(default = "default_upstream_url")]
    pub upstream_url: String,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

/// Key source and health checker settings
#[derive(Debug, Deserialize)]
pub struct KeysConfig {
    #[serde(default = "default_true")]
    pub check_keys: bool,
    /// File holding the comma-separated key list (alternative to OPENAI_KEY)
    #[serde(default)]
    pub keys_file: Option<PathBuf>,
    #[serde(default = "default_check_period")]
    pub check_period_secs: u64,
    #[serde(default = "default_check_spacing")]
    pub min_check_spacing_ms: u64,
    #[serde(default = "default_max_concurrent_checks")]
    pub max_concurrent_checks: usize,
    /// Raw comma-separated key list, resolved at load time
    #[serde(skip)]
    pub raw: Option<Secret<String>>,
}

/// Request policy applied by the translation pipeline
#[derive(Debug, Deserialize)]
pub struct PolicyConfig {
    #[serde(default = "default_model")]
    pub default_model: String,
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,
    #[serde(default)]
    pub reject_disallowed: bool,
    #[serde(default = "default_reject_pattern")]
    pub reject_pattern: String,
    #[serde(default = "default_reject_message")]
    pub reject_message: String,
}

#[derive(Debug, Deserialize)]
pub struct RateLimitConfig {
    /// Per client IP, with a burst of the same size; 0 disables the limiter
    #[serde(default = "default_requests_per_minute")]
    pub requests_per_minute: u32,
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 7860))
}

fn default_upstream_url() -> String {
    openai_api::DEFAULT_API_BASE.to_string()
}

fn default_timeout() -> u64 {
    60
}

fn default_max_connections() -> usize {
    1000
}

fn default_true() -> bool {
    true
}

fn default_check_period() -> u64 {
    300
}

fn default_check_spacing() -> u64 {
    3000
}

fn default_max_concurrent_checks() -> usize {
    2
}

fn default_model() -> String {
    "gpt-3.5-turbo".to_string()
}

fn default_max_output_tokens() -> u32 {
    300
}

fn default_reject_pattern() -> String {
    DEFAULT_REJECT_PATTERN.to_string()
}

fn default_reject_message() -> String {
    "This proxy only accepts English-language prompts.".to_string()
}

fn default_requests_per_minute() -> u32 {
    4
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            upstream_url: default_upstream_url(),
            timeout_secs: default_timeout(),
            max_connections: default_max_connections(),
        }
    }
}

impl Default for KeysConfig {
    fn default() -> Self {
        Self {
            check_keys: true,
            keys_file: None,
            check_period_secs: default_check_period(),
            min_check_spacing_ms: default_check_spacing(),
            max_concurrent_checks: default_max_concurrent_checks(),
            raw: None,
        }
    }
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            default_model: default_model(),
            max_output_tokens: default_max_output_tokens(),
            reject_disallowed: false,
            reject_pattern: default_reject_pattern(),
            reject_message: default_reject_message(),
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_minute: default_requests_per_minute(),
        }
    }
}

impl KeysConfig {
    pub fn checker_config(&self) -> key_pool::CheckerConfig {
        key_pool::CheckerConfig {
            check_period: Duration::from_secs(self.check_period_secs),
            min_spacing: Duration::from_millis(self.min_check_spacing_ms),
            max_concurrent: self.max_concurrent_checks,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file, then overlay environment variables.
    ///
    /// Key list resolution order:
    /// 1. OPENAI_KEY env var
    /// 2. keys_file path from config
    ///
    /// A missing key list is not an error here; the pool rejects it at startup.
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&contents)?;
        config.validate()?;

        if let Ok(keys) = std::env::var("OPENAI_KEY") {
            config.keys.raw = Some(Secret::new(keys));
        } else if let Some(ref keys_file) = config.keys.keys_file {
            let keys = std::fs::read_to_string(keys_file).map_err(|e| {
                common::Error::Config(format!(
                    "failed to read keys.keys_file {}: {e}",
                    keys_file.display()
                ))
            })?;
            // one key per line is accepted as well as comma-separated
            let keys = keys.trim().replace('\n', ",");
            if !keys.is_empty() {
                config.keys.raw = Some(Secret::new(keys));
            }
        }

        Ok(config)
    }

    fn validate(&self) -> common::Result<()> {
        if !self.proxy.upstream_url.starts_with("http://")
            && !self.proxy.upstream_url.starts_with("https://")
        {
            return Err(common::Error::Config(format!(
                "proxy.upstream_url must start with http:// or https://, got: {}",
                self.proxy.upstream_url
            )));
        }
        if self.proxy.timeout_secs == 0 {
            return Err(common::Error::Config(
                "proxy.timeout_secs must be greater than 0".into(),
            ));
        }
        if self.proxy.max_connections == 0 {
            return Err(common::Error::Config(
                "proxy.max_connections must be greater than 0".into(),
            ));
        }
        if self.keys.check_period_secs == 0 {
            return Err(common::Error::Config(
                "keys.check_period_secs must be greater than 0".into(),
            ));
        }
        if self.keys.max_concurrent_checks == 0 {
            return Err(common::Error::Config(
                "keys.max_concurrent_checks must be greater than 0".into(),
            ));
        }
        if self.policy.max_output_tokens == 0 {
            return Err(common::Error::Config(
                "policy.max_output_tokens must be greater than 0".into(),
            ));
        }
        if self.policy.default_model.trim().is_empty() {
            return Err(common::Error::Config(
                "policy.default_model must not be empty".into(),
            ));
        }
        Ok(())
    }

    /// Resolve config file path from CLI arg or CONFIG_PATH env var.
    pub fn resolve_path(cli_path: Option<&str>) -> PathBuf {
        if let Some(p) = cli_path {
            return PathBuf::from(p);
        }
        if let Ok(p) = std::env::var("CONFIG_PATH") {
            return PathBuf::from(p);
        }
        PathBuf::from("kobold-proxy.toml")
    }
}
