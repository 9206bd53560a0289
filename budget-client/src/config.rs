//! Configuration loading for the BudgetBuddy client.
//!
//! All fields are required unless explicitly marked optional. No defaults.

use budget_cache::{CacheConfig, RollbackMode};
use budget_core::PageRequest;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable naming the config file when `--config` is absent.
pub const CONFIG_ENV_VAR: &str = "BUDGET_CLIENT_CONFIG";

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClientConfig {
    /// Server origin, e.g. `https://budgetbuddy.example.com`. Requests go to
    /// `{api_base_url}/api/...`.
    pub api_base_url: String,
    pub auth: AuthConfig,
    pub request_timeout_ms: u64,
    pub cache: CacheSection,
    pub transactions: TransactionsSection,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AuthConfig {
    pub bearer_token: Option<String>,
    pub session_cookie: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CacheSection {
    pub retry_delay_ms: u64,
    pub gc_grace_ms: u64,
    pub gc_interval_ms: u64,
    pub rollback_mode: RollbackMode,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TransactionsSection {
    pub page_size: u32,
    pub default_sort: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing configuration file path (use --config or BUDGET_CLIENT_CONFIG)")]
    MissingConfigPath,
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Invalid config value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

impl ClientConfig {
    pub fn load() -> Result<Self, ConfigError> {
        let path = config_path_from_args().or_else(config_path_from_env);
        let path = path.ok_or(ConfigError::MissingConfigPath)?;
        let config = Self::from_path(&path)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: ClientConfig = toml::from_str(contents)?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let base = self.api_base_url.trim();
        if base.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "api_base_url",
                reason: "must not be empty".to_string(),
            });
        }
        if !(base.starts_with("http://") || base.starts_with("https://")) {
            return Err(ConfigError::InvalidValue {
                field: "api_base_url",
                reason: "must start with http:// or https://".to_string(),
            });
        }
        let has_token = self
            .auth
            .bearer_token
            .as_deref()
            .is_some_and(|t| !t.trim().is_empty());
        let has_cookie = self
            .auth
            .session_cookie
            .as_deref()
            .is_some_and(|c| !c.trim().is_empty());
        if !has_token && !has_cookie {
            return Err(ConfigError::InvalidValue {
                field: "auth",
                reason: "bearer_token or session_cookie must be provided".to_string(),
            });
        }
        if self.request_timeout_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "request_timeout_ms",
                reason: "must be > 0".to_string(),
            });
        }
        if self.cache.gc_interval_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "cache.gc_interval_ms",
                reason: "must be > 0".to_string(),
            });
        }
        if self.transactions.page_size == 0 {
            return Err(ConfigError::InvalidValue {
                field: "transactions.page_size",
                reason: "must be > 0".to_string(),
            });
        }
        if let Err(reason) = validate_sort(&self.transactions.default_sort) {
            return Err(ConfigError::InvalidValue {
                field: "transactions.default_sort",
                reason,
            });
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// The cache settings as the in-process [`CacheConfig`].
    pub fn cache_config(&self) -> CacheConfig {
        CacheConfig::new()
            .with_retry_delay(Duration::from_millis(self.cache.retry_delay_ms))
            .with_gc_grace(Duration::from_millis(self.cache.gc_grace_ms))
            .with_gc_interval(Duration::from_millis(self.cache.gc_interval_ms))
            .with_rollback_mode(self.cache.rollback_mode)
    }

    /// First page of the transaction table with the configured size and order.
    pub fn default_page(&self) -> PageRequest {
        PageRequest::new(
            0,
            self.transactions.page_size,
            self.transactions.default_sort.clone(),
        )
    }
}

/// Check a `field,direction` sort expression.
pub fn validate_sort(sort: &str) -> Result<(), String> {
    let Some((field, direction)) = sort.split_once(',') else {
        return Err(format!("expected 'field,asc|desc', got '{}'", sort));
    };
    if field.is_empty() || !field.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(format!("invalid sort field '{}'", field));
    }
    if !matches!(direction.to_ascii_lowercase().as_str(), "asc" | "desc") {
        return Err(format!("invalid sort direction '{}'", direction));
    }
    Ok(())
}

fn config_path_from_env() -> Option<PathBuf> {
    std::env::var(CONFIG_ENV_VAR).ok().map(PathBuf::from)
}

fn config_path_from_args() -> Option<PathBuf> {
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--config" {
            return args.next().map(PathBuf::from);
        }
    }
    None
}
