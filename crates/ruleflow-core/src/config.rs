//! RuleFlow configuration system.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::Result;

/// Root configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleFlowConfig {
    #[serde(default = "default_db_path")]
    pub db_path: String,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub webhook: WebhookConfig,
}

fn default_db_path() -> String { "~/.ruleflow/ruleflow.db".into() }

impl Default for RuleFlowConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            scheduler: SchedulerConfig::default(),
            webhook: WebhookConfig::default(),
        }
    }
}

impl RuleFlowConfig {
    /// Load config from the default path (~/.ruleflow/config.toml).
    pub fn load() -> Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| crate::error::RuleFlowError::Config(format!("Failed to read config: {e}")))?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| crate::error::RuleFlowError::Config(format!("Failed to parse config: {e}")))?;
        Ok(config)
    }

    /// Save config to the default path.
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::default_path())
    }

    /// Save config to a specific path.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| crate::error::RuleFlowError::Config(format!("Failed to serialize config: {e}")))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Get the default config path.
    pub fn default_path() -> PathBuf {
        Self::home_dir().join("config.toml")
    }

    /// Get the RuleFlow home directory.
    pub fn home_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".ruleflow")
    }
}

/// Scheduler loop configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Poll interval for the scheduled-action loop, milliseconds.
    /// Delay precision is bounded by this interval, not millisecond-exact.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Upper bound on a single action execution, seconds. A handler that
    /// overruns is marked failed with a timeout error.
    #[serde(default = "default_executor_timeout_secs")]
    pub executor_timeout_secs: u64,
}

fn default_poll_interval_ms() -> u64 { 10_000 }
fn default_executor_timeout_secs() -> u64 { 30 }

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            executor_timeout_secs: default_executor_timeout_secs(),
        }
    }
}

/// Outbound webhook dispatch configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookConfig {
    /// Per-request HTTP timeout, seconds.
    #[serde(default = "default_http_timeout_secs")]
    pub http_timeout_secs: u64,
}

fn default_http_timeout_secs() -> u64 { 10 }

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            http_timeout_secs: default_http_timeout_secs(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RuleFlowConfig::default();
        assert_eq!(config.scheduler.poll_interval_ms, 10_000);
        assert_eq!(config.scheduler.executor_timeout_secs, 30);
        assert!(config.db_path.ends_with("ruleflow.db"));
    }

    #[test]
    fn test_save_to_roundtrip() {
        let dir = std::env::temp_dir().join("ruleflow-config-save");
        std::fs::create_dir_all(&dir).ok();
        let path = dir.join("config.toml");

        let mut config = RuleFlowConfig::default();
        config.scheduler.poll_interval_ms = 1234;
        config.save_to(&path).unwrap();

        let loaded = RuleFlowConfig::load_from(&path).unwrap();
        assert_eq!(loaded.scheduler.poll_interval_ms, 1234);
        assert_eq!(loaded.webhook.http_timeout_secs, 10);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config: RuleFlowConfig = toml::from_str(
            r#"
            [scheduler]
            poll_interval_ms = 500
            "#,
        )
        .unwrap();
        assert_eq!(config.scheduler.poll_interval_ms, 500);
        assert_eq!(config.scheduler.executor_timeout_secs, 30);
        assert_eq!(config.webhook.http_timeout_secs, 10);
    }
}
