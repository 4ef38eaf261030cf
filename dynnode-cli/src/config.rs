//! Configuration management for the dynnode CLI

use anyhow::{anyhow, Context, Result};
use dynnode_common::{clamp_timeout_ms, DEFAULT_TIMEOUT_MS};
use dynnode_sandbox::{ControllerConfig, EntryConvention, ResourceLimits, DEFAULT_LOG_CAPACITY};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Overrides `store.path`
pub const STORE_PATH_ENV: &str = "DYNNODE_STORE_PATH";

/// Application configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub runner: RunnerConfig,
    #[serde(default)]
    pub store: StoreConfig,
}

/// Runner configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// Default deadline, clamped to 300..=10000
    #[serde(default = "RunnerConfig::default_timeout_ms")]
    pub timeout_ms: u64,
    /// `auto` or `require-main`
    #[serde(default)]
    pub entry: EntryConvention,
    /// Grace past the deadline before an unresponsive worker is destroyed
    #[serde(default = "RunnerConfig::default_hard_kill_grace", with = "humantime_serde")]
    pub hard_kill_grace: Duration,
    #[serde(default = "RunnerConfig::default_log_capacity")]
    pub log_capacity: usize,
    /// V8 heap ceiling in MiB; 0 disables it
    #[serde(default = "RunnerConfig::default_max_memory_mb")]
    pub max_memory_mb: usize,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            timeout_ms: Self::default_timeout_ms(),
            entry: EntryConvention::default(),
            hard_kill_grace: Self::default_hard_kill_grace(),
            log_capacity: Self::default_log_capacity(),
            max_memory_mb: Self::default_max_memory_mb(),
        }
    }
}

impl RunnerConfig {
    fn default_timeout_ms() -> u64 {
        DEFAULT_TIMEOUT_MS
    }

    fn default_hard_kill_grace() -> Duration {
        Duration::from_secs(1)
    }

    fn default_log_capacity() -> usize {
        DEFAULT_LOG_CAPACITY
    }

    fn default_max_memory_mb() -> usize {
        128
    }

    pub fn timeout_ms(&self) -> u64 {
        clamp_timeout_ms(self.timeout_ms)
    }

    /// `max_memory_mb = 0` lifts the heap ceiling
    pub fn limits(&self) -> ResourceLimits {
        if self.max_memory_mb == 0 {
            return ResourceLimits::unlimited();
        }
        ResourceLimits {
            max_memory_bytes: Some(self.max_memory_mb * 1024 * 1024),
        }
    }

    pub fn controller_config(&self) -> ControllerConfig {
        ControllerConfig {
            log_capacity: self.log_capacity.max(1),
            hard_kill_grace: self.hard_kill_grace,
            limits: self.limits(),
            entry: self.entry,
        }
    }
}

/// Post store configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "StoreConfig::default_path")]
    pub path: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: Self::default_path(),
        }
    }
}

impl StoreConfig {
    fn default_path() -> String {
        "~/.local/share/dynnode/posts.json".to_string()
    }
}

impl AppConfig {
    /// Load from the default location, creating it with defaults when missing
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(config_path: &Path) -> Result<Self> {
        if !config_path.exists() {
            let config = Self::default();
            config.save_to(config_path)?;
            return Ok(config);
        }

        let content = std::fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config {}", config_path.display()))?;
        let config: AppConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config {}", config_path.display()))?;

        Ok(config)
    }

    pub fn save_to(&self, config_path: &Path) -> Result<()> {
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create config directory")?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(config_path, content).context("Failed to write config")?;

        Ok(())
    }

    /// Get the configuration file path
    pub fn config_path() -> Result<PathBuf> {
        let home = dirs::home_dir().ok_or_else(|| anyhow!("Cannot determine home directory"))?;
        Ok(home.join(".config").join("dynnode").join("config.toml"))
    }

    /// Store file, honoring `DYNNODE_STORE_PATH`
    pub fn store_path(&self) -> Result<PathBuf> {
        match std::env::var(STORE_PATH_ENV) {
            Ok(path) if !path.trim().is_empty() => expand_path(path.trim()),
            _ => expand_path(&self.store.path),
        }
    }
}

fn expand_path(path: &str) -> Result<PathBuf> {
    if let Some(rest) = path.strip_prefix("~/") {
        let home = dirs::home_dir().ok_or_else(|| anyhow!("Cannot determine home directory"))?;
        Ok(home.join(rest))
    } else {
        Ok(PathBuf::from(path))
    }
}
