//! Controller configuration.
//!
//! Settings are read from `controller.toml` and layered
//! (file → environment → CLI):
//!
//! ```toml
//! [controller]
//! max_concurrent_reconciles = 1
//! cache_sync_timeout_secs = 10
//! reconcile_timeout_secs = 30
//! resync_period_secs = 300
//!
//! [backoff]
//! base_delay_ms = 5
//! max_delay_secs = 1000
//!
//! [logging]
//! level = "info"
//! format = "pretty"
//! ```
//!
//! A `resync_period_secs` of 0 disables periodic resync.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_FILE_NAME: &str = "controller.toml";

pub const ENV_MAX_CONCURRENT_RECONCILES: &str = "FINETUNE_MAX_CONCURRENT_RECONCILES";
pub const ENV_CACHE_SYNC_TIMEOUT_SECS: &str = "FINETUNE_CACHE_SYNC_TIMEOUT_SECS";
pub const ENV_LOG_LEVEL: &str = "FINETUNE_LOG_LEVEL";
pub const ENV_LOG_FORMAT: &str = "FINETUNE_LOG_FORMAT";

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl std::fmt::Display for LogFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogFormat::Pretty => write!(f, "pretty"),
            LogFormat::Json => write!(f, "json"),
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pretty" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            _ => anyhow::bail!("Invalid log format '{}'. Valid values: pretty, json", s),
        }
    }
}

/// Scheduler settings for the reconcile loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControllerSection {
    /// Reconciles for distinct experiments allowed to run at once
    #[serde(default = "default_max_concurrent_reconciles")]
    pub max_concurrent_reconciles: usize,
    /// How long to wait for the store to sync before the first reconcile
    #[serde(default = "default_cache_sync_timeout_secs")]
    pub cache_sync_timeout_secs: u64,
    /// Deadline for one reconcile invocation
    #[serde(default = "default_reconcile_timeout_secs")]
    pub reconcile_timeout_secs: u64,
    /// Period for re-enqueueing every experiment (0 disables)
    #[serde(default = "default_resync_period_secs")]
    pub resync_period_secs: u64,
}

fn default_max_concurrent_reconciles() -> usize {
    1
}

fn default_cache_sync_timeout_secs() -> u64 {
    10
}

fn default_reconcile_timeout_secs() -> u64 {
    30
}

fn default_resync_period_secs() -> u64 {
    300
}

impl Default for ControllerSection {
    fn default() -> Self {
        Self {
            max_concurrent_reconciles: default_max_concurrent_reconciles(),
            cache_sync_timeout_secs: default_cache_sync_timeout_secs(),
            reconcile_timeout_secs: default_reconcile_timeout_secs(),
            resync_period_secs: default_resync_period_secs(),
        }
    }
}

/// Retry backoff for failed reconciles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackoffSection {
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_secs")]
    pub max_delay_secs: u64,
}

fn default_base_delay_ms() -> u64 {
    5
}

fn default_max_delay_secs() -> u64 {
    1000
}

impl Default for BackoffSection {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay_ms(),
            max_delay_secs: default_max_delay_secs(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingSection {
    /// Default filter directive when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ControllerConfig {
    #[serde(default)]
    pub controller: ControllerSection,
    #[serde(default)]
    pub backoff: BackoffSection,
    #[serde(default)]
    pub logging: LoggingSection,
}

/// CLI overrides applied last.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub max_concurrent_reconciles: Option<usize>,
    pub verbose: bool,
    pub log_format: Option<LogFormat>,
}

impl ControllerConfig {
    /// Parse a TOML document.
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse controller configuration")
    }

    /// Load from a file. A missing file yields the defaults.
    pub fn load_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_toml(&content)
            .with_context(|| format!("Invalid config file {}", path.display()))
    }

    /// Full layered load: file, then environment, then CLI overrides.
    pub fn load(path: Option<&Path>, overrides: &CliOverrides) -> Result<Self> {
        let path: PathBuf = path
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from(CONFIG_FILE_NAME));
        let mut config = Self::load_file(&path)?;
        config.apply_env(|name| std::env::var(name).ok())?;
        config.apply_cli(overrides);
        Ok(config)
    }

    /// Apply environment overrides through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup(ENV_MAX_CONCURRENT_RECONCILES) {
            self.controller.max_concurrent_reconciles = value
                .parse()
                .with_context(|| format!("{} must be an integer", ENV_MAX_CONCURRENT_RECONCILES))?;
        }
        if let Some(value) = lookup(ENV_CACHE_SYNC_TIMEOUT_SECS) {
            self.controller.cache_sync_timeout_secs = value
                .parse()
                .with_context(|| format!("{} must be an integer", ENV_CACHE_SYNC_TIMEOUT_SECS))?;
        }
        if let Some(value) = lookup(ENV_LOG_LEVEL) {
            self.logging.level = value;
        }
        if let Some(value) = lookup(ENV_LOG_FORMAT) {
            self.logging.format = value.parse()?;
        }
        Ok(())
    }

    pub fn apply_cli(&mut self, overrides: &CliOverrides) {
        if let Some(max) = overrides.max_concurrent_reconciles {
            self.controller.max_concurrent_reconciles = max;
        }
        if overrides.verbose {
            self.logging.level = "debug".to_string();
        }
        if let Some(format) = overrides.log_format {
            self.logging.format = format;
        }
    }

    /// Checks the configuration. Hard errors fail; soft issues come back as warnings.
    pub fn validate(&self) -> Result<Vec<String>> {
        let mut warnings = Vec::new();
        let controller = &self.controller;

        if controller.max_concurrent_reconciles == 0 {
            anyhow::bail!("controller.max_concurrent_reconciles must be at least 1");
        }
        if controller.reconcile_timeout_secs == 0 {
            anyhow::bail!("controller.reconcile_timeout_secs must be at least 1");
        }
        if controller.max_concurrent_reconciles > 1 {
            warnings.push(format!(
                "max_concurrent_reconciles = {}: concurrent reconciles increase write contention on the store",
                controller.max_concurrent_reconciles
            ));
        }
        if controller.cache_sync_timeout_secs == 0 {
            warnings.push(
                "cache_sync_timeout_secs = 0: the controller will fail unless the store is already synced"
                    .to_string(),
            );
        }
        if self.backoff.base_delay_ms == 0 {
            warnings.push("backoff.base_delay_ms = 0: failed reconciles retry immediately".to_string());
        }
        if Duration::from_millis(self.backoff.base_delay_ms) > self.max_delay() {
            warnings.push("backoff.base_delay_ms exceeds backoff.max_delay_secs".to_string());
        }
        Ok(warnings)
    }

    pub fn cache_sync_timeout(&self) -> Duration {
        Duration::from_secs(self.controller.cache_sync_timeout_secs)
    }

    pub fn reconcile_timeout(&self) -> Duration {
        Duration::from_secs(self.controller.reconcile_timeout_secs)
    }

    pub fn resync_period(&self) -> Option<Duration> {
        match self.controller.resync_period_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }

    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.backoff.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_secs(self.backoff.max_delay_secs)
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize controller configuration")
    }
}
