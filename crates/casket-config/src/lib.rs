//! # casket-config
//!
//! Configuration management for Casket.
//!
//! Loads configuration from:
//! 1. `~/.casket/config.toml` (global)
//! 2. `.casket/config.toml` (project-local, overrides global)
//! 3. Environment variables (highest priority)
//!
//! The loaded values are handed to the store by explicit injection; nothing
//! in the core reads this crate's state ambiently.

pub mod logging;
pub mod testing;

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use casket_store::addressing::{default_allow_list, SAFE_EXTENSION};
use casket_store::StoreOptions;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub storage: StorageConfig,
    pub extensions: ExtensionConfig,
    pub ledger: LedgerConfig,
}

impl Config {
    /// Load config from standard locations
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Config::default();

        // 1. Load global config (~/.casket/config.toml)
        if let Some(global_path) = Self::global_config_path() {
            if global_path.exists() {
                debug!("Loading global config from {:?}", global_path);
                let contents = std::fs::read_to_string(&global_path)?;
                config = toml::from_str(&contents)?;
            }
        }

        // 2. Load project config (.casket/config.toml) - overrides global
        let project_path = Path::new(".casket/config.toml");
        if project_path.exists() {
            debug!("Loading project config from {:?}", project_path);
            let contents = std::fs::read_to_string(project_path)?;
            let project_config: Config = toml::from_str(&contents)?;
            config.merge(project_config);
        }

        // 3. Apply environment variable overrides
        config.apply_env_overrides();

        Ok(config)
    }

    /// Global config path: ~/.casket/config.toml
    pub fn global_config_path() -> Option<PathBuf> {
        dirs::home_dir().map(|h| h.join(".casket/config.toml"))
    }

    /// Merge another config (project overrides)
    fn merge(&mut self, other: Config) {
        // Only merge non-default values (simplified: just replace)
        self.storage = other.storage;
        if !other.extensions.allowed.is_empty() {
            self.extensions.allowed = other.extensions.allowed;
        }
        if !other.extensions.default.is_empty() {
            self.extensions.default = other.extensions.default;
        }
        self.ledger = other.ledger;
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) {
        if let Ok(path) = std::env::var("CASKET_PRIMARY") {
            self.storage.primary = PathBuf::from(path);
        }
        if let Ok(path) = std::env::var("CASKET_FALLBACK") {
            self.storage.fallback = PathBuf::from(path);
        }
        if let Ok(prefix) = std::env::var("CASKET_URL_PREFIX") {
            self.storage.url_prefix = Some(prefix);
        }
        if let Ok(ms) = std::env::var("CASKET_LOCK_TIMEOUT_MS") {
            if let Ok(n) = ms.parse() {
                self.ledger.lock_timeout_ms = n;
            }
        }
    }

    /// Generate default config TOML string
    pub fn default_toml() -> String {
        toml::to_string_pretty(&Config::default()).unwrap()
    }

    /// Assemble injectable store options from the loaded values.
    pub fn store_options(&self) -> StoreOptions {
        StoreOptions {
            primary: self.storage.primary.clone(),
            fallback: self.storage.fallback.clone(),
            allowed_extensions: self.extensions.allowed.clone(),
            default_extension: self.extensions.default.clone(),
            url_prefix: self.storage.url_prefix.clone(),
            lock_timeout: Duration::from_millis(self.ledger.lock_timeout_ms),
        }
    }
}

fn casket_home() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join(".casket")
}

/// Storage tier configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Primary tier root: preferred for reads, target of all writes
    pub primary: PathBuf,
    /// Fallback tier root: read-only legacy content
    pub fallback: PathBuf,
    /// Public URL prefix for display URLs
    pub url_prefix: Option<String>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            primary: casket_home().join("primary"),
            fallback: casket_home().join("archive"),
            url_prefix: None,
        }
    }
}

/// Display-extension configuration. Immutable after load.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtensionConfig {
    /// Extensions accepted for display purposes
    pub allowed: Vec<String>,
    /// Substitute for missing or unlisted extensions
    pub default: String,
}

impl Default for ExtensionConfig {
    fn default() -> Self {
        Self {
            allowed: default_allow_list(),
            default: SAFE_EXTENSION.to_string(),
        }
    }
}

/// Reference-ledger configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Bound on sidecar lock waits, in milliseconds
    pub lock_timeout_ms: u64,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            lock_timeout_ms: 5_000,
        }
    }
}
