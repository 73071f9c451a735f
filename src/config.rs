//! Application configuration.
//!
//! Configuration is loaded from a TOML file at:
//! 1. `$MAILHOOK_CONFIG` (environment variable)
//! 2. `~/.config/mailhook/config.toml` (Linux/macOS)
//!    `%APPDATA%\mailhook\config.toml` (Windows)
//! 3. Built-in defaults

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::ingest::categorize::DEFAULT_CATEGORIZED_TOPIC;
use crate::ingest::materialize::DEFAULT_CONCURRENCY;
use crate::ingest::DEFAULT_TOPIC;
use crate::intake::MAX_BODY_SIZE;

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General behavior settings.
    pub general: GeneralConfig,
    /// Where records, attachments and raw payloads are kept.
    pub storage: StorageConfig,
    /// Pipeline tuning.
    pub ingest: IngestConfig,
    /// Webhook verification settings.
    pub webhook: WebhookConfig,
}

/// General behavior settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Override cache directory for logs.
    pub cache_dir: Option<PathBuf>,
    /// Log level: "error", "warn", "info", "debug", "trace".
    pub log_level: String,
}

/// Storage settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Root of the filesystem blob store (default: `<data dir>/mailhook`).
    pub root: Option<PathBuf>,
}

/// Pipeline tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Topic notifications are published to.
    pub notification_topic: String,
    /// Topic categorization results are published to.
    pub categorized_topic: String,
    /// Maximum attachment uploads in flight per email.
    pub attachment_concurrency: usize,
    /// Maximum transport body size in bytes (default: 10485760 = 10 MiB).
    pub max_body_size: usize,
}

/// Webhook verification settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WebhookConfig {
    /// Public key handed to the signature verifier.
    pub public_key: String,
}

// ── Default implementations ─────────────────────────────────────

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            cache_dir: None,
            log_level: "warn".to_string(),
        }
    }
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            notification_topic: DEFAULT_TOPIC.to_string(),
            categorized_topic: DEFAULT_CATEGORIZED_TOPIC.to_string(),
            attachment_concurrency: DEFAULT_CONCURRENCY,
            max_body_size: MAX_BODY_SIZE,
        }
    }
}

// ── Load / save ─────────────────────────────────────────────────

/// Load configuration, searching standard locations.
///
/// Returns the default configuration if no file is found or on parse error.
pub fn load_config() -> Config {
    if let Some(path) = config_file_path() {
        if path.exists() {
            match std::fs::read_to_string(&path) {
                Ok(contents) => match toml::from_str::<Config>(&contents) {
                    Ok(cfg) => {
                        tracing::info!(path = %path.display(), "Loaded config");
                        return cfg;
                    }
                    Err(e) => {
                        tracing::warn!(
                            path = %path.display(),
                            error = %e,
                            "Failed to parse config, using defaults"
                        );
                    }
                },
                Err(e) => {
                    tracing::warn!(
                        path = %path.display(),
                        error = %e,
                        "Failed to read config file, using defaults"
                    );
                }
            }
        }
    }
    Config::default()
}

/// Save configuration to the standard location.
pub fn save_config(config: &Config) -> anyhow::Result<()> {
    let path = config_file_path()
        .ok_or_else(|| anyhow::anyhow!("Could not determine config file path"))?;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let contents = toml::to_string_pretty(config)?;
    std::fs::write(&path, contents)?;
    tracing::info!(path = %path.display(), "Saved config");
    Ok(())
}

/// Determine the config file path (checking env var first, then standard dirs).
pub fn config_file_path() -> Option<PathBuf> {
    if let Ok(env_path) = std::env::var("MAILHOOK_CONFIG") {
        return Some(PathBuf::from(env_path));
    }
    dirs::config_dir().map(|d| d.join("mailhook").join("config.toml"))
}

/// Return the cache directory for logs.
pub fn cache_dir(config: &Config) -> PathBuf {
    if let Some(ref dir) = config.general.cache_dir {
        return dir.clone();
    }
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("mailhook")
}

/// Return the log file path.
pub fn log_file_path(config: &Config) -> PathBuf {
    cache_dir(config).join("mailhook.log")
}

/// Return the blob store root.
pub fn storage_root(config: &Config) -> PathBuf {
    if let Some(ref root) = config.storage.root {
        return root.clone();
    }
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("mailhook")
}
