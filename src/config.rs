//! Configuration file parser for ~/.config/feedme/config.toml.
//!
//! The config file is optional: a missing file yields `Config::default()`.
//! Unknown keys are accepted by serde but logged as warnings, since they are
//! usually typos.
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::launcher::{CommandSpec, DownloaderSpec};
use crate::storage::DEFAULT_MAX_EPISODES;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// SEC-014: Config file exceeds maximum allowed size.
    #[error("Config file too large: {0}")]
    TooLarge(String),

    #[error("Invalid config value: {0}")]
    Invalid(String),
}

// ============================================================================
// Configuration Structs
// ============================================================================

/// Top-level application configuration.
///
/// All fields use `#[serde(default)]` so any subset of keys can be specified.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Subscription store location. Defaults to `subscriptions.json` in the
    /// config directory.
    pub store_path: Option<PathBuf>,

    /// Episodes kept per subscription; older ones are dropped on save.
    pub max_episodes: usize,

    /// Per-feed request timeout in seconds.
    pub fetch_timeout_secs: u64,

    /// Feeds fetched at the same time during a refresh.
    pub max_concurrent_fetches: usize,

    /// Delay before a shown episode is marked read, in milliseconds.
    pub mark_read_delay_ms: u64,

    /// Media player invoked by `play`.
    pub player: CommandSpec,

    /// Download tool invoked by `download`.
    pub downloader: DownloaderSpec,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            store_path: None,
            max_episodes: DEFAULT_MAX_EPISODES,
            fetch_timeout_secs: 30,
            max_concurrent_fetches: 10,
            mark_read_delay_ms: 100,
            player: CommandSpec::default_player(),
            downloader: DownloaderSpec::default(),
        }
    }
}

impl Config {
    /// SEC-014: Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    const KNOWN_KEYS: [&'static str; 7] = [
        "store_path",
        "max_episodes",
        "fetch_timeout_secs",
        "max_concurrent_fetches",
        "mark_read_delay_ms",
        "player",
        "downloader",
    ];

    /// Load configuration from a TOML file.
    ///
    /// - Missing file → `Ok(Config::default())`
    /// - Empty file → `Ok(Config::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - Out-of-range values → `Err(ConfigError::Invalid)`
    /// - Unknown keys → accepted, logged as warning
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::metadata(path) {
            Ok(meta) if meta.len() > Self::MAX_FILE_SIZE => {
                return Err(ConfigError::TooLarge(format!(
                    "Config file is {} bytes (max {} bytes)",
                    meta.len(),
                    Self::MAX_FILE_SIZE
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
            Ok(_) => {}
        }

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "Config file disappeared, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        Self::from_toml(&content)
    }

    /// Parses config from TOML text, applying the same rules as [`Config::load`].
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }

        if let Ok(raw) = content.parse::<toml::Table>() {
            for key in raw.keys() {
                if !Self::KNOWN_KEYS.contains(&key.as_str()) {
                    tracing::warn!(key = %key, "Unknown key in config file, ignoring");
                }
            }
        }

        let config: Config = toml::from_str(content)?;
        config.validate()?;
        tracing::debug!(max_episodes = config.max_episodes, "Loaded configuration");
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_episodes == 0 {
            return Err(ConfigError::Invalid("max_episodes must be at least 1".into()));
        }
        if self.max_concurrent_fetches == 0 {
            return Err(ConfigError::Invalid("max_concurrent_fetches must be at least 1".into()));
        }
        if self.fetch_timeout_secs == 0 {
            return Err(ConfigError::Invalid("fetch_timeout_secs must be at least 1".into()));
        }
        if self.player.program.trim().is_empty() || self.downloader.program.trim().is_empty() {
            return Err(ConfigError::Invalid("player and downloader programs must be set".into()));
        }
        Ok(())
    }

    /// Where the subscription store lives, given the config directory.
    pub fn resolve_store_path(&self, config_dir: &Path) -> PathBuf {
        self.store_path
            .clone()
            .unwrap_or_else(|| config_dir.join("subscriptions.json"))
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn mark_read_delay(&self) -> Duration {
        Duration::from_millis(self.mark_read_delay_ms)
    }
}

// ============================================================================
// Tests
// ============================================================================
