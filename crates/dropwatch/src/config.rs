//! Configuration for dropwatch.
//!
//! Loads settings from `dropwatch.toml` and `DROPWATCH_*` environment
//! variables. Uses figment for layered configuration with provenance
//! tracking.

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::{Result, WatchError};

/// File name looked up in the working directory when no explicit config
/// file is given.
pub const CONFIG_FILE_NAME: &str = "dropwatch.toml";

/// Prefix for environment overrides, e.g. `DROPWATCH_WORKERS=8`.
pub const ENV_PREFIX: &str = "DROPWATCH_";

/// dropwatch configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Config {
    /// Directories to watch.
    #[serde(default)]
    pub roots: Vec<PathBuf>,

    /// Whether subdirectories of each root are watched too (default: true).
    #[serde(default = "default_recursive")]
    pub recursive: bool,

    /// Number of worker threads (default: 4).
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Capacity of the shared event queue (default: 2048).
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Minimum time between two accepted events for one path (default: 1000).
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    /// Delay between file size samples (default: 1000).
    #[serde(default = "default_stability_interval_ms")]
    pub stability_interval_ms: u64,

    /// Number of file size samples that must agree (default: 2).
    #[serde(default = "default_stability_checks")]
    pub stability_checks: u32,

    /// External command run for every ready file.
    #[serde(default)]
    pub handler: HandlerConfig,

    /// Telegram notifications for successful ingests.
    #[serde(default)]
    pub telegram: TelegramConfig,
}

/// External command invoked with the ready file path as its last argument.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct HandlerConfig {
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct TelegramConfig {
    #[serde(default)]
    pub bot_token: Option<String>,
    /// Numeric ids (`-1001234`) are accepted and stored as text.
    #[serde(default, deserialize_with = "string_or_number")]
    pub chat_id: Option<String>,
    #[serde(default = "default_telegram_api_base")]
    pub api_base: String,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            bot_token: None,
            chat_id: None,
            api_base: default_telegram_api_base(),
        }
    }
}

impl TelegramConfig {
    /// Token and chat id, when both are configured.
    pub fn credentials(&self) -> Option<(&str, &str)> {
        match (self.bot_token.as_deref(), self.chat_id.as_deref()) {
            (Some(token), Some(chat)) if !token.is_empty() && !chat.is_empty() => {
                Some((token, chat))
            }
            _ => None,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            roots: Vec::new(),
            recursive: default_recursive(),
            workers: default_workers(),
            queue_capacity: default_queue_capacity(),
            debounce_ms: default_debounce_ms(),
            stability_interval_ms: default_stability_interval_ms(),
            stability_checks: default_stability_checks(),
            handler: HandlerConfig::default(),
            telegram: TelegramConfig::default(),
        }
    }
}

fn default_recursive() -> bool {
    true
}

fn default_workers() -> usize {
    4
}

fn default_queue_capacity() -> usize {
    2048
}

fn default_debounce_ms() -> u64 {
    1000
}

fn default_stability_interval_ms() -> u64 {
    1000
}

fn default_stability_checks() -> u32 {
    2
}

fn default_telegram_api_base() -> String {
    "https://api.telegram.org".to_string()
}

fn string_or_number<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum ChatId {
        Text(String),
        Number(i64),
    }

    Ok(Option::<ChatId>::deserialize(deserializer)?.map(|id| match id {
        ChatId::Text(text) => text,
        ChatId::Number(number) => number.to_string(),
    }))
}

impl Config {
    /// Load configuration from `dropwatch.toml` in the given directory.
    ///
    /// Returns default config if the file doesn't exist.
    pub fn load(dir: &Path) -> Self {
        Self::load_file(&dir.join(CONFIG_FILE_NAME))
    }

    /// Load configuration from an explicit file, then apply environment
    /// overrides.
    ///
    /// Parse errors are reported with file, line, and key information and
    /// the defaults are used instead.
    pub fn load_file(config_path: &Path) -> Self {
        match Self::try_load_file(config_path) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("{}", e);
                Self::default()
            }
        }
    }

    /// Like [`Config::load_file`], but a file that fails to parse is an
    /// error instead of a silent fallback. A missing file still yields the
    /// defaults plus environment overrides.
    pub fn try_load_file(config_path: &Path) -> Result<Self> {
        // Build layered config: defaults <- toml file <- environment
        let figment = Figment::from(Serialized::defaults(Config::default()));

        let figment = if config_path.exists() {
            figment.merge(Toml::file(config_path))
        } else {
            figment
        };

        let figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__"));

        let config: Config = figment.extract().map_err(Box::new)?;
        if config_path.exists() {
            tracing::info!("Loaded config from {:?}", config_path);
        }
        Ok(config)
    }

    /// Reject settings the watch manager cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(WatchError::InvalidConfig(
                "workers must be at least 1".to_string(),
            ));
        }
        if self.queue_capacity == 0 {
            return Err(WatchError::InvalidConfig(
                "queue_capacity must be at least 1".to_string(),
            ));
        }
        if self.stability_checks == 0 {
            return Err(WatchError::InvalidConfig(
                "stability_checks must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn debounce_window(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn stability_interval(&self) -> Duration {
        Duration::from_millis(self.stability_interval_ms)
    }
}
