//! Configuration: TOML model, loading, validation and the shared snapshot.
//!
//! # Overview
//!
//! The file is read once at startup (default
//! `$XDG_CONFIG_HOME/cleanarr/config.toml`). Jobs never hold a reference into
//! it; they take an [`Arc<AppConfig>`] snapshot from a [`ConfigProvider`] at
//! the start of each run, so a replacement only affects the next run.
//!
//! # Example
//!
//! ```
//! use cleanarr_core::config::parse_config;
//!
//! let config = parse_config(r#"
//! [queue_cleaner]
//! enabled = true
//!
//! [queue_cleaner.stalled]
//! max_strikes = 3
//! "#).unwrap();
//! assert_eq!(config.queue_cleaner.stalled.max_strikes, 3);
//! config.validate().unwrap();
//! ```

mod model;
mod size;
mod validation;

use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::info;

pub use model::{
    AppConfig, ArrConfig, ArrInstanceConfig, BlocklistSource, CleanCategory, ContentBlockerConfig,
    DEFAULT_DOWNLOAD_CLEANER_INTERVAL_SECS, DEFAULT_QUEUE_CLEANER_INTERVAL_SECS,
    DEFAULT_UNLINKED_CATEGORY, DownloadCleanerConfig, DownloadClientConfig, DownloadClientKind,
    FailedImportConfig, GeneralConfig, QueueCleanerConfig, SlowConfig, StalledConfig,
    UnlinkedConfig,
};
pub use size::ByteSize;
pub use validation::{ConfigError, MAX_TRIGGER_INTERVAL_SECS, MIN_TRIGGER_INTERVAL_SECS};

/// Source of configuration snapshots.
#[async_trait]
pub trait ConfigProvider: Send + Sync {
    /// The configuration to use for one job run.
    async fn snapshot(&self) -> Arc<AppConfig>;
}

/// In-memory configuration behind a single `RwLock` gate.
#[derive(Debug, Default)]
pub struct SharedConfig {
    current: RwLock<Arc<AppConfig>>,
}

impl SharedConfig {
    /// Wraps an already validated configuration.
    #[must_use]
    pub fn new(config: AppConfig) -> Self {
        Self {
            current: RwLock::new(Arc::new(config)),
        }
    }

    /// Validates and swaps in `config`. Runs in progress keep their snapshot.
    ///
    /// # Errors
    ///
    /// Returns the validation error and keeps the current configuration.
    pub async fn replace(&self, config: AppConfig) -> Result<(), ConfigError> {
        config.validate()?;
        *self.current.write().await = Arc::new(config);
        info!("configuration replaced");
        Ok(())
    }
}

#[async_trait]
impl ConfigProvider for SharedConfig {
    async fn snapshot(&self) -> Arc<AppConfig> {
        Arc::clone(&*self.current.read().await)
    }
}

/// Parses TOML text without validating it.
///
/// # Errors
///
/// [`ConfigError::Parse`] for malformed TOML, unknown keys or bad values.
pub fn parse_config(raw: &str) -> Result<AppConfig, ConfigError> {
    toml::from_str(raw).map_err(|source| ConfigError::Parse { source })
}

/// Reads, parses and validates the file at `path`.
///
/// # Errors
///
/// Any [`ConfigError`].
pub fn load_config(path: &Path) -> Result<AppConfig, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let config = parse_config(&raw)?;
    config.validate()?;
    Ok(config)
}

/// Resolves the default config path.
///
/// Priority:
/// 1. `$XDG_CONFIG_HOME/cleanarr/config.toml`
/// 2. `$HOME/.config/cleanarr/config.toml`
#[must_use]
pub fn resolve_default_config_path() -> Option<PathBuf> {
    if let Some(xdg_config_home) = env_var_non_empty_os("XDG_CONFIG_HOME") {
        return Some(PathBuf::from(xdg_config_home).join("cleanarr").join("config.toml"));
    }

    let home = env_var_non_empty_os("HOME")?;
    Some(
        PathBuf::from(home)
            .join(".config")
            .join("cleanarr")
            .join("config.toml"),
    )
}

fn env_var_non_empty_os(name: &str) -> Option<std::ffi::OsString> {
    let value = env::var_os(name)?;
    if value.is_empty() { None } else { Some(value) }
}
