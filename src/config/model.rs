//! Configuration model, deserialized from TOML.
//!
//! Every section has defaults so a minimal file only lists clients and Arr
//! instances.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use super::ByteSize;
use crate::arr::ArrType;
use crate::blocklist::BlocklistType;
use crate::http::{HttpSettings, RetryPolicy};

/// Default queue cleaner trigger interval (5 minutes).
pub const DEFAULT_QUEUE_CLEANER_INTERVAL_SECS: u64 = 300;

/// Default download cleaner trigger interval (1 hour).
pub const DEFAULT_DOWNLOAD_CLEANER_INTERVAL_SECS: u64 = 3600;

/// Default category unlinked downloads are moved to.
pub const DEFAULT_UNLINKED_CATEGORY: &str = "cleanarr-unlinked";

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AppConfig {
    pub general: GeneralConfig,
    pub queue_cleaner: QueueCleanerConfig,
    pub content_blocker: ContentBlockerConfig,
    pub download_cleaner: DownloadCleanerConfig,
    pub download_clients: Vec<DownloadClientConfig>,
    pub sonarr: ArrConfig,
    pub radarr: ArrConfig,
    pub lidarr: ArrConfig,
}

impl AppConfig {
    #[must_use]
    pub fn arr(&self, arr_type: ArrType) -> &ArrConfig {
        match arr_type {
            ArrType::Sonarr => &self.sonarr,
            ArrType::Radarr => &self.radarr,
            ArrType::Lidarr => &self.lidarr,
        }
    }

    /// Instances of every enabled Arr application, in Sonarr, Radarr, Lidarr
    /// order.
    pub fn arr_instances(&self) -> impl Iterator<Item = (ArrType, &ArrInstanceConfig)> {
        ArrType::ALL.into_iter().flat_map(move |arr_type| {
            let arr = self.arr(arr_type);
            arr.instances
                .iter()
                .filter(move |_| arr.enabled)
                .map(move |instance| (arr_type, instance))
        })
    }

    pub fn enabled_clients(&self) -> impl Iterator<Item = &DownloadClientConfig> {
        self.download_clients.iter().filter(|client| client.enabled)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GeneralConfig {
    /// Log mutations instead of performing them.
    pub dry_run: bool,
    /// Attempts per HTTP call, the first one included.
    pub http_max_retries: u32,
    pub http_timeout_secs: u64,
    /// Hashes, categories or tags never touched by any job.
    pub ignored_downloads: Vec<String>,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            dry_run: false,
            http_max_retries: crate::http::DEFAULT_MAX_ATTEMPTS,
            http_timeout_secs: crate::http::DEFAULT_TIMEOUT.as_secs(),
            ignored_downloads: Vec::new(),
        }
    }
}

impl GeneralConfig {
    #[must_use]
    pub fn http_settings(&self) -> HttpSettings {
        HttpSettings::new(
            Duration::from_secs(self.http_timeout_secs),
            RetryPolicy::with_max_attempts(self.http_max_retries),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct QueueCleanerConfig {
    pub enabled: bool,
    pub trigger_interval_secs: u64,
    pub failed_import: FailedImportConfig,
    pub stalled: StalledConfig,
    pub slow: SlowConfig,
}

impl Default for QueueCleanerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            trigger_interval_secs: DEFAULT_QUEUE_CLEANER_INTERVAL_SECS,
            failed_import: FailedImportConfig::default(),
            stalled: StalledConfig::default(),
            slow: SlowConfig::default(),
        }
    }
}

impl QueueCleanerConfig {
    #[must_use]
    pub fn trigger_interval(&self) -> Duration {
        Duration::from_secs(self.trigger_interval_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FailedImportConfig {
    /// 0 disables the check.
    pub max_strikes: u16,
    pub ignore_private: bool,
    pub delete_private: bool,
    /// Case-insensitive substrings; a status message containing any of them
    /// exempts the record.
    pub ignored_patterns: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StalledConfig {
    /// 0 disables the check.
    pub max_strikes: u16,
    pub reset_strikes_on_progress: bool,
    pub ignore_private: bool,
    pub delete_private: bool,
    /// Strikes for torrents stuck fetching metadata; 0 disables.
    pub downloading_metadata_max_strikes: u16,
}

impl Default for StalledConfig {
    fn default() -> Self {
        Self {
            max_strikes: 0,
            reset_strikes_on_progress: true,
            ignore_private: false,
            delete_private: false,
            downloading_metadata_max_strikes: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SlowConfig {
    /// 0 disables the check.
    pub max_strikes: u16,
    pub reset_strikes_on_progress: bool,
    pub ignore_private: bool,
    pub delete_private: bool,
    /// Per-second speed below which a strike is given; 0 disables.
    pub min_speed: ByteSize,
    /// ETA in hours above which a strike is given; 0 disables.
    pub max_time_hours: f64,
    /// Items larger than this are never considered slow.
    pub ignore_above_size: Option<ByteSize>,
}

impl Default for SlowConfig {
    fn default() -> Self {
        Self {
            max_strikes: 0,
            reset_strikes_on_progress: true,
            ignore_private: false,
            delete_private: false,
            min_speed: ByteSize::ZERO,
            max_time_hours: 0.0,
            ignore_above_size: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ContentBlockerConfig {
    pub enabled: bool,
    pub ignore_private: bool,
    pub delete_private: bool,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DownloadCleanerConfig {
    pub enabled: bool,
    pub trigger_interval_secs: u64,
    pub delete_private: bool,
    pub categories: Vec<CleanCategory>,
    pub unlinked: UnlinkedConfig,
}

impl Default for DownloadCleanerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            trigger_interval_secs: DEFAULT_DOWNLOAD_CLEANER_INTERVAL_SECS,
            delete_private: false,
            categories: Vec::new(),
            unlinked: UnlinkedConfig::default(),
        }
    }
}

impl DownloadCleanerConfig {
    #[must_use]
    pub fn trigger_interval(&self) -> Duration {
        Duration::from_secs(self.trigger_interval_secs)
    }
}

/// Seeding limits for one category. Negative values disable a limit.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CleanCategory {
    pub name: String,
    #[serde(default = "disabled_limit")]
    pub max_ratio: f64,
    /// Hours.
    #[serde(default)]
    pub min_seed_time: f64,
    /// Hours.
    #[serde(default = "disabled_limit")]
    pub max_seed_time: f64,
}

fn disabled_limit() -> f64 {
    -1.0
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct UnlinkedConfig {
    pub enabled: bool,
    pub target_category: String,
    /// Tag instead of moving (qBittorrent only; other clients move).
    pub use_tag: bool,
    /// Links under this directory do not count as external.
    pub ignored_root_dir: Option<PathBuf>,
    /// Categories swept for unlinked items.
    pub categories: Vec<String>,
}

impl Default for UnlinkedConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            target_category: DEFAULT_UNLINKED_CATEGORY.to_string(),
            use_tag: false,
            ignored_root_dir: None,
            categories: Vec::new(),
        }
    }
}

/// Download client families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DownloadClientKind {
    #[serde(alias = "qbit")]
    Qbittorrent,
    Deluge,
    Transmission,
    Usenet,
}

impl fmt::Display for DownloadClientKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Qbittorrent => "qBittorrent",
            Self::Deluge => "Deluge",
            Self::Transmission => "Transmission",
            Self::Usenet => "Usenet",
        })
    }
}

#[derive(Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DownloadClientConfig {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
    pub kind: DownloadClientKind,
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub url_base: Option<String>,
}

impl DownloadClientConfig {
    /// Name for logs; falls back to the id.
    #[must_use]
    pub fn display_name(&self) -> &str {
        if self.name.trim().is_empty() {
            &self.id
        } else {
            &self.name
        }
    }
}

// Credentials stay out of logs.
impl fmt::Debug for DownloadClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DownloadClientConfig")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("enabled", &self.enabled)
            .field("kind", &self.kind)
            .field("host", &self.host)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("url_base", &self.url_base)
            .finish()
    }
}

fn enabled_by_default() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ArrConfig {
    pub enabled: bool,
    pub instances: Vec<ArrInstanceConfig>,
    pub blocklist: Option<BlocklistSource>,
}

#[derive(Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ArrInstanceConfig {
    pub name: String,
    pub url: String,
    pub api_key: String,
}

impl fmt::Debug for ArrInstanceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArrInstanceConfig")
            .field("name", &self.name)
            .field("url", &self.url)
            .field("api_key", &"***")
            .finish()
    }
}

/// Where a blocklist is read from: a local path or an http(s) URL.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BlocklistSource {
    #[serde(rename = "type", default)]
    pub kind: BlocklistType,
    pub path: String,
}
