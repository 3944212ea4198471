//! Protocol-independent view of a download.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Normalized state across client families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ItemState {
    Downloading,
    DownloadingMetadata,
    Seeding,
    Paused,
    Queued,
    Checking,
    Error,
    #[default]
    Unknown,
}

/// One file inside a download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadFile {
    /// Client-side file index.
    pub index: usize,
    /// Path relative to the item's save path.
    pub name: String,
    pub size: u64,
    /// 0 means "do not download".
    pub priority: i64,
}

impl DownloadFile {
    #[must_use]
    pub fn is_wanted(&self) -> bool {
        self.priority != 0
    }
}

/// A download as reported by a client.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DownloadItem {
    /// Lowercase info hash.
    pub hash: String,
    pub name: String,
    pub state: ItemState,
    pub is_private: bool,
    pub size: u64,
    /// Bytes per second.
    pub download_speed: u64,
    /// Seconds; 0 when the client has no estimate.
    pub eta: u64,
    pub downloaded: u64,
    pub ratio: f64,
    pub seeding_time: Duration,
    pub category: Option<String>,
    pub tags: Vec<String>,
    pub save_path: PathBuf,
    pub files: Vec<DownloadFile>,
}

impl DownloadItem {
    pub fn wanted_files(&self) -> impl Iterator<Item = &DownloadFile> {
        self.files.iter().filter(|file| file.is_wanted())
    }

    /// Case-insensitive category comparison.
    #[must_use]
    pub fn has_category(&self, name: &str) -> bool {
        self.category
            .as_deref()
            .is_some_and(|category| category.trim().eq_ignore_ascii_case(name.trim()))
    }

    #[must_use]
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t.trim().eq_ignore_ascii_case(tag.trim()))
    }
}

/// Why a queue item should be removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeleteReason {
    #[default]
    None,
    AllFilesSkipped,
    AllFilesBlocked,
    Stalled,
    Slow,
    FailedImport,
    DownloadingMetadata,
}

impl fmt::Display for DeleteReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::None => "none",
            Self::AllFilesSkipped => "all files skipped",
            Self::AllFilesBlocked => "all files blocked",
            Self::Stalled => "stalled",
            Self::Slow => "slow",
            Self::FailedImport => "failed import",
            Self::DownloadingMetadata => "stuck downloading metadata",
        })
    }
}

/// Why a seeding item was cleaned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CleanReason {
    MaxRatioReached,
    MaxSeedTimeReached,
}

impl fmt::Display for CleanReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::MaxRatioReached => "max ratio reached",
            Self::MaxSeedTimeReached => "max seed time reached",
        })
    }
}

/// Result of evaluating one queue item against a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QueueItemVerdict {
    /// The client knows the hash.
    pub found: bool,
    pub is_private: bool,
    pub should_remove: bool,
    pub reason: DeleteReason,
    /// Matched the ignore list; no other check may act on it.
    pub ignored: bool,
}

impl QueueItemVerdict {
    #[must_use]
    pub fn not_found() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn keep(is_private: bool) -> Self {
        Self {
            found: true,
            is_private,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn ignored(is_private: bool) -> Self {
        Self {
            ignored: true,
            ..Self::keep(is_private)
        }
    }

    #[must_use]
    pub fn remove(is_private: bool, reason: DeleteReason) -> Self {
        Self {
            found: true,
            is_private,
            should_remove: true,
            reason,
            ignored: false,
        }
    }
}

/// Downloads no job may touch, matched by hash, category or tag.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IgnoredDownloads {
    entries: Vec<String>,
}

impl IgnoredDownloads {
    #[must_use]
    pub fn new<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            entries: entries
                .into_iter()
                .map(|e| e.as_ref().trim().to_lowercase())
                .filter(|e| !e.is_empty())
                .collect(),
        }
    }

    #[must_use]
    pub fn contains_hash(&self, hash: &str) -> bool {
        let hash = hash.trim().to_lowercase();
        self.entries.iter().any(|e| *e == hash)
    }

    /// Hash, category or any tag listed.
    #[must_use]
    pub fn matches(&self, item: &DownloadItem) -> bool {
        self.contains_hash(&item.hash)
            || self.entries.iter().any(|e| item.has_category(e) || item.has_tag(e))
    }
}
