//! Hardlink counting for completed downloads.
//!
//! A file imported by an Arr application is usually hardlinked into the media
//! library, so its link count is greater than one. A download whose files have
//! no links outside the download itself is "unlinked": nothing depends on it.
//!
//! Some setups keep a second tree of hardlinks that should not count as a
//! dependency (cross-seed directories, for instance). [`HardlinkInspector::populate`]
//! walks such an ignored root once and remembers how many links per inode
//! live there; [`HardlinkInspector::external_link_count`] then subtracts them.

use std::path::{Path, PathBuf};
use std::sync::RwLock;

use dashmap::DashMap;
use thiserror::Error;
use tracing::{debug, instrument, warn};

#[derive(Debug, Error)]
pub enum HardlinkError {
    #[error("failed to stat {path}: {source}")]
    Metadata {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("hardlink counts are not available on this platform")]
    Unsupported,
}

impl HardlinkError {
    fn metadata(path: &Path, source: std::io::Error) -> Self {
        Self::Metadata {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Identity of a file on disk: (device, inode).
type FileId = (u64, u64);

/// Link-count lookups with an optional pre-populated ignored root.
#[derive(Debug, Default)]
pub struct HardlinkInspector {
    ignored_links: DashMap<FileId, u64>,
    ignored_root: RwLock<Option<PathBuf>>,
}

impl HardlinkInspector {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Walks `root` and counts, per inode, how many of its links live there.
    /// Replaces any previous population. Returns the number of multi-link
    /// inodes found.
    ///
    /// Unreadable entries are skipped with a warning.
    ///
    /// # Errors
    ///
    /// [`HardlinkError::Unsupported`] on platforms without inode numbers.
    #[instrument(skip(self), fields(root = %root.display()))]
    pub fn populate(&self, root: &Path) -> Result<usize, HardlinkError> {
        self.clear();

        for entry in walkdir::WalkDir::new(root).follow_links(false) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(error) => {
                    warn!(error = %error, "skipping unreadable entry");
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let metadata = match entry.metadata() {
                Ok(metadata) => metadata,
                Err(error) => {
                    warn!(path = %entry.path().display(), error = %error, "skipping file without metadata");
                    continue;
                }
            };
            let (id, links) = platform::identity(&metadata)?;
            if links > 1 {
                *self.ignored_links.entry(id).or_insert(0) += 1;
            }
        }

        self.set_ignored_root(Some(root.to_path_buf()));

        let inodes = self.ignored_links.len();
        debug!(inodes, "ignored root populated");
        Ok(inodes)
    }

    /// Forgets the ignored root.
    pub fn clear(&self) {
        self.ignored_links.clear();
        self.set_ignored_root(None);
    }

    fn set_ignored_root(&self, root: Option<PathBuf>) {
        let mut guard = self.ignored_root.write().unwrap_or_else(|poisoned| {
            warn!("ignored root lock poisoned, recovering");
            poisoned.into_inner()
        });
        *guard = root;
    }

    fn ignored_root(&self) -> Option<PathBuf> {
        self.ignored_root
            .read()
            .unwrap_or_else(|poisoned| {
                warn!("ignored root lock poisoned, recovering");
                poisoned.into_inner()
            })
            .clone()
    }

    /// Number of links to `path` other than `path` itself.
    ///
    /// With `ignore_root` set, links found under the populated ignored root
    /// are not counted either.
    ///
    /// # Errors
    ///
    /// [`HardlinkError::Metadata`] when the file cannot be inspected.
    pub fn external_link_count(&self, path: &Path, ignore_root: bool) -> Result<u64, HardlinkError> {
        let metadata = std::fs::metadata(path).map_err(|e| HardlinkError::metadata(path, e))?;
        let (id, links) = platform::identity(&metadata)?;
        let others = links.saturating_sub(1);

        if !ignore_root {
            return Ok(others);
        }

        let Some(root) = self.ignored_root() else {
            return Ok(others);
        };

        let in_root = self.ignored_links.get(&id).map_or(0, |count| *count);
        // the file's own link is among the populated ones when it lives there
        let own_in_root = u64::from(in_root > 0 && path.starts_with(&root));
        Ok(others.saturating_sub(in_root - own_in_root))
    }
}

#[cfg(unix)]
mod platform {
    use std::fs::Metadata;
    use std::os::unix::fs::MetadataExt;

    use super::{FileId, HardlinkError};

    #[allow(clippy::unnecessary_wraps)]
    pub(super) fn identity(metadata: &Metadata) -> Result<(FileId, u64), HardlinkError> {
        Ok(((metadata.dev(), metadata.ino()), metadata.nlink()))
    }
}

#[cfg(not(unix))]
mod platform {
    use std::fs::Metadata;

    use super::{FileId, HardlinkError};

    pub(super) fn identity(_metadata: &Metadata) -> Result<(FileId, u64), HardlinkError> {
        Err(HardlinkError::Unsupported)
    }
}
