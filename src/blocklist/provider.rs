//! Loading blocklists from files or URLs.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use regex::RegexBuilder;
use thiserror::Error;
use tracing::{info, instrument, warn};

use super::{BlocklistSet, BlocklistType};
use crate::arr::ArrType;
use crate::config::{AppConfig, BlocklistSource};
use crate::http::{self, HttpError, HttpSettings};

/// Prefix marking a line as a regular expression.
const REGEX_PREFIX: &str = "regex:";

#[derive(Debug, Error)]
pub enum BlocklistError {
    #[error("failed to read blocklist {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to fetch blocklist: {source}")]
    Fetch {
        #[source]
        source: HttpError,
    },
}

/// Source of the current blocklist for each Arr type.
pub trait BlocklistProvider: Send + Sync {
    /// `None` when no list is configured for `arr_type`.
    fn blocklist(&self, arr_type: ArrType) -> Option<Arc<BlocklistSet>>;
}

/// Fixed sets, mostly useful for tests and embedding.
#[derive(Debug, Default)]
pub struct StaticBlocklistProvider {
    sets: HashMap<ArrType, Arc<BlocklistSet>>,
}

impl StaticBlocklistProvider {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, arr_type: ArrType, set: BlocklistSet) -> Self {
        self.sets.insert(arr_type, Arc::new(set));
        self
    }
}

impl BlocklistProvider for StaticBlocklistProvider {
    fn blocklist(&self, arr_type: ArrType) -> Option<Arc<BlocklistSet>> {
        self.sets.get(&arr_type).cloned()
    }
}

/// Loads one list per Arr type from a local path or an HTTP(S) URL.
///
/// One entry per line. Blank lines and `#` comments are skipped. Lines
/// starting with `regex:` are compiled case-insensitively; a regex that does
/// not compile is logged and dropped.
#[derive(Debug)]
pub struct FileBlocklistProvider {
    http: reqwest::Client,
    settings: HttpSettings,
    sets: DashMap<ArrType, Arc<BlocklistSet>>,
}

impl FileBlocklistProvider {
    /// # Errors
    ///
    /// Returns [`BlocklistError::Fetch`] if the HTTP client cannot be built.
    pub fn new(settings: &HttpSettings) -> Result<Self, BlocklistError> {
        let http = http::build_client(settings, false)
            .map_err(|source| BlocklistError::Fetch { source })?;
        Ok(Self {
            http,
            settings: settings.clone(),
            sets: DashMap::new(),
        })
    }

    /// Reloads `source` and swaps it in for `arr_type`. Returns the number of
    /// entries loaded.
    ///
    /// # Errors
    ///
    /// The previous set stays in place when the source cannot be read.
    #[instrument(skip(self, source), fields(arr = %arr_type, location = %source.path))]
    pub async fn refresh(
        &self,
        arr_type: ArrType,
        source: &BlocklistSource,
    ) -> Result<usize, BlocklistError> {
        let text = self.fetch(&source.path).await?;
        let set = parse_blocklist(source.kind, &text);
        let entries = set.patterns().len() + set.regexes().len();
        self.sets.insert(arr_type, Arc::new(set));
        info!(entries, kind = ?source.kind, "blocklist loaded");
        Ok(entries)
    }

    /// Refreshes every configured list and drops lists no longer configured.
    /// Failures are logged; the previous set is kept.
    pub async fn refresh_all(&self, config: &AppConfig) {
        for arr_type in ArrType::ALL {
            let arr = config.arr(arr_type);
            match arr.blocklist.as_ref().filter(|_| arr.enabled) {
                Some(source) => {
                    if let Err(error) = self.refresh(arr_type, source).await {
                        warn!(arr = %arr_type, error = %error, "blocklist refresh failed, keeping previous list");
                    }
                }
                None => {
                    self.sets.remove(&arr_type);
                }
            }
        }
    }

    async fn fetch(&self, location: &str) -> Result<String, BlocklistError> {
        if location.starts_with("http://") || location.starts_with("https://") {
            let response = http::send_with_retry(&self.settings.retry, location, &[], || {
                self.http.get(location)
            })
            .await
            .map_err(|source| BlocklistError::Fetch { source })?;
            return response
                .text()
                .await
                .map_err(|source| BlocklistError::Fetch {
                    source: HttpError::network(location, source),
                });
        }

        tokio::fs::read_to_string(location)
            .await
            .map_err(|source| BlocklistError::Read {
                path: PathBuf::from(location),
                source,
            })
    }
}

impl BlocklistProvider for FileBlocklistProvider {
    fn blocklist(&self, arr_type: ArrType) -> Option<Arc<BlocklistSet>> {
        self.sets.get(&arr_type).map(|entry| Arc::clone(entry.value()))
    }
}

/// Parses blocklist text into a set.
#[must_use]
pub fn parse_blocklist(kind: BlocklistType, text: &str) -> BlocklistSet {
    let mut patterns = Vec::new();
    let mut regexes = Vec::new();

    for line in text.lines().map(str::trim) {
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some(expression) = line.strip_prefix(REGEX_PREFIX) {
            match RegexBuilder::new(expression.trim())
                .case_insensitive(true)
                .build()
            {
                Ok(regex) => regexes.push(regex),
                Err(error) => warn!(pattern = expression, error = %error, "skipping invalid blocklist regex"),
            }
        } else {
            patterns.push(line.to_string());
        }
    }

    BlocklistSet::new(kind, patterns, regexes)
}
