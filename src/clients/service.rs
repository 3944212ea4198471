//! Protocol-agnostic policy on top of a [`DownloadClientApi`].
//!
//! # Overview
//!
//! [`DownloadService`] owns everything that is the same for every client
//! family: the ordered queue-item checks, strike bookkeeping, seeding limits,
//! unlinked reclassification, and the dry-run gate. The wrapped protocol
//! implementation only ever sees mutations that passed through that gate.
//!
//! Queue items are checked in a fixed order and the first failing check wins:
//!
//! 1. every file already unwanted -> [`DeleteReason::AllFilesSkipped`]
//! 2. content blocking -> [`DeleteReason::AllFilesBlocked`] or files unwanted
//! 3. slow -> [`DeleteReason::Slow`]
//! 4. stalled / stuck on metadata -> [`DeleteReason::Stalled`],
//!    [`DeleteReason::DownloadingMetadata`]

use std::collections::HashSet;
use std::fmt;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use super::seeding::evaluate_seeding;
use super::{
    ClientError, DeleteReason, DownloadClientApi, DownloadFile, DownloadItem, IgnoredDownloads,
    ItemState, QueueItemVerdict,
};
use crate::blocklist::BlocklistSet;
use crate::config::{
    CleanCategory, ContentBlockerConfig, DownloadClientConfig, DownloadClientKind,
    QueueCleanerConfig, SlowConfig, StalledConfig, UnlinkedConfig,
};
use crate::dry_run::DryRun;
use crate::hardlinks::{HardlinkError, HardlinkInspector};
use crate::notifications::{NotificationEvent, Notifier, StrikeSource, notify};
use crate::strikes::{StrikeStore, StrikeType};

const SECS_PER_HOUR: f64 = 3600.0;

/// Settings that drive [`DownloadService::evaluate_queue_item`] for one Arr
/// instance during one run.
#[derive(Debug, Clone, Copy)]
pub struct QueuePolicy<'a> {
    pub queue_cleaner: &'a QueueCleanerConfig,
    pub content_blocker: &'a ContentBlockerConfig,
    /// List for the Arr type being processed, if one is loaded.
    pub blocklist: Option<&'a BlocklistSet>,
    pub ignored: &'a IgnoredDownloads,
}

/// One configured download client plus the shared policy state.
pub struct DownloadService {
    id: String,
    name: String,
    api: Arc<dyn DownloadClientApi>,
    strikes: Arc<StrikeStore>,
    hardlinks: Arc<HardlinkInspector>,
    dry_run: DryRun,
    notifier: Option<Notifier>,
}

impl fmt::Debug for DownloadService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DownloadService")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("kind", &self.api.kind())
            .field("dry_run", &self.dry_run.is_enabled())
            .finish_non_exhaustive()
    }
}

impl DownloadService {
    #[must_use]
    pub fn new(
        config: &DownloadClientConfig,
        api: Arc<dyn DownloadClientApi>,
        strikes: Arc<StrikeStore>,
        hardlinks: Arc<HardlinkInspector>,
        dry_run: DryRun,
    ) -> Self {
        Self {
            id: config.id.clone(),
            name: config.display_name().to_string(),
            api,
            strikes,
            hardlinks,
            dry_run,
            notifier: None,
        }
    }

    #[must_use]
    pub fn with_notifier(mut self, notifier: Notifier) -> Self {
        self.notifier = Some(notifier);
        self
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn kind(&self) -> DownloadClientKind {
        self.api.kind()
    }

    /// # Errors
    ///
    /// Whatever the protocol's login reports; [`ClientError::is_fatal`]
    /// errors mean the client should be skipped for the run.
    #[instrument(skip(self), fields(client = %self.name))]
    pub async fn login(&self) -> Result<(), ClientError> {
        self.api.login().await
    }

    /// The only path to a mutating protocol call.
    async fn mutate<F, Fut>(
        &self,
        action: &'static str,
        subject: &str,
        call: F,
    ) -> Result<(), ClientError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<(), ClientError>>,
    {
        self.dry_run.intercept(action, subject, call).await
    }

    async fn notify(&self, event: NotificationEvent) {
        notify(self.notifier.as_ref(), event).await;
    }

    // ==================== Queue evaluation ====================

    /// Classifies one queue item.
    ///
    /// An unknown hash yields `found == false` and no side effects. Ignored
    /// items are found but never removed.
    ///
    /// # Errors
    ///
    /// Lookup failures, and failures applying content-blocking changes.
    #[instrument(skip(self, policy), fields(client = %self.name))]
    pub async fn evaluate_queue_item(
        &self,
        hash: &str,
        policy: &QueuePolicy<'_>,
    ) -> Result<QueueItemVerdict, ClientError> {
        let Some(item) = self.api.find_item(hash).await? else {
            debug!("not found in client");
            return Ok(QueueItemVerdict::not_found());
        };

        if policy.ignored.matches(&item) {
            info!(name = %item.name, "item is ignored");
            return Ok(QueueItemVerdict::ignored(item.is_private));
        }

        if !item.files.is_empty() && item.wanted_files().next().is_none() {
            info!(name = %item.name, "all files are unwanted");
            return Ok(QueueItemVerdict::remove(
                item.is_private,
                DeleteReason::AllFilesSkipped,
            ));
        }

        if let Some(reason) = self.apply_blocklist(&item, policy).await? {
            return Ok(QueueItemVerdict::remove(item.is_private, reason));
        }

        if let Some(reason) = self.check_slow(&item, &policy.queue_cleaner.slow).await {
            return Ok(QueueItemVerdict::remove(item.is_private, reason));
        }

        if let Some(reason) = self.check_stalled(&item, &policy.queue_cleaner.stalled).await {
            return Ok(QueueItemVerdict::remove(item.is_private, reason));
        }

        Ok(QueueItemVerdict::keep(item.is_private))
    }

    async fn apply_blocklist(
        &self,
        item: &DownloadItem,
        policy: &QueuePolicy<'_>,
    ) -> Result<Option<DeleteReason>, ClientError> {
        let Some(blocklist) = policy.blocklist.filter(|_| policy.content_blocker.enabled) else {
            return Ok(None);
        };
        if item.is_private && policy.content_blocker.ignore_private {
            debug!(name = %item.name, "private item exempt from content blocking");
            return Ok(None);
        }

        let mut blocked = Vec::new();
        let mut remaining = 0_usize;
        for file in item.wanted_files() {
            if blocklist.is_valid(&file.name) {
                remaining += 1;
            } else {
                debug!(file = %file.name, "file blocked");
                blocked.push(file.index);
            }
        }

        if blocked.is_empty() {
            return Ok(None);
        }
        if remaining == 0 {
            info!(name = %item.name, blocked = blocked.len(), "every wanted file is blocked");
            return Ok(Some(DeleteReason::AllFilesBlocked));
        }

        info!(name = %item.name, blocked = blocked.len(), remaining, "marking blocked files unwanted");
        self.mutate("set unwanted files", &item.hash, || {
            self.api.set_unwanted_files(item, &blocked)
        })
        .await?;
        Ok(None)
    }

    #[allow(clippy::cast_precision_loss)]
    async fn check_slow(&self, item: &DownloadItem, slow: &SlowConfig) -> Option<DeleteReason> {
        if slow.max_strikes == 0
            || item.state != ItemState::Downloading
            || item.download_speed == 0
        {
            return None;
        }
        if item.is_private && slow.ignore_private {
            return None;
        }
        if let Some(limit) = slow.ignore_above_size
            && !limit.is_zero()
            && item.size > limit.bytes()
        {
            debug!(name = %item.name, size = item.size, "too large for slow check");
            return None;
        }

        let too_slow = !slow.min_speed.is_zero() && item.download_speed < slow.min_speed.bytes();
        let too_long = slow.max_time_hours > 0.0
            && item.eta > 0
            && item.eta as f64 > slow.max_time_hours * SECS_PER_HOUR;

        if !too_slow && !too_long {
            if slow.reset_strikes_on_progress {
                self.strikes.reset(&item.hash, StrikeType::Slow);
            }
            return None;
        }

        debug!(
            name = %item.name,
            speed = item.download_speed,
            eta = item.eta,
            too_slow,
            too_long,
            "item is slow"
        );
        self.strike(item, StrikeType::Slow, slow.max_strikes)
            .await
            .then_some(DeleteReason::Slow)
    }

    async fn check_stalled(
        &self,
        item: &DownloadItem,
        stalled: &StalledConfig,
    ) -> Option<DeleteReason> {
        if item.state == ItemState::DownloadingMetadata {
            let max = stalled.downloading_metadata_max_strikes;
            if max == 0 || (item.is_private && stalled.ignore_private) {
                return None;
            }
            return self
                .strike(item, StrikeType::DownloadingMetadata, max)
                .await
                .then_some(DeleteReason::DownloadingMetadata);
        }

        if stalled.max_strikes == 0
            || item.state != ItemState::Downloading
            || (item.is_private && stalled.ignore_private)
            || item.eta > 0
        {
            return None;
        }

        self.strikes.reset_on_progress(
            &item.hash,
            item.downloaded,
            stalled.reset_strikes_on_progress,
        );
        self.strike(item, StrikeType::Stalled, stalled.max_strikes)
            .await
            .then_some(DeleteReason::Stalled)
    }

    /// Records a strike, publishes it, and reports whether the limit was hit.
    async fn strike(&self, item: &DownloadItem, strike_type: StrikeType, max_strikes: u16) -> bool {
        let outcome = self.strikes.strike(&item.hash, strike_type, max_strikes);
        if outcome.count > 0 {
            self.notify(NotificationEvent::Strike {
                source: StrikeSource::Client(self.name.clone()),
                hash: item.hash.clone(),
                name: item.name.clone(),
                strike_type,
                count: outcome.count,
                max_strikes,
            })
            .await;
        }
        outcome.limit_reached
    }

    // ==================== Mutations ====================

    /// Deletes an item and its data. Deleting an unknown hash succeeds.
    ///
    /// # Errors
    ///
    /// Transport or protocol failures.
    #[instrument(skip(self), fields(client = %self.name))]
    pub async fn delete_item(&self, hash: &str) -> Result<(), ClientError> {
        self.mutate("delete", hash, || self.api.delete_item(hash)).await
    }

    /// Creates `name` if the client does not have it yet.
    ///
    /// # Errors
    ///
    /// Transport or protocol failures.
    #[instrument(skip(self), fields(client = %self.name))]
    pub async fn create_category(&self, name: &str) -> Result<(), ClientError> {
        self.mutate("create category", name, || self.api.create_category(name))
            .await
    }

    // ==================== Seeding ====================

    /// # Errors
    ///
    /// Transport or protocol failures.
    pub async fn list_seeding_items(&self) -> Result<Vec<DownloadItem>, ClientError> {
        self.api.list_seeding_items().await
    }

    /// Items whose category is one of `categories`.
    #[must_use]
    pub fn filter_by_category(
        items: Vec<DownloadItem>,
        categories: &[CleanCategory],
    ) -> Vec<DownloadItem> {
        items
            .into_iter()
            .filter(|item| categories.iter().any(|c| item.has_category(&c.name)))
            .collect()
    }

    /// Items whose category is one of `names`.
    #[must_use]
    pub fn filter_by_category_names(items: Vec<DownloadItem>, names: &[String]) -> Vec<DownloadItem> {
        items
            .into_iter()
            .filter(|item| names.iter().any(|name| item.has_category(name)))
            .collect()
    }

    /// Deletes seeding items that met their category's limits. Returns the
    /// number cleaned.
    ///
    /// Items still tracked by an Arr queue (`excluded`), ignored items and,
    /// unless `delete_private`, private items are left alone.
    #[instrument(skip_all, fields(client = %self.name, candidates = items.len()))]
    pub async fn clean_seeding(
        &self,
        items: &[DownloadItem],
        categories: &[CleanCategory],
        excluded: &HashSet<String>,
        ignored: &IgnoredDownloads,
        delete_private: bool,
    ) -> usize {
        let mut cleaned = 0;

        for item in items {
            if excluded.contains(&item.hash.to_lowercase()) {
                debug!(name = %item.name, "still tracked by an arr, skipping");
                continue;
            }
            if ignored.matches(item) {
                debug!(name = %item.name, "ignored, skipping");
                continue;
            }
            if item.is_private && !delete_private {
                debug!(name = %item.name, "private, skipping");
                continue;
            }
            let Some(category) = categories.iter().find(|c| item.has_category(&c.name)) else {
                continue;
            };
            let Some(reason) = evaluate_seeding(item.ratio, item.seeding_time, category) else {
                continue;
            };

            if let Err(error) = self.delete_item(&item.hash).await {
                warn!(name = %item.name, error = %error, "failed to clean seeding item");
                continue;
            }

            info!(
                name = %item.name,
                category = %category.name,
                reason = %reason,
                ratio = item.ratio,
                "seeding item cleaned"
            );
            cleaned += 1;
            self.notify(NotificationEvent::DownloadCleaned {
                client: self.name.clone(),
                hash: item.hash.clone(),
                name: item.name.clone(),
                category: category.name.clone(),
                reason,
                ratio: item.ratio,
                seeding_time: item.seeding_time,
            })
            .await;
        }

        cleaned
    }

    // ==================== Unlinked ====================

    /// Moves (or tags) items none of whose wanted files are hardlinked
    /// elsewhere. Returns the number changed.
    ///
    /// Expects the shared [`HardlinkInspector`] to be populated with the
    /// ignored root already when `unlinked.ignored_root_dir` is set.
    #[instrument(skip_all, fields(client = %self.name, candidates = items.len()))]
    pub async fn reclassify_unlinked(
        &self,
        items: &[DownloadItem],
        excluded: &HashSet<String>,
        ignored: &IgnoredDownloads,
        unlinked: &UnlinkedConfig,
    ) -> usize {
        let target = unlinked.target_category.trim();
        let ignore_root = unlinked.ignored_root_dir.is_some();
        let use_tag = unlinked.use_tag && self.api.supports_tags();
        let mut changed = 0;

        for item in items {
            if excluded.contains(&item.hash.to_lowercase()) || ignored.matches(item) {
                continue;
            }
            if item.has_category(target) || (use_tag && item.has_tag(target)) {
                continue;
            }

            let files = if item.files.is_empty() {
                match self.api.load_files(item).await {
                    Ok(files) => files,
                    Err(error) => {
                        warn!(name = %item.name, error = %error, "failed to list files, skipping");
                        continue;
                    }
                }
            } else {
                item.files.clone()
            };

            match self.has_external_links(item, &files, ignore_root) {
                Ok(true) => continue,
                Ok(false) => {}
                Err(error) => {
                    warn!(name = %item.name, error = %error, "link count unavailable, skipping");
                    continue;
                }
            }

            let result = if use_tag {
                self.mutate("add tag", &item.hash, || self.api.add_tag(item, target))
                    .await
            } else {
                self.mutate("set category", &item.hash, || {
                    self.api.set_category(item, target)
                })
                .await
            };
            if let Err(error) = result {
                warn!(name = %item.name, error = %error, "failed to reclassify unlinked item");
                continue;
            }

            info!(name = %item.name, to = target, tagged = use_tag, "unlinked item reclassified");
            changed += 1;
            self.notify(NotificationEvent::CategoryChanged {
                client: self.name.clone(),
                hash: item.hash.clone(),
                name: item.name.clone(),
                from: item.category.clone(),
                to: target.to_string(),
                tagged: use_tag,
            })
            .await;
        }

        changed
    }

    /// `Ok(true)` as soon as one wanted file has a link outside the item.
    /// Items without wanted files count as linked so they are left alone.
    fn has_external_links(
        &self,
        item: &DownloadItem,
        files: &[DownloadFile],
        ignore_root: bool,
    ) -> Result<bool, HardlinkError> {
        let mut wanted = files.iter().filter(|file| file.is_wanted()).peekable();
        if wanted.peek().is_none() {
            return Ok(true);
        }
        for file in wanted {
            let path: PathBuf = item.save_path.join(&file.name);
            let links = self.hardlinks.external_link_count(&path, ignore_root)?;
            if links > 0 {
                debug!(file = %path.display(), links, "file is linked");
                return Ok(true);
            }
        }
        Ok(false)
    }
}
