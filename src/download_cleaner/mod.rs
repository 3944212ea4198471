//! Download cleaner job: seeding limits and unlinked reclassification.
//!
//! Downloads an Arr application still lists in its queue are never touched;
//! the queue is read fresh at the start of every run to build that exclusion
//! set. If any enabled instance's queue cannot be read, the run does nothing.

use std::collections::HashSet;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::arr::ArrClient;
use crate::clients::{DownloadItem, DownloadService, IgnoredDownloads};
use crate::config::{AppConfig, UnlinkedConfig};
use crate::dry_run::DryRun;
use crate::hardlinks::HardlinkInspector;

/// Counters for one run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DownloadCleanerReport {
    pub clients: usize,
    pub excluded: usize,
    pub cleaned: usize,
    pub reclassified: usize,
    pub cancelled: bool,
    /// Set when an Arr queue could not be read and both sweeps were skipped.
    pub queues_unavailable: bool,
}

#[derive(Debug)]
pub struct DownloadCleaner {
    hardlinks: Arc<HardlinkInspector>,
    dry_run: DryRun,
}

impl DownloadCleaner {
    #[must_use]
    pub fn new(hardlinks: Arc<HardlinkInspector>, dry_run: DryRun) -> Self {
        Self { hardlinks, dry_run }
    }

    /// Runs both sweeps over the already logged-in `services`.
    #[instrument(skip_all, fields(clients = services.len()))]
    pub async fn run(
        &self,
        config: &AppConfig,
        services: &[Arc<DownloadService>],
        cancel: &CancellationToken,
    ) -> DownloadCleanerReport {
        let settings = &config.download_cleaner;
        let unlinked = settings.unlinked.enabled.then_some(&settings.unlinked);
        let mut report = DownloadCleanerReport::default();

        if settings.categories.is_empty() && unlinked.is_none() {
            debug!("no seeding categories or unlinked sweep configured");
            return report;
        }

        let Some(excluded) = self.excluded_hashes(config).await else {
            warn!("arr queue state unknown; skipping download cleaning this run");
            report.queues_unavailable = true;
            return report;
        };
        report.excluded = excluded.len();
        let ignored = IgnoredDownloads::new(&config.general.ignored_downloads);

        if let Some(unlinked) = unlinked {
            self.prepare_ignored_root(unlinked).await;
        }

        for service in services {
            if cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }
            report.clients += 1;

            let mut items = match service.list_seeding_items().await {
                Ok(items) => items,
                Err(error) => {
                    warn!(client = service.name(), error = %error, "failed to list seeding items");
                    continue;
                }
            };

            if !settings.categories.is_empty() {
                let candidates =
                    DownloadService::filter_by_category(items.clone(), &settings.categories);
                let cleaned = service
                    .clean_seeding(
                        &candidates,
                        &settings.categories,
                        &excluded,
                        &ignored,
                        settings.delete_private,
                    )
                    .await;
                report.cleaned += cleaned;

                if cleaned > 0 && unlinked.is_some() && !self.dry_run.is_enabled() {
                    items = match service.list_seeding_items().await {
                        Ok(items) => items,
                        Err(error) => {
                            warn!(client = service.name(), error = %error, "failed to refresh seeding items");
                            continue;
                        }
                    };
                }
            }

            if let Some(unlinked) = unlinked {
                if cancel.is_cancelled() {
                    report.cancelled = true;
                    break;
                }
                report.reclassified += self
                    .sweep_unlinked(service, items, &excluded, &ignored, unlinked)
                    .await;
            }
        }

        if unlinked.is_some() {
            self.hardlinks.clear();
        }

        info!(
            clients = report.clients,
            excluded = report.excluded,
            cleaned = report.cleaned,
            reclassified = report.reclassified,
            cancelled = report.cancelled,
            "download cleaner finished"
        );
        report
    }

    async fn sweep_unlinked(
        &self,
        service: &DownloadService,
        items: Vec<DownloadItem>,
        excluded: &HashSet<String>,
        ignored: &IgnoredDownloads,
        unlinked: &UnlinkedConfig,
    ) -> usize {
        let candidates = DownloadService::filter_by_category_names(items, &unlinked.categories);
        if candidates.is_empty() {
            return 0;
        }

        if let Err(error) = service.create_category(unlinked.target_category.trim()).await {
            warn!(
                client = service.name(),
                error = %error,
                "failed to create unlinked category, skipping client"
            );
            return 0;
        }

        service
            .reclassify_unlinked(&candidates, excluded, ignored, unlinked)
            .await
    }

    /// Download ids present in any enabled Arr queue, or `None` when any
    /// enabled instance could not be read.
    async fn excluded_hashes(&self, config: &AppConfig) -> Option<HashSet<String>> {
        let settings = config.general.http_settings();
        let mut hashes = HashSet::new();

        for (arr_type, instance) in config.arr_instances() {
            let arr = match ArrClient::new(arr_type, instance, &settings, self.dry_run.clone()) {
                Ok(arr) => arr,
                Err(error) => {
                    warn!(instance = %instance.name, error = %error, "arr instance unusable");
                    return None;
                }
            };
            match arr.get_queue().await {
                Ok(records) => hashes.extend(records.iter().filter_map(|record| record.hash())),
                Err(error) => {
                    warn!(instance = %instance.name, error = %error, "failed to read queue");
                    return None;
                }
            }
        }

        debug!(excluded = hashes.len(), "downloads still tracked by arr queues");
        Some(hashes)
    }

    async fn prepare_ignored_root(&self, unlinked: &UnlinkedConfig) {
        let Some(root) = unlinked.ignored_root_dir.clone() else {
            self.hardlinks.clear();
            return;
        };

        let hardlinks = self.hardlinks.clone();
        let populated = tokio::task::spawn_blocking(move || hardlinks.populate(&root)).await;
        match populated {
            Ok(Ok(inodes)) => debug!(inodes, "ignored root scanned"),
            Ok(Err(error)) => warn!(error = %error, "failed to scan ignored root"),
            Err(error) => warn!(error = %error, "ignored root scan panicked"),
        }
    }
}
