//! Queue cleaner job.
//!
//! # Overview
//!
//! For each enabled Arr instance, one after the other:
//!
//! 1. read the whole queue
//! 2. group records by download id (season packs produce one record per
//!    episode)
//! 3. find the download client that owns each group and let it classify the
//!    item ([`DownloadService::evaluate_queue_item`])
//! 4. if the client keeps it, check for a failed import
//! 5. publish a [`RemovalRequest`] for anything that has to go
//!
//! The cleaner never deletes anything itself. A failing instance is logged and
//! the next one processed. A client that fails fatally is dropped for the rest
//! of the run; while any client is missing, downloads no reachable client knows
//! are left alone.

mod failed_import;

use std::collections::HashMap;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

pub use failed_import::{has_ignored_message, is_import_failure, strike_failed_import};

use crate::arr::{ArrClient, ArrError, DownloadProtocol, QueueRecord, SearchCommand};
use crate::blocklist::BlocklistProvider;
use crate::clients::{
    DeleteReason, DownloadService, IgnoredDownloads, LoginOutcome, QueueItemVerdict, QueuePolicy,
};
use crate::config::AppConfig;
use crate::dry_run::DryRun;
use crate::notifications::{NotificationEvent, Notifier, StrikeSource, notify};
use crate::pipeline::{RemovalRequest, RemovalTopic};
use crate::strikes::{StrikeStore, StrikeType};

/// Counters for one run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct QueueCleanerReport {
    pub instances: usize,
    pub failed_instances: usize,
    /// Download-id groups examined.
    pub items: usize,
    pub removals: usize,
    pub cancelled: bool,
}

/// Queue records sharing one download id.
#[derive(Debug, Clone)]
struct QueueGroup {
    hash: String,
    records: Vec<QueueRecord>,
}

impl QueueGroup {
    fn title(&self) -> String {
        self.records
            .first()
            .map(|record| record.title.clone())
            .unwrap_or_default()
    }

    fn is_usenet(&self) -> bool {
        self.records
            .iter()
            .all(|record| record.protocol == DownloadProtocol::Usenet)
    }
}

/// Groups records by lowercased download id, keeping first-seen order.
/// Records without a download id are dropped.
fn group_by_hash(records: Vec<QueueRecord>) -> Vec<QueueGroup> {
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut groups: Vec<QueueGroup> = Vec::new();

    for record in records {
        let Some(hash) = record.hash() else {
            debug!(record_id = record.id, title = %record.title, "record has no download id");
            continue;
        };
        match index.get(&hash) {
            Some(&position) => groups[position].records.push(record),
            None => {
                index.insert(hash.clone(), groups.len());
                groups.push(QueueGroup {
                    hash,
                    records: vec![record],
                });
            }
        }
    }

    groups
}

/// Clients still usable in the current run.
#[derive(Debug)]
struct ClientPool {
    services: Vec<Arc<DownloadService>>,
    unavailable: usize,
}

impl ClientPool {
    fn drop_client(&mut self, index: usize) {
        self.services.remove(index);
        self.unavailable += 1;
    }
}

/// What to do with a group that has to go.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Removal {
    reason: DeleteReason,
    delete_from_client: bool,
}

pub struct QueueCleaner {
    strikes: Arc<StrikeStore>,
    blocklists: Arc<dyn BlocklistProvider>,
    removals: RemovalTopic,
    dry_run: DryRun,
    notifier: Option<Notifier>,
}

impl QueueCleaner {
    #[must_use]
    pub fn new(
        strikes: Arc<StrikeStore>,
        blocklists: Arc<dyn BlocklistProvider>,
        removals: RemovalTopic,
        dry_run: DryRun,
    ) -> Self {
        Self {
            strikes,
            blocklists,
            removals,
            dry_run,
            notifier: None,
        }
    }

    #[must_use]
    pub fn with_notifier(mut self, notifier: Notifier) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Runs over every enabled Arr instance with the already logged-in
    /// clients.
    #[instrument(skip_all, fields(clients = clients.ready.len(), unavailable = clients.unavailable))]
    pub async fn run(
        &self,
        config: &AppConfig,
        clients: &LoginOutcome,
        cancel: &CancellationToken,
    ) -> QueueCleanerReport {
        let mut report = QueueCleanerReport::default();
        let mut pool = ClientPool {
            services: clients.ready.clone(),
            unavailable: clients.unavailable,
        };
        let settings = config.general.http_settings();
        let ignored = IgnoredDownloads::new(&config.general.ignored_downloads);

        for (arr_type, instance) in config.arr_instances() {
            if cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }
            report.instances += 1;

            let arr = match ArrClient::new(arr_type, instance, &settings, self.dry_run.clone()) {
                Ok(arr) => Arc::new(arr),
                Err(error) => {
                    warn!(error = %error, "arr instance unusable");
                    report.failed_instances += 1;
                    continue;
                }
            };

            if let Err(error) = self
                .clean_instance(&arr, config, &mut pool, &ignored, cancel, &mut report)
                .await
            {
                warn!(error = %error, "queue cleaning failed for instance");
                report.failed_instances += 1;
            }
        }

        info!(
            instances = report.instances,
            failed = report.failed_instances,
            items = report.items,
            removals = report.removals,
            cancelled = report.cancelled,
            "queue cleaner finished"
        );
        report
    }

    #[instrument(skip_all, fields(arr = %arr.arr_type(), instance = %arr.name()))]
    async fn clean_instance(
        &self,
        arr: &Arc<ArrClient>,
        config: &AppConfig,
        pool: &mut ClientPool,
        ignored: &IgnoredDownloads,
        cancel: &CancellationToken,
        report: &mut QueueCleanerReport,
    ) -> Result<(), ArrError> {
        let records = arr.get_queue().await?;
        let groups = group_by_hash(records);
        debug!(groups = groups.len(), "queue read");

        let blocklist = self.blocklists.blocklist(arr.arr_type());
        let policy = QueuePolicy {
            queue_cleaner: &config.queue_cleaner,
            content_blocker: &config.content_blocker,
            blocklist: blocklist.as_deref(),
            ignored,
        };

        for group in groups {
            if cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }
            report.items += 1;

            if ignored.contains_hash(&group.hash) {
                debug!(hash = %group.hash, "ignored");
                continue;
            }

            let Some((verdict, owner)) = self.classify(&group, &policy, pool).await else {
                continue;
            };
            let Some(removal) = self.decide(arr, &group, config, &verdict, owner.is_some()).await
            else {
                continue;
            };

            let request = RemovalRequest {
                arr: arr.clone(),
                record_ids: group.records.iter().map(|record| record.id).collect(),
                title: group.title(),
                search: SearchCommand::for_records(arr.arr_type(), &group.records),
                reason: removal.reason,
                client: owner,
                delete_from_client: removal.delete_from_client,
                hash: group.hash,
            };
            info!(hash = %request.hash, title = %request.title, reason = %request.reason, "removal requested");
            if let Err(error) = self.removals.publish(request).await {
                warn!(error = %error, "removal pipeline closed");
                report.cancelled = true;
                break;
            }
            report.removals += 1;
        }

        Ok(())
    }

    /// Asks each client in turn; the first that knows the hash decides.
    ///
    /// A client error only skips that client. A fatal error also drops it from
    /// `pool` for the rest of the run. `None` means the hash was not found but
    /// some client could not be asked, so the group is left alone this run.
    async fn classify(
        &self,
        group: &QueueGroup,
        policy: &QueuePolicy<'_>,
        pool: &mut ClientPool,
    ) -> Option<(QueueItemVerdict, Option<Arc<DownloadService>>)> {
        if group.is_usenet() {
            return Some((QueueItemVerdict::not_found(), None));
        }

        let mut failed = false;
        let mut index = 0;
        while let Some(service) = pool.services.get(index).cloned() {
            match service.evaluate_queue_item(&group.hash, policy).await {
                Ok(verdict) if verdict.found => return Some((verdict, Some(service))),
                Ok(_) => index += 1,
                Err(error) if error.is_fatal() => {
                    warn!(
                        client = service.name(),
                        hash = %group.hash,
                        error = %error,
                        "download client unusable, dropping it for the rest of this run"
                    );
                    failed = true;
                    pool.drop_client(index);
                }
                Err(error) => {
                    warn!(
                        client = service.name(),
                        hash = %group.hash,
                        error = %error,
                        "could not evaluate item with this client"
                    );
                    failed = true;
                    index += 1;
                }
            }
        }

        if failed || pool.unavailable > 0 {
            debug!(
                hash = %group.hash,
                unavailable = pool.unavailable,
                "not found in reachable clients, leaving it for the next run"
            );
            return None;
        }

        debug!(hash = %group.hash, "not found in any download client");
        Some((QueueItemVerdict::not_found(), None))
    }

    /// Turns a client verdict plus the failed-import rule into a removal.
    async fn decide(
        &self,
        arr: &ArrClient,
        group: &QueueGroup,
        config: &AppConfig,
        verdict: &QueueItemVerdict,
        owned: bool,
    ) -> Option<Removal> {
        if verdict.ignored {
            return None;
        }

        let (reason, delete_private) = if verdict.should_remove {
            (verdict.reason, delete_private_for(verdict.reason, config))
        } else {
            let failed_import = &config.queue_cleaner.failed_import;
            let outcome = strike_failed_import(
                &self.strikes,
                failed_import,
                &group.hash,
                &group.records,
                verdict.is_private,
            )?;
            notify(
                self.notifier.as_ref(),
                NotificationEvent::Strike {
                    source: StrikeSource::Arr {
                        arr: arr.arr_type(),
                        instance: arr.name().to_string(),
                    },
                    hash: group.hash.clone(),
                    name: group.title(),
                    strike_type: StrikeType::FailedImport,
                    count: outcome.count,
                    max_strikes: failed_import.max_strikes,
                },
            )
            .await;
            if !outcome.limit_reached {
                return None;
            }
            (DeleteReason::FailedImport, failed_import.delete_private)
        };

        Some(Removal {
            reason,
            delete_from_client: owned && (!verdict.is_private || delete_private),
        })
    }
}

/// The `delete_private` setting governing `reason`.
#[must_use]
pub fn delete_private_for(reason: DeleteReason, config: &AppConfig) -> bool {
    let queue = &config.queue_cleaner;
    match reason {
        DeleteReason::AllFilesSkipped | DeleteReason::AllFilesBlocked => {
            config.content_blocker.delete_private
        }
        DeleteReason::Stalled | DeleteReason::DownloadingMetadata => queue.stalled.delete_private,
        DeleteReason::Slow => queue.slow.delete_private,
        DeleteReason::FailedImport => queue.failed_import.delete_private,
        DeleteReason::None => false,
    }
}
