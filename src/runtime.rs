//! Wiring and triggers.
//!
//! # Overview
//!
//! [`Runtime`] owns the shared state (strike store, hardlink inspector, dry-run
//! toggle, client registry), the two topic workers, and both jobs. Each job
//! takes a fresh configuration snapshot and a fresh set of logged-in clients
//! at the start of every run.
//!
//! [`Runtime::run`] drives both jobs on their own intervals until the token is
//! cancelled. A run still in progress when the next tick is due delays that
//! tick rather than overlapping it. Intervals are read once when `run` starts.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::blocklist::{BlocklistError, BlocklistProvider, FileBlocklistProvider};
use crate::clients::{ClientRegistry, LoginOutcome};
use crate::config::{AppConfig, ConfigProvider};
use crate::download_cleaner::{DownloadCleaner, DownloadCleanerReport};
use crate::dry_run::DryRun;
use crate::hardlinks::HardlinkInspector;
use crate::notifications::{NotificationDispatcher, NotificationPublisher, Notifier};
use crate::pipeline::{RemovalExecutor, Topic, TopicWorker};
use crate::queue_cleaner::{QueueCleaner, QueueCleanerReport};
use crate::strikes::{StrikeStore, sliding_window};

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error(transparent)]
    Blocklist(#[from] BlocklistError),
}

/// Runtime options that do not come from the configuration file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RuntimeOptions {
    /// Forces dry-run regardless of `general.dry_run`.
    pub force_dry_run: bool,
}

pub struct Runtime {
    config: Arc<dyn ConfigProvider>,
    options: RuntimeOptions,
    dry_run: DryRun,
    strikes: Arc<StrikeStore>,
    registry: ClientRegistry,
    blocklists: Arc<FileBlocklistProvider>,
    queue_cleaner: QueueCleaner,
    download_cleaner: DownloadCleaner,
    removal_worker: TopicWorker,
    notification_worker: TopicWorker,
}

impl Runtime {
    /// Spawns the topic workers and builds both jobs.
    ///
    /// The strike window is derived from the queue cleaner interval of the
    /// configuration current at this point.
    ///
    /// # Errors
    ///
    /// [`RuntimeError::Blocklist`] if the blocklist HTTP client cannot be
    /// built.
    pub async fn start(
        config: Arc<dyn ConfigProvider>,
        options: RuntimeOptions,
        publishers: Vec<Arc<dyn NotificationPublisher>>,
    ) -> Result<Self, RuntimeError> {
        let snapshot = config.snapshot().await;
        let dry_run = DryRun::new(options.force_dry_run || snapshot.general.dry_run);

        let window = sliding_window(snapshot.queue_cleaner.trigger_interval());
        let strikes = Arc::new(StrikeStore::new(window));
        let hardlinks = Arc::new(HardlinkInspector::new());
        let blocklists = Arc::new(FileBlocklistProvider::new(
            &snapshot.general.http_settings(),
        )?);

        let (notifier, notification_worker): (Notifier, TopicWorker) = Topic::spawn(
            "notifications",
            Arc::new(NotificationDispatcher::new(publishers)),
        );
        let (removals, removal_worker) = Topic::spawn(
            "removals",
            Arc::new(RemovalExecutor::new(Some(notifier.clone()))),
        );

        let registry = ClientRegistry::new(
            strikes.clone(),
            hardlinks.clone(),
            dry_run.clone(),
            Some(notifier.clone()),
        );
        let provider: Arc<dyn BlocklistProvider> = blocklists.clone();
        let queue_cleaner =
            QueueCleaner::new(strikes.clone(), provider, removals, dry_run.clone())
                .with_notifier(notifier);
        let download_cleaner = DownloadCleaner::new(hardlinks, dry_run.clone());

        info!(
            dry_run = dry_run.is_enabled(),
            strike_window_secs = window.as_secs(),
            "runtime started"
        );

        Ok(Self {
            config,
            options,
            dry_run,
            strikes,
            registry,
            blocklists,
            queue_cleaner,
            download_cleaner,
            removal_worker,
            notification_worker,
        })
    }

    /// Snapshot plus logged-in clients for one run.
    async fn prepare(&self) -> (Arc<AppConfig>, LoginOutcome) {
        let config = self.config.snapshot().await;
        self.dry_run
            .set(self.options.force_dry_run || config.general.dry_run);
        self.registry.sync(&config).await;
        let clients = self.registry.logged_in().await;
        (config, clients)
    }

    /// One queue cleaner run.
    pub async fn run_queue_cleaner(&self, cancel: &CancellationToken) -> QueueCleanerReport {
        let (config, clients) = self.prepare().await;
        if config.content_blocker.enabled {
            self.blocklists.refresh_all(&config).await;
        }
        self.strikes.purge_expired();
        self.queue_cleaner.run(&config, &clients, cancel).await
    }

    /// One download cleaner run.
    pub async fn run_download_cleaner(&self, cancel: &CancellationToken) -> DownloadCleanerReport {
        let (config, clients) = self.prepare().await;
        self.download_cleaner.run(&config, &clients.ready, cancel).await
    }

    /// Runs each enabled job once, queue cleaner first.
    pub async fn run_once(&self, cancel: &CancellationToken) {
        let config = self.config.snapshot().await;
        if config.queue_cleaner.enabled {
            self.run_queue_cleaner(cancel).await;
        }
        if config.download_cleaner.enabled && !cancel.is_cancelled() {
            self.run_download_cleaner(cancel).await;
        }
    }

    /// Triggers enabled jobs on their intervals until `cancel` fires.
    pub async fn run(&self, cancel: &CancellationToken) {
        let config = self.config.snapshot().await;
        let queue_interval = config
            .queue_cleaner
            .enabled
            .then(|| config.queue_cleaner.trigger_interval());
        let download_interval = config
            .download_cleaner
            .enabled
            .then(|| config.download_cleaner.trigger_interval());

        tokio::join!(
            every("queue cleaner", queue_interval, cancel, || async move {
                self.run_queue_cleaner(cancel).await;
            }),
            every("download cleaner", download_interval, cancel, || async move {
                self.run_download_cleaner(cancel).await;
            }),
        );
    }

    /// Drains the removal topic, then the notification topic.
    pub async fn shutdown(self) {
        self.removal_worker.shutdown().await;
        self.notification_worker.shutdown().await;
        info!("runtime stopped");
    }
}

/// Calls `job` every `period` (first call immediately) until cancelled.
/// A `None` period only waits for cancellation.
async fn every<F, Fut>(
    name: &'static str,
    period: Option<Duration>,
    cancel: &CancellationToken,
    mut job: F,
) where
    F: FnMut() -> Fut,
    Fut: Future<Output = ()>,
{
    let Some(period) = period else {
        debug!(job = name, "disabled");
        cancel.cancelled().await;
        return;
    };

    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    info!(job = name, interval_secs = period.as_secs(), "scheduled");

    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            _ = ticker.tick() => {
                debug!(job = name, "triggered");
                job().await;
            }
        }
    }
    debug!(job = name, "stopped");
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::config::SharedConfig;
    use crate::notifications::LoggingPublisher;

    #[tokio::test(start_paused = true)]
    async fn test_every_runs_immediately_then_on_interval() {
        let cancel = CancellationToken::new();
        let counter = AtomicUsize::new(0);
        let calls = &counter;

        let stopper = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(125)).await;
            stopper.cancel();
        });

        every("test", Some(Duration::from_secs(60)), &cancel, || async move {
            calls.fetch_add(1, Ordering::SeqCst);
        })
        .await;

        // t = 0, 60, 120
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_disabled_job_waits_for_cancel() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        every("off", None, &cancel, || async {}).await;
    }

    #[tokio::test]
    async fn test_run_once_with_nothing_enabled() {
        let config: Arc<dyn ConfigProvider> = Arc::new(SharedConfig::new(AppConfig::default()));
        let publishers: Vec<Arc<dyn NotificationPublisher>> = vec![Arc::new(LoggingPublisher)];
        let runtime = Runtime::start(
            config,
            RuntimeOptions {
                force_dry_run: true,
            },
            publishers,
        )
        .await
        .unwrap();

        runtime.run_once(&CancellationToken::new()).await;
        assert!(runtime.dry_run.is_enabled());
        runtime.shutdown().await;
    }
}
