//! Queue-item policy of `DownloadService` over the in-memory client.

use std::sync::Arc;

use cleanarr_core::blocklist::{BlocklistSet, BlocklistType};
use cleanarr_core::clients::{
    DeleteReason, DownloadItem, IgnoredDownloads, ItemState, QueueItemVerdict, QueuePolicy,
};
use cleanarr_core::config::{ByteSize, ContentBlockerConfig, QueueCleanerConfig};
use cleanarr_core::strikes::StrikeType;

mod support;
use support::fake_client::{FakeClient, Harness, downloading, file, stalled};

const HASH: &str = "feedfacefeedfacefeedfacefeedfacefeedface";

struct Policy {
    queue_cleaner: QueueCleanerConfig,
    content_blocker: ContentBlockerConfig,
    blocklist: Option<BlocklistSet>,
    ignored: IgnoredDownloads,
}

impl Policy {
    fn new() -> Self {
        Self {
            queue_cleaner: QueueCleanerConfig::default(),
            content_blocker: ContentBlockerConfig::default(),
            blocklist: None,
            ignored: IgnoredDownloads::default(),
        }
    }

    fn view(&self) -> QueuePolicy<'_> {
        QueuePolicy {
            queue_cleaner: &self.queue_cleaner,
            content_blocker: &self.content_blocker,
            blocklist: self.blocklist.as_ref(),
            ignored: &self.ignored,
        }
    }
}

async fn evaluate(harness: &Harness, fake: Arc<FakeClient>, policy: &Policy) -> QueueItemVerdict {
    harness
        .service("fake", fake)
        .evaluate_queue_item(HASH, &policy.view())
        .await
        .unwrap()
}

// ==================== Lookup ====================

#[tokio::test]
async fn test_unknown_hash_has_no_side_effects() {
    let harness = Harness::new();
    let mut policy = Policy::new();
    policy.queue_cleaner.stalled.max_strikes = 1;
    let fake = Arc::new(FakeClient::qbittorrent());

    let verdict = evaluate(&harness, fake.clone(), &policy).await;

    assert_eq!(verdict, QueueItemVerdict::not_found());
    assert_eq!(fake.calls(), vec![format!("find:{HASH}")]);
}

#[tokio::test]
async fn test_ignored_by_category_is_kept_and_flagged() {
    let harness = Harness::new();
    let mut policy = Policy::new();
    policy.queue_cleaner.stalled.max_strikes = 1;
    policy.ignored = IgnoredDownloads::new(["keep"]);
    let item = DownloadItem {
        category: Some("Keep".to_string()),
        ..stalled(HASH, 0)
    };
    let fake = Arc::new(FakeClient::qbittorrent().with_item(item));

    let verdict = evaluate(&harness, fake, &policy).await;

    assert!(verdict.found && verdict.ignored && !verdict.should_remove);
    assert_eq!(harness.strikes.count(HASH, StrikeType::Stalled), 0);
}

// ==================== Slow ====================

#[tokio::test]
async fn test_slow_item_removed_at_limit() {
    let harness = Harness::new();
    let mut policy = Policy::new();
    policy.queue_cleaner.slow.max_strikes = 2;
    policy.queue_cleaner.slow.min_speed = ByteSize::from_bytes(1_000_000);
    let fake = Arc::new(FakeClient::qbittorrent().with_item(downloading(HASH)));

    let first = evaluate(&harness, fake.clone(), &policy).await;
    let second = evaluate(&harness, fake, &policy).await;

    assert!(!first.should_remove);
    assert_eq!(second, QueueItemVerdict::remove(false, DeleteReason::Slow));
}

#[tokio::test]
async fn test_slow_check_skips_items_above_size_limit() {
    let harness = Harness::new();
    let mut policy = Policy::new();
    policy.queue_cleaner.slow.max_strikes = 1;
    policy.queue_cleaner.slow.min_speed = ByteSize::from_bytes(1_000_000);
    policy.queue_cleaner.slow.ignore_above_size = Some(ByteSize::from_bytes(1_000));
    let fake = Arc::new(FakeClient::qbittorrent().with_item(downloading(HASH)));

    let verdict = evaluate(&harness, fake, &policy).await;

    assert!(!verdict.should_remove);
    assert_eq!(harness.strikes.count(HASH, StrikeType::Slow), 0);
}

#[tokio::test]
async fn test_long_eta_counts_as_slow() {
    let harness = Harness::new();
    let mut policy = Policy::new();
    policy.queue_cleaner.slow.max_strikes = 1;
    policy.queue_cleaner.slow.max_time_hours = 1.0;
    let item = DownloadItem {
        eta: 7_200,
        ..downloading(HASH)
    };
    let fake = Arc::new(FakeClient::qbittorrent().with_item(item));

    let verdict = evaluate(&harness, fake, &policy).await;

    assert_eq!(verdict.reason, DeleteReason::Slow);
}

// ==================== Stalled ====================

#[tokio::test]
async fn test_stalled_private_item_exempt_when_configured() {
    let harness = Harness::new();
    let mut policy = Policy::new();
    policy.queue_cleaner.stalled.max_strikes = 1;
    policy.queue_cleaner.stalled.ignore_private = true;
    let item = DownloadItem {
        is_private: true,
        ..stalled(HASH, 0)
    };
    let fake = Arc::new(FakeClient::qbittorrent().with_item(item));

    let verdict = evaluate(&harness, fake, &policy).await;

    assert_eq!(verdict, QueueItemVerdict::keep(true));
}

#[tokio::test]
async fn test_stuck_metadata_uses_its_own_counter() {
    let harness = Harness::new();
    let mut policy = Policy::new();
    policy.queue_cleaner.stalled.max_strikes = 5;
    policy.queue_cleaner.stalled.downloading_metadata_max_strikes = 1;
    let item = DownloadItem {
        state: ItemState::DownloadingMetadata,
        ..stalled(HASH, 0)
    };
    let fake = Arc::new(FakeClient::qbittorrent().with_item(item));

    let verdict = evaluate(&harness, fake, &policy).await;

    assert_eq!(verdict.reason, DeleteReason::DownloadingMetadata);
    assert_eq!(harness.strikes.count(HASH, StrikeType::Stalled), 0);
}

#[tokio::test]
async fn test_item_with_eta_is_not_stalled() {
    let harness = Harness::new();
    let mut policy = Policy::new();
    policy.queue_cleaner.stalled.max_strikes = 1;
    let fake = Arc::new(FakeClient::qbittorrent().with_item(downloading(HASH)));

    let verdict = evaluate(&harness, fake, &policy).await;

    assert_eq!(verdict, QueueItemVerdict::keep(false));
}

// ==================== Content blocking ====================

#[tokio::test]
async fn test_whitelist_blocks_everything_not_listed() {
    let harness = Harness::new();
    let mut policy = Policy::new();
    policy.content_blocker.enabled = true;
    policy.blocklist = Some(BlocklistSet::new(
        BlocklistType::Whitelist,
        vec!["*.mkv".to_string()],
        Vec::new(),
    ));
    let item = DownloadItem {
        files: vec![
            file(0, "Show.S01E01.mkv", 1),
            file(1, "Show.nfo", 1),
            file(2, "already-skipped.txt", 0),
        ],
        ..downloading(HASH)
    };
    let fake = Arc::new(FakeClient::qbittorrent().with_item(item));

    let verdict = evaluate(&harness, fake.clone(), &policy).await;

    assert!(!verdict.should_remove);
    assert_eq!(fake.mutations(), vec![format!("set_unwanted:{HASH}:1")]);
}

#[tokio::test]
async fn test_nothing_blocked_makes_no_call() {
    let harness = Harness::new();
    let mut policy = Policy::new();
    policy.content_blocker.enabled = true;
    policy.blocklist = Some(BlocklistSet::new(
        BlocklistType::Blacklist,
        vec!["sample".to_string()],
        Vec::new(),
    ));
    let fake = Arc::new(FakeClient::qbittorrent().with_item(downloading(HASH)));

    evaluate(&harness, fake.clone(), &policy).await;

    assert!(fake.mutations().is_empty());
}

#[tokio::test]
async fn test_private_item_exempt_from_content_blocking() {
    let harness = Harness::new();
    let mut policy = Policy::new();
    policy.content_blocker.enabled = true;
    policy.content_blocker.ignore_private = true;
    policy.blocklist = Some(BlocklistSet::new(
        BlocklistType::Blacklist,
        vec!["*.mkv".to_string()],
        Vec::new(),
    ));
    let item = DownloadItem {
        is_private: true,
        ..downloading(HASH)
    };
    let fake = Arc::new(FakeClient::qbittorrent().with_item(item));

    let verdict = evaluate(&harness, fake.clone(), &policy).await;

    assert!(!verdict.should_remove);
    assert!(fake.mutations().is_empty());
}

#[tokio::test]
async fn test_dry_run_blocks_without_calling_client() {
    let harness = Harness::new();
    harness.dry_run.set(true);
    let mut policy = Policy::new();
    policy.content_blocker.enabled = true;
    policy.blocklist = Some(BlocklistSet::new(
        BlocklistType::Blacklist,
        vec!["*.exe".to_string()],
        Vec::new(),
    ));
    let item = DownloadItem {
        files: vec![file(0, "a.mkv", 1), file(1, "b.exe", 1)],
        ..downloading(HASH)
    };
    let fake = Arc::new(FakeClient::qbittorrent().with_item(item));

    evaluate(&harness, fake.clone(), &policy).await;

    assert!(fake.mutations().is_empty());
}
