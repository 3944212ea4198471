//! Strike counters and progress snapshots.
//!
//! # Overview
//!
//! A strike is one observation of an unhealthy download. Counters are keyed by
//! `(StrikeType, hash)` and live in a sliding window: an item that is not seen
//! for [`sliding_window`] of the queue cleaner's trigger interval forgets its
//! strikes. Reaching the configured maximum reports "limit reached" once and
//! clears the counter, so a removed-then-readded item starts from zero.
//!
//! Progress snapshots record the last downloaded byte count per hash. When an
//! item has moved forward since the previous run, its stalled counter is
//! cleared.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use cleanarr_core::strikes::{StrikeStore, StrikeType, sliding_window};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let store = StrikeStore::new(sliding_window(Duration::from_secs(300)));
//! assert!(!store.strike_and_check_limit("ABC", StrikeType::Stalled, 2));
//! assert!(store.strike_and_check_limit("abc", StrikeType::Stalled, 2));
//! assert_eq!(store.count("abc", StrikeType::Stalled), 0);
//! # }
//! ```

mod cache;

use std::fmt;
use std::time::Duration;

use tracing::{debug, info};

pub use cache::SlidingCache;

/// Added to the trigger interval so that an entry survives one late run.
pub const WINDOW_BUFFER: Duration = Duration::from_secs(2 * 60 * 60);

/// Expiration window for a job triggered every `trigger_interval`.
#[must_use]
pub fn sliding_window(trigger_interval: Duration) -> Duration {
    trigger_interval + WINDOW_BUFFER
}

/// What an individual strike counter tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StrikeType {
    Stalled,
    Slow,
    FailedImport,
    DownloadingMetadata,
}

impl fmt::Display for StrikeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Stalled => "stalled",
            Self::Slow => "slow",
            Self::FailedImport => "failed import",
            Self::DownloadingMetadata => "downloading metadata",
        };
        f.write_str(name)
    }
}

/// Result of recording one strike.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StrikeOutcome {
    /// Counter value after this strike; 0 when striking is disabled.
    pub count: u16,
    /// The counter reached the maximum and was cleared.
    pub limit_reached: bool,
}

impl StrikeOutcome {
    const DISABLED: Self = Self {
        count: 0,
        limit_reached: false,
    };
}

/// Sliding-window strike counters plus per-hash progress snapshots.
#[derive(Debug)]
pub struct StrikeStore {
    strikes: SlidingCache<(StrikeType, String), u16>,
    progress: SlidingCache<String, u64>,
}

impl StrikeStore {
    /// Creates a store whose entries expire after `window` without access.
    #[must_use]
    pub fn new(window: Duration) -> Self {
        Self {
            strikes: SlidingCache::new(window),
            progress: SlidingCache::new(window),
        }
    }

    #[must_use]
    pub fn window(&self) -> Duration {
        self.strikes.window()
    }

    /// Records one strike against `key`.
    ///
    /// A `max_strikes` of 0 disables the check: nothing is recorded. When the
    /// new count reaches `max_strikes` the counter is cleared in the same
    /// atomic step and `limit_reached` is set.
    pub fn strike(&self, key: &str, strike_type: StrikeType, max_strikes: u16) -> StrikeOutcome {
        if max_strikes == 0 {
            return StrikeOutcome::DISABLED;
        }

        let key = normalize(key);
        let mut count = 0;
        self.strikes.update((strike_type, key.clone()), |current| {
            count = current.copied().unwrap_or(0).saturating_add(1);
            (count < max_strikes).then_some(count)
        });

        let limit_reached = count >= max_strikes;
        info!(
            hash = %key,
            strike_type = %strike_type,
            count,
            max_strikes,
            limit_reached,
            "strike recorded"
        );
        StrikeOutcome {
            count,
            limit_reached,
        }
    }

    /// [`StrikeStore::strike`] reduced to "should the item go now?".
    pub fn strike_and_check_limit(
        &self,
        key: &str,
        strike_type: StrikeType,
        max_strikes: u16,
    ) -> bool {
        self.strike(key, strike_type, max_strikes).limit_reached
    }

    /// Compares `downloaded` against the last snapshot for `key`.
    ///
    /// If `enabled` and the item moved forward, its stalled counter is cleared
    /// and `true` is returned. The snapshot is always updated.
    pub fn reset_on_progress(&self, key: &str, downloaded: u64, enabled: bool) -> bool {
        let key = normalize(key);
        let previous = self.progress.get(&key);
        self.progress.insert(key.clone(), downloaded);

        let progressed = previous.is_some_and(|before| downloaded > before);
        if !(enabled && progressed) {
            return false;
        }

        if self
            .strikes
            .remove(&(StrikeType::Stalled, key.clone()))
            .is_some()
        {
            info!(hash = %key, downloaded, "download progressed, stalled strikes reset");
        } else {
            debug!(hash = %key, downloaded, "download progressed");
        }
        true
    }

    /// Clears one counter.
    pub fn reset(&self, key: &str, strike_type: StrikeType) {
        let key = normalize(key);
        if let Some(count) = self.strikes.remove(&(strike_type, key.clone())) {
            debug!(hash = %key, strike_type = %strike_type, count, "strikes reset");
        }
    }

    /// Current live count.
    #[must_use]
    pub fn count(&self, key: &str, strike_type: StrikeType) -> u16 {
        self.strikes
            .get(&(strike_type, normalize(key)))
            .unwrap_or(0)
    }

    /// Drops expired counters and snapshots.
    pub fn purge_expired(&self) -> usize {
        let purged = self.strikes.purge_expired() + self.progress.purge_expired();
        if purged > 0 {
            debug!(purged, "expired strike entries purged");
        }
        purged
    }
}

fn normalize(key: &str) -> String {
    key.trim().to_lowercase()
}
