//! Seeding limit rule.

use std::time::Duration;

use super::CleanReason;
use crate::config::CleanCategory;

const SECS_PER_HOUR: f64 = 3600.0;

/// Decides whether a seeding item has met its category's limits.
///
/// The ratio limit applies once the minimum seed time has passed (a
/// non-positive minimum means immediately). Failing that, the maximum seed
/// time applies on its own. Negative limits are disabled.
#[must_use]
pub fn evaluate_seeding(
    ratio: f64,
    seeding_time: Duration,
    category: &CleanCategory,
) -> Option<CleanReason> {
    let hours = seeding_time.as_secs_f64() / SECS_PER_HOUR;

    let min_seed_met = category.min_seed_time <= 0.0 || hours >= category.min_seed_time;
    if category.max_ratio >= 0.0 && min_seed_met && ratio >= category.max_ratio {
        return Some(CleanReason::MaxRatioReached);
    }

    if category.max_seed_time >= 0.0 && hours >= category.max_seed_time {
        return Some(CleanReason::MaxSeedTimeReached);
    }

    None
}
