//! Failed-import rule, evaluated from Arr queue records alone.

use tracing::debug;

use crate::arr::QueueRecord;
use crate::config::FailedImportConfig;
use crate::strikes::{StrikeOutcome, StrikeStore, StrikeType};

const IMPORT_STATES: [&str; 3] = ["importPending", "importFailed", "importBlocked"];

/// The Arr reports the download finished but could not import it.
#[must_use]
pub fn is_import_failure(record: &QueueRecord) -> bool {
    record.tracked_download_status.eq_ignore_ascii_case("warning")
        && IMPORT_STATES
            .iter()
            .any(|state| record.tracked_download_state.eq_ignore_ascii_case(state))
}

/// Any status message contains one of `patterns` (case-insensitive).
#[must_use]
pub fn has_ignored_message(record: &QueueRecord, patterns: &[String]) -> bool {
    let patterns: Vec<String> = patterns
        .iter()
        .map(|p| p.trim().to_lowercase())
        .filter(|p| !p.is_empty())
        .collect();
    if patterns.is_empty() {
        return false;
    }
    record.messages().any(|message| {
        let message = message.to_lowercase();
        patterns.iter().any(|pattern| message.contains(pattern))
    })
}

/// Strikes the group if one of its records failed to import.
///
/// Returns `None` when the check does not apply: disabled, no failing
/// record, a private item with `ignore_private`, or an ignored message.
#[must_use]
pub fn strike_failed_import(
    strikes: &StrikeStore,
    config: &FailedImportConfig,
    hash: &str,
    records: &[QueueRecord],
    is_private: bool,
) -> Option<StrikeOutcome> {
    if config.max_strikes == 0 || (is_private && config.ignore_private) {
        return None;
    }
    let failing = records.iter().find(|record| is_import_failure(record))?;
    if records
        .iter()
        .any(|record| has_ignored_message(record, &config.ignored_patterns))
    {
        debug!(hash, title = %failing.title, "import failure matches an ignored pattern");
        return None;
    }

    Some(strikes.strike(hash, StrikeType::FailedImport, config.max_strikes))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::arr::StatusMessage;

    fn failing(message: &str) -> QueueRecord {
        QueueRecord {
            id: 1,
            download_id: Some("ABC".into()),
            title: "Show.S01E01".into(),
            tracked_download_status: "warning".into(),
            tracked_download_state: "importPending".into(),
            status_messages: vec![StatusMessage {
                title: "Show.S01E01.mkv".into(),
                messages: vec![message.into()],
            }],
            ..QueueRecord::default()
        }
    }

    fn config(max_strikes: u16) -> FailedImportConfig {
        FailedImportConfig {
            max_strikes,
            ignored_patterns: vec!["Not an upgrade".into()],
            ..FailedImportConfig::default()
        }
    }

    #[test]
    fn test_import_failure_detection() {
        assert!(is_import_failure(&failing("x")));

        let mut ok = failing("x");
        ok.tracked_download_status = "ok".into();
        assert!(!is_import_failure(&ok));

        let mut downloading = failing("x");
        downloading.tracked_download_state = "downloading".into();
        assert!(!is_import_failure(&downloading));
    }

    #[tokio::test]
    async fn test_failed_import_strikes_until_limit() {
        let strikes = StrikeStore::new(Duration::from_secs(3600));
        let records = vec![failing("No files found are eligible for import")];

        let first = strike_failed_import(&strikes, &config(2), "abc", &records, false).unwrap();
        assert!(!first.limit_reached);
        let second = strike_failed_import(&strikes, &config(2), "abc", &records, false).unwrap();
        assert!(second.limit_reached);
    }

    #[tokio::test]
    async fn test_ignored_message_skips_strike() {
        let strikes = StrikeStore::new(Duration::from_secs(3600));
        let records = vec![failing("not an upgrade for existing episode file")];

        assert!(strike_failed_import(&strikes, &config(1), "abc", &records, false).is_none());
        assert_eq!(strikes.count("abc", StrikeType::FailedImport), 0);
    }

    #[tokio::test]
    async fn test_disabled_and_private_skip() {
        let strikes = StrikeStore::new(Duration::from_secs(3600));
        let records = vec![failing("x")];
        assert!(strike_failed_import(&strikes, &config(0), "abc", &records, false).is_none());

        let private = FailedImportConfig {
            ignore_private: true,
            ..config(1)
        };
        assert!(strike_failed_import(&strikes, &private, "abc", &records, true).is_none());
    }
}
