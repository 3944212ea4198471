//! Filename evaluation against blacklists and whitelists.
//!
//! # Overview
//!
//! A [`BlocklistSet`] holds literal patterns and compiled regexes under one
//! [`BlocklistType`]. Literal patterns match case-insensitively:
//!
//! | Pattern    | Matches when the filename...  |
//! |------------|-------------------------------|
//! | `sample`   | contains `sample`             |
//! | `*.exe`    | ends with `.exe`              |
//! | `readme*`  | starts with `readme`          |
//! | `*crack*`  | contains `crack`              |
//!
//! Under a blacklist a filename is valid when nothing matches. Under a
//! whitelist it is valid when something matches, so an empty whitelist
//! rejects everything.

mod provider;

use regex::Regex;
use serde::{Deserialize, Serialize};

pub use provider::{
    BlocklistError, BlocklistProvider, FileBlocklistProvider, StaticBlocklistProvider,
    parse_blocklist,
};

/// Policy applied to a pattern set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlocklistType {
    /// Matching files are rejected.
    #[default]
    Blacklist,
    /// Only matching files are accepted.
    Whitelist,
}

/// Patterns plus regexes evaluated under one policy.
#[derive(Debug, Clone, Default)]
pub struct BlocklistSet {
    kind: BlocklistType,
    patterns: Vec<String>,
    regexes: Vec<Regex>,
}

impl BlocklistSet {
    /// Builds a set; literal patterns are lowercased, blank ones dropped.
    #[must_use]
    pub fn new(kind: BlocklistType, patterns: Vec<String>, regexes: Vec<Regex>) -> Self {
        let patterns = patterns
            .into_iter()
            .map(|p| p.trim().to_lowercase())
            .filter(|p| !p.is_empty())
            .collect();
        Self {
            kind,
            patterns,
            regexes,
        }
    }

    #[must_use]
    pub fn kind(&self) -> BlocklistType {
        self.kind
    }

    #[must_use]
    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }

    #[must_use]
    pub fn regexes(&self) -> &[Regex] {
        &self.regexes
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty() && self.regexes.is_empty()
    }

    /// Applies the set's policy to `filename`.
    #[must_use]
    pub fn is_valid(&self, filename: &str) -> bool {
        is_valid(filename, self.kind, &self.patterns, &self.regexes)
    }
}

/// Evaluates `filename` against `patterns` and `regexes` under `kind`.
#[must_use]
pub fn is_valid(filename: &str, kind: BlocklistType, patterns: &[String], regexes: &[Regex]) -> bool {
    let lowered = filename.to_lowercase();
    let matched = patterns
        .iter()
        .any(|pattern| matches_pattern(&lowered, &pattern.to_lowercase()))
        || regexes.iter().any(|regex| regex.is_match(filename));

    match kind {
        BlocklistType::Blacklist => !matched,
        BlocklistType::Whitelist => matched,
    }
}

/// Literal match with optional leading/trailing `*` anchors. Both sides must
/// already be lowercase.
fn matches_pattern(filename: &str, pattern: &str) -> bool {
    let leading = pattern.starts_with('*');
    let trailing = pattern.len() > 1 && pattern.ends_with('*');
    let core = pattern.trim_start_matches('*').trim_end_matches('*');
    if core.is_empty() {
        return false;
    }

    match (leading, trailing) {
        (true, false) => filename.ends_with(core),
        (false, true) => filename.starts_with(core),
        _ => filename.contains(core),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn patterns(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| (*s).to_string()).collect()
    }

    // ==================== Blacklist ====================

    #[test]
    fn test_blacklist_rejects_substring_match() {
        let list = patterns(&["sample"]);
        assert!(!is_valid("Show.S01E01.SAMPLE.mkv", BlocklistType::Blacklist, &list, &[]));
        assert!(is_valid("Show.S01E01.mkv", BlocklistType::Blacklist, &list, &[]));
    }

    #[test]
    fn test_blacklist_rejects_regex_match() {
        let regexes = vec![Regex::new(r"(?i)\.(exe|lnk)$").unwrap()];
        assert!(!is_valid("setup.EXE", BlocklistType::Blacklist, &[], &regexes));
        assert!(is_valid("movie.mkv", BlocklistType::Blacklist, &[], &regexes));
    }

    #[test]
    fn test_empty_blacklist_accepts_everything() {
        assert!(is_valid("anything.bin", BlocklistType::Blacklist, &[], &[]));
    }

    // ==================== Whitelist ====================

    #[test]
    fn test_whitelist_accepts_only_matches() {
        let list = patterns(&["*.mkv", "*.srt"]);
        assert!(is_valid("Movie.2020.MKV", BlocklistType::Whitelist, &list, &[]));
        assert!(!is_valid("Movie.2020.mkv.exe", BlocklistType::Whitelist, &list, &[]));
    }

    #[test]
    fn test_empty_whitelist_rejects_everything() {
        assert!(!is_valid("Movie.mkv", BlocklistType::Whitelist, &[], &[]));
    }

    #[test]
    fn test_whitelist_regex_counts_as_match() {
        let regexes = vec![Regex::new(r"(?i)\.mp4$").unwrap()];
        assert!(is_valid("a.MP4", BlocklistType::Whitelist, &[], &regexes));
    }

    // ==================== Wildcards ====================

    #[test]
    fn test_wildcard_anchors() {
        assert!(matches_pattern("readme.txt", "readme*"));
        assert!(!matches_pattern("the readme.txt", "readme*"));
        assert!(matches_pattern("setup.exe", "*.exe"));
        assert!(!matches_pattern("setup.exe.txt", "*.exe"));
        assert!(matches_pattern("keygen crack tool", "*crack*"));
        assert!(!matches_pattern("anything", "*"));
    }

    // ==================== BlocklistSet ====================

    #[test]
    fn test_set_normalizes_patterns() {
        let set = BlocklistSet::new(
            BlocklistType::Blacklist,
            patterns(&["  Sample ", "", "*.EXE"]),
            vec![],
        );
        assert_eq!(set.patterns(), &["sample".to_string(), "*.exe".to_string()]);
        assert!(!set.is_valid("Setup.exe"));
        assert!(set.is_valid("episode.mkv"));
    }

    #[test]
    fn test_blocklist_type_deserializes_lowercase() {
        let kind: BlocklistType = serde_json::from_str("\"whitelist\"").unwrap();
        assert_eq!(kind, BlocklistType::Whitelist);
    }
}
