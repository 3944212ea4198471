//! Semantic checks applied after deserialization.

use std::collections::HashSet;
use std::path::PathBuf;

use thiserror::Error;

use super::model::{AppConfig, CleanCategory, DownloadClientKind};
use crate::http;

/// Shortest accepted trigger interval.
pub const MIN_TRIGGER_INTERVAL_SECS: u64 = 60;

/// Longest accepted trigger interval.
pub const MAX_TRIGGER_INTERVAL_SECS: u64 = 6 * 60 * 60;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {source}")]
    Parse {
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid config value for `{field}`: {message}")]
    Invalid { field: String, message: String },
}

impl ConfigError {
    pub fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Invalid {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl AppConfig {
    /// Checks cross-field rules serde cannot express.
    ///
    /// # Errors
    ///
    /// The first [`ConfigError::Invalid`] found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_interval(
            "queue_cleaner.trigger_interval_secs",
            self.queue_cleaner.trigger_interval_secs,
        )?;
        validate_interval(
            "download_cleaner.trigger_interval_secs",
            self.download_cleaner.trigger_interval_secs,
        )?;

        if self.general.http_timeout_secs == 0 || self.general.http_timeout_secs > 3600 {
            return Err(ConfigError::invalid(
                "general.http_timeout_secs",
                format!("{}. Expected range: 1..=3600", self.general.http_timeout_secs),
            ));
        }
        if self.general.http_max_retries == 0 || self.general.http_max_retries > 10 {
            return Err(ConfigError::invalid(
                "general.http_max_retries",
                format!("{}. Expected range: 1..=10", self.general.http_max_retries),
            ));
        }

        let slow = &self.queue_cleaner.slow;
        if !slow.max_time_hours.is_finite() || slow.max_time_hours < 0.0 {
            return Err(ConfigError::invalid(
                "queue_cleaner.slow.max_time_hours",
                "must be a finite, non-negative number of hours",
            ));
        }

        if self
            .queue_cleaner
            .failed_import
            .ignored_patterns
            .iter()
            .any(|p| p.trim().is_empty())
        {
            return Err(ConfigError::invalid(
                "queue_cleaner.failed_import.ignored_patterns",
                "patterns must not be blank",
            ));
        }

        self.validate_clients()?;
        self.validate_arr()?;
        self.validate_download_cleaner()
    }

    fn validate_clients(&self) -> Result<(), ConfigError> {
        let mut ids = HashSet::new();
        for client in &self.download_clients {
            let id = client.id.trim();
            if id.is_empty() {
                return Err(ConfigError::invalid("download_clients.id", "must not be empty"));
            }
            if !ids.insert(id.to_lowercase()) {
                return Err(ConfigError::invalid(
                    "download_clients.id",
                    format!("duplicate id `{id}`"),
                ));
            }
            if client.kind == DownloadClientKind::Usenet {
                continue;
            }
            let Some(host) = client.host.as_deref() else {
                return Err(ConfigError::invalid(
                    format!("download_clients[{id}].host"),
                    "required for torrent clients",
                ));
            };
            http::base_url(host, client.url_base.as_deref()).map_err(|e| {
                ConfigError::invalid(format!("download_clients[{id}].host"), e.to_string())
            })?;
        }
        Ok(())
    }

    fn validate_arr(&self) -> Result<(), ConfigError> {
        for (arr_type, instance) in self.arr_instances() {
            let field = format!("{arr_type}.instances[{}]", instance.name);
            if instance.name.trim().is_empty() {
                return Err(ConfigError::invalid(
                    format!("{arr_type}.instances.name"),
                    "must not be empty",
                ));
            }
            http::base_url(&instance.url, None)
                .map_err(|e| ConfigError::invalid(format!("{field}.url"), e.to_string()))?;
            if instance.api_key.trim().is_empty() {
                return Err(ConfigError::invalid(format!("{field}.api_key"), "must not be empty"));
            }
        }

        for arr_type in crate::arr::ArrType::ALL {
            if let Some(source) = &self.arr(arr_type).blocklist
                && source.path.trim().is_empty()
            {
                return Err(ConfigError::invalid(
                    format!("{arr_type}.blocklist.path"),
                    "must not be empty",
                ));
            }
        }
        Ok(())
    }

    fn validate_download_cleaner(&self) -> Result<(), ConfigError> {
        let cleaner = &self.download_cleaner;
        let mut names = HashSet::new();
        for category in &cleaner.categories {
            validate_category(category)?;
            if !names.insert(category.name.trim().to_lowercase()) {
                return Err(ConfigError::invalid(
                    "download_cleaner.categories",
                    format!("duplicate category `{}`", category.name),
                ));
            }
        }

        let unlinked = &cleaner.unlinked;
        if unlinked.enabled {
            let target = unlinked.target_category.trim();
            if target.is_empty() {
                return Err(ConfigError::invalid(
                    "download_cleaner.unlinked.target_category",
                    "must not be empty when unlinked cleaning is enabled",
                ));
            }
            if unlinked.categories.is_empty() {
                return Err(ConfigError::invalid(
                    "download_cleaner.unlinked.categories",
                    "at least one category is required when unlinked cleaning is enabled",
                ));
            }
            if unlinked
                .categories
                .iter()
                .any(|c| c.trim().eq_ignore_ascii_case(target))
            {
                return Err(ConfigError::invalid(
                    "download_cleaner.unlinked.categories",
                    "must not contain the target category",
                ));
            }
            if let Some(root) = &unlinked.ignored_root_dir
                && !root.is_absolute()
            {
                return Err(ConfigError::invalid(
                    "download_cleaner.unlinked.ignored_root_dir",
                    "must be an absolute path",
                ));
            }
        }
        Ok(())
    }
}

fn validate_interval(field: &str, secs: u64) -> Result<(), ConfigError> {
    if !(MIN_TRIGGER_INTERVAL_SECS..=MAX_TRIGGER_INTERVAL_SECS).contains(&secs) {
        return Err(ConfigError::invalid(
            field,
            format!("{secs}. Expected range: {MIN_TRIGGER_INTERVAL_SECS}..={MAX_TRIGGER_INTERVAL_SECS}"),
        ));
    }
    Ok(())
}

fn validate_category(category: &CleanCategory) -> Result<(), ConfigError> {
    let field = format!("download_cleaner.categories[{}]", category.name);
    if category.name.trim().is_empty() {
        return Err(ConfigError::invalid("download_cleaner.categories.name", "must not be empty"));
    }
    for (name, value) in [
        ("max_ratio", category.max_ratio),
        ("min_seed_time", category.min_seed_time),
        ("max_seed_time", category.max_seed_time),
    ] {
        if !value.is_finite() {
            return Err(ConfigError::invalid(format!("{field}.{name}"), "must be finite"));
        }
    }
    if category.max_ratio < 0.0 && category.max_seed_time < 0.0 {
        return Err(ConfigError::invalid(
            field,
            "either max_ratio or max_seed_time must be enabled",
        ));
    }
    Ok(())
}
