//! Cleanarr Core Library
//!
//! Download lifecycle policy for Sonarr/Radarr/Lidarr setups: decides which
//! queued downloads are unhealthy, which seeding torrents are done, and which
//! completed downloads nothing links to anymore, then acts on them through an
//! ordered removal pipeline.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//! - [`clients`] - qBittorrent, Deluge and Transmission adapters plus the
//!   shared policy service
//! - [`arr`] - Arr queue and command API client
//! - [`strikes`] - Sliding-window strike counters
//! - [`blocklist`] - Filename blacklist/whitelist evaluation
//! - [`hardlinks`] - Hardlink counting for unlinked detection
//! - [`queue_cleaner`] / [`download_cleaner`] - The two jobs
//! - [`pipeline`] - Ordered removal and notification topics
//! - [`config`], [`http`], [`notifications`], [`runtime`] - Plumbing

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod arr;
pub mod blocklist;
pub mod clients;
pub mod config;
pub mod download_cleaner;
pub mod dry_run;
pub mod hardlinks;
pub mod http;
pub mod notifications;
pub mod pipeline;
pub mod queue_cleaner;
pub mod runtime;
pub mod strikes;

// Re-export commonly used types
pub use arr::{ArrClient, ArrError, ArrType, QueueRecord, SearchCommand};
pub use blocklist::{BlocklistProvider, BlocklistSet, BlocklistType};
pub use clients::{
    ClientError, ClientRegistry, DeleteReason, DownloadClientApi, DownloadItem, DownloadService,
};
pub use config::{AppConfig, ConfigError, ConfigProvider, SharedConfig, load_config};
pub use download_cleaner::{DownloadCleaner, DownloadCleanerReport};
pub use dry_run::DryRun;
pub use hardlinks::HardlinkInspector;
pub use queue_cleaner::{QueueCleaner, QueueCleanerReport};
pub use runtime::{Runtime, RuntimeOptions};
pub use strikes::{StrikeStore, StrikeType};
