//! Download client adapters and the policy layer on top of them.
//!
//! # Overview
//!
//! - [`DownloadClientApi`] - protocol seam, one implementation per family
//!   ([`QBittorrentClient`], [`DelugeClient`], [`TransmissionClient`],
//!   [`UsenetClient`])
//! - [`DownloadService`] - queue-item checks, seeding limits and unlinked
//!   reclassification, shared by every family
//! - [`ClientRegistry`] - builds services from configuration
//!
//! # Example
//!
//! ```no_run
//! # async fn example(config: cleanarr_core::config::AppConfig) {
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use cleanarr_core::clients::ClientRegistry;
//! use cleanarr_core::dry_run::DryRun;
//! use cleanarr_core::hardlinks::HardlinkInspector;
//! use cleanarr_core::strikes::StrikeStore;
//!
//! let registry = ClientRegistry::new(
//!     Arc::new(StrikeStore::new(Duration::from_secs(3600))),
//!     Arc::new(HardlinkInspector::new()),
//!     DryRun::new(true),
//!     None,
//! );
//! registry.sync(&config).await;
//! for service in registry.logged_in().await.ready {
//!     let seeding = service.list_seeding_items().await;
//!     println!("{}: {:?}", service.name(), seeding.map(|items| items.len()));
//! }
//! # }
//! ```

mod api;
mod deluge;
mod error;
mod model;
mod qbittorrent;
mod registry;
mod seeding;
mod service;
mod transmission;
mod usenet;

pub use api::DownloadClientApi;
pub use deluge::DelugeClient;
pub use error::ClientError;
pub use model::{
    CleanReason, DeleteReason, DownloadFile, DownloadItem, IgnoredDownloads, ItemState,
    QueueItemVerdict,
};
pub use qbittorrent::QBittorrentClient;
pub use registry::{ClientRegistry, LoginOutcome, build_client_api, login_all};
pub use seeding::evaluate_seeding;
pub use service::{DownloadService, QueuePolicy};
pub use transmission::TransmissionClient;
pub use usenet::UsenetClient;
