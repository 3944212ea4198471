//! Transmission RPC adapter.
//!
//! Requests are POSTed to `{host}/{url_base}/rpc` (`url_base` defaults to
//! `transmission`). The daemon answers 409 with a fresh
//! `X-Transmission-Session-Id` header until that id is echoed back; the id is
//! cached and the request replayed once.
//!
//! Transmission has no categories: the last segment of the download directory
//! plays that role and "setting a category" moves the data to a sibling
//! directory.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::sync::RwLock;
use tracing::{debug, instrument};
use url::Url;

use super::{ClientError, DownloadClientApi, DownloadFile, DownloadItem, ItemState};
use crate::config::{DownloadClientConfig, DownloadClientKind};
use crate::http::{self, HttpSettings, RetryPolicy};

const SESSION_HEADER: &str = "X-Transmission-Session-Id";
const DEFAULT_RPC_BASE: &str = "transmission";

const TORRENT_FIELDS: &[&str] = &[
    "hashString",
    "name",
    "status",
    "isPrivate",
    "totalSize",
    "rateDownload",
    "eta",
    "downloadedEver",
    "uploadRatio",
    "secondsSeeding",
    "downloadDir",
    "labels",
    "files",
    "fileStats",
    "metadataPercentComplete",
];

#[derive(Debug, Deserialize)]
struct RpcResponse {
    result: String,
    #[serde(default)]
    arguments: Value,
}

#[derive(Debug, Default, Deserialize)]
struct TorrentList {
    #[serde(default)]
    torrents: Vec<Torrent>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct Torrent {
    hash_string: String,
    name: String,
    status: i64,
    is_private: bool,
    total_size: u64,
    rate_download: u64,
    eta: i64,
    downloaded_ever: u64,
    upload_ratio: f64,
    seconds_seeding: u64,
    download_dir: String,
    labels: Vec<String>,
    files: Vec<TorrentFile>,
    file_stats: Vec<FileStat>,
    metadata_percent_complete: f64,
}

impl Default for Torrent {
    fn default() -> Self {
        Self {
            hash_string: String::new(),
            name: String::new(),
            status: 0,
            is_private: false,
            total_size: 0,
            rate_download: 0,
            eta: -1,
            downloaded_ever: 0,
            upload_ratio: 0.0,
            seconds_seeding: 0,
            download_dir: String::new(),
            labels: Vec::new(),
            files: Vec::new(),
            file_stats: Vec::new(),
            metadata_percent_complete: 1.0,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct TorrentFile {
    name: String,
    length: u64,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct FileStat {
    wanted: bool,
}

impl Default for FileStat {
    fn default() -> Self {
        Self { wanted: true }
    }
}

/// Adapter for one Transmission daemon.
#[derive(Debug)]
pub struct TransmissionClient {
    id: String,
    url: Url,
    username: Option<String>,
    password: Option<String>,
    http: Client,
    retry: RetryPolicy,
    session_id: RwLock<Option<String>>,
}

impl TransmissionClient {
    /// # Errors
    ///
    /// Invalid host URL or HTTP client construction failure.
    pub fn new(config: &DownloadClientConfig, settings: &HttpSettings) -> Result<Self, ClientError> {
        let host = config.host.as_deref().unwrap_or_default();
        let rpc_base = config
            .url_base
            .as_deref()
            .filter(|base| !base.trim_matches('/').is_empty())
            .unwrap_or(DEFAULT_RPC_BASE);
        let url = http::base_url(host, Some(rpc_base))
            .and_then(|base| http::endpoint(&base, "rpc"))
            .map_err(|e| ClientError::http(&config.id, e))?;
        let http =
            http::build_client(settings, false).map_err(|e| ClientError::http(&config.id, e))?;

        Ok(Self {
            id: config.id.clone(),
            url,
            username: config.username.clone(),
            password: config.password.clone(),
            http,
            retry: settings.retry.clone(),
            session_id: RwLock::new(None),
        })
    }

    /// Sends one RPC call and returns its `arguments`.
    async fn call(&self, method: &str, arguments: Value) -> Result<Value, ClientError> {
        let body = json!({ "method": method, "arguments": arguments });

        // One handshake, then the real attempt.
        for _ in 0..2 {
            let session = self.session_id.read().await.clone();
            let response =
                http::send_with_retry(&self.retry, self.url.as_str(), &[StatusCode::CONFLICT], || {
                    let mut request = self.http.post(self.url.clone()).json(&body);
                    if let Some(session) = &session {
                        request = request.header(SESSION_HEADER, session);
                    }
                    if let Some(username) = &self.username {
                        request = request.basic_auth(username, self.password.as_deref());
                    }
                    request
                })
                .await
                .map_err(|e| ClientError::http(&self.id, e))?;

            if response.status() == StatusCode::CONFLICT {
                let Some(fresh) = response
                    .headers()
                    .get(SESSION_HEADER)
                    .and_then(|value| value.to_str().ok())
                else {
                    return Err(ClientError::protocol(
                        &self.id,
                        "409 without a session id header",
                    ));
                };
                debug!(client = %self.id, "session id refreshed");
                *self.session_id.write().await = Some(fresh.to_string());
                continue;
            }

            let response: RpcResponse = http::read_json(self.url.as_str(), response)
                .await
                .map_err(|e| ClientError::http(&self.id, e))?;
            if response.result != "success" {
                return Err(ClientError::protocol(
                    &self.id,
                    format!("{method}: {}", response.result),
                ));
            }
            return Ok(response.arguments);
        }

        Err(ClientError::protocol(
            &self.id,
            "session id handshake did not settle",
        ))
    }

    async fn torrents(&self, ids: Option<&str>, fields: &[&str]) -> Result<Vec<Torrent>, ClientError> {
        let arguments = match ids {
            Some(hash) => json!({ "ids": [hash], "fields": fields }),
            None => json!({ "fields": fields }),
        };
        let list: TorrentList = serde_json::from_value(self.call("torrent-get", arguments).await?)
            .map_err(|e| ClientError::protocol(&self.id, format!("torrent-get: {e}")))?;
        Ok(list.torrents)
    }
}

#[async_trait]
impl DownloadClientApi for TransmissionClient {
    fn kind(&self) -> DownloadClientKind {
        DownloadClientKind::Transmission
    }

    #[instrument(skip(self), fields(client = %self.id))]
    async fn login(&self) -> Result<(), ClientError> {
        self.call("session-get", json!({ "fields": ["version"] }))
            .await
            .map_err(|e| {
                if e.is_auth() {
                    ClientError::auth(&self.id, "credentials rejected")
                } else {
                    e
                }
            })?;
        debug!(client = %self.id, "session established");
        Ok(())
    }

    async fn find_item(&self, hash: &str) -> Result<Option<DownloadItem>, ClientError> {
        let torrents = self.torrents(Some(hash), TORRENT_FIELDS).await?;
        Ok(torrents
            .into_iter()
            .find(|torrent| torrent.hash_string.eq_ignore_ascii_case(hash))
            .map(into_item))
    }

    async fn list_seeding_items(&self) -> Result<Vec<DownloadItem>, ClientError> {
        let torrents = self.torrents(None, TORRENT_FIELDS).await?;
        Ok(torrents
            .into_iter()
            .map(into_item)
            .filter(|item| item.state == ItemState::Seeding)
            .collect())
    }

    async fn load_files(&self, item: &DownloadItem) -> Result<Vec<DownloadFile>, ClientError> {
        let torrents = self
            .torrents(Some(&item.hash), &["hashString", "files", "fileStats"])
            .await?;
        Ok(torrents
            .into_iter()
            .next()
            .map(|torrent| files(torrent.files, &torrent.file_stats))
            .unwrap_or_default())
    }

    async fn set_unwanted_files(
        &self,
        item: &DownloadItem,
        indexes: &[usize],
    ) -> Result<(), ClientError> {
        self.call(
            "torrent-set",
            json!({ "ids": [item.hash], "files-unwanted": indexes }),
        )
        .await?;
        Ok(())
    }

    async fn delete_item(&self, hash: &str) -> Result<(), ClientError> {
        self.call(
            "torrent-remove",
            json!({ "ids": [hash], "delete-local-data": true }),
        )
        .await?;
        Ok(())
    }

    /// Directories are created by the move itself.
    async fn create_category(&self, _name: &str) -> Result<(), ClientError> {
        Ok(())
    }

    async fn set_category(&self, item: &DownloadItem, category: &str) -> Result<(), ClientError> {
        let location = category_location(&item.save_path, category);
        self.call(
            "torrent-set-location",
            json!({
                "ids": [item.hash],
                "location": location.to_string_lossy(),
                "move": true,
            }),
        )
        .await?;
        Ok(())
    }
}

/// Sibling directory of the current download directory named `category`.
fn category_location(download_dir: &Path, category: &str) -> PathBuf {
    match download_dir.parent() {
        Some(parent) if download_dir.file_name().is_some() => parent.join(category),
        _ => download_dir.join(category),
    }
}

fn map_state(status: i64, metadata_complete: f64) -> ItemState {
    match status {
        0 => ItemState::Paused,
        1 | 2 => ItemState::Checking,
        3 => ItemState::Queued,
        4 if metadata_complete < 1.0 => ItemState::DownloadingMetadata,
        4 => ItemState::Downloading,
        5 | 6 => ItemState::Seeding,
        _ => ItemState::Unknown,
    }
}

fn files(files: Vec<TorrentFile>, stats: &[FileStat]) -> Vec<DownloadFile> {
    files
        .into_iter()
        .enumerate()
        .map(|(index, file)| DownloadFile {
            index,
            name: file.name,
            size: file.length,
            priority: i64::from(stats.get(index).is_none_or(|stat| stat.wanted)),
        })
        .collect()
}

#[allow(clippy::cast_sign_loss)]
fn into_item(torrent: Torrent) -> DownloadItem {
    let save_path = PathBuf::from(&torrent.download_dir);
    let category = save_path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned());

    DownloadItem {
        hash: torrent.hash_string.to_lowercase(),
        state: map_state(torrent.status, torrent.metadata_percent_complete),
        is_private: torrent.is_private,
        size: torrent.total_size,
        download_speed: torrent.rate_download,
        eta: torrent.eta.max(0) as u64,
        downloaded: torrent.downloaded_ever,
        ratio: torrent.upload_ratio.max(0.0),
        seeding_time: Duration::from_secs(torrent.seconds_seeding),
        category,
        tags: torrent.labels,
        save_path,
        files: files(torrent.files, &torrent.file_stats),
        name: torrent.name,
    }
}
