//! qBittorrent WebUI API v2 adapter.
//!
//! The session is the `SID` cookie set by `auth/login`, kept by the client's
//! cookie store. Any call answered with 403 triggers one re-login and a single
//! replay.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{CONTENT_TYPE, REFERER};
use reqwest::{Client, Method, Response};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info, instrument};
use url::Url;

use super::{ClientError, DownloadClientApi, DownloadFile, DownloadItem, ItemState};
use crate::config::{DownloadClientConfig, DownloadClientKind};
use crate::http::{self, HttpSettings, RetryPolicy};

const API_PREFIX: &str = "api/v2";
const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

/// ETA qBittorrent reports when it has no estimate (100 days).
const INFINITE_ETA: i64 = 8_640_000;

#[derive(Debug, Deserialize)]
struct TorrentInfo {
    hash: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    state: String,
    #[serde(default)]
    size: u64,
    #[serde(default)]
    dlspeed: i64,
    #[serde(default)]
    eta: i64,
    #[serde(default)]
    downloaded: u64,
    #[serde(default)]
    ratio: f64,
    #[serde(default)]
    seeding_time: i64,
    #[serde(default)]
    category: String,
    #[serde(default)]
    tags: String,
    #[serde(default)]
    save_path: String,
    /// Only present on qBittorrent 5+.
    #[serde(default)]
    private: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
struct TorrentProperties {
    #[serde(default)]
    is_private: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct TorrentFileEntry {
    #[serde(default)]
    index: Option<usize>,
    name: String,
    #[serde(default)]
    size: u64,
    #[serde(default)]
    priority: i64,
}

/// Adapter for one qBittorrent instance.
#[derive(Debug)]
pub struct QBittorrentClient {
    id: String,
    base: Url,
    username: Option<String>,
    password: Option<String>,
    http: Client,
    retry: RetryPolicy,
}

impl QBittorrentClient {
    /// # Errors
    ///
    /// Invalid host URL or HTTP client construction failure.
    pub fn new(config: &DownloadClientConfig, settings: &HttpSettings) -> Result<Self, ClientError> {
        let host = config.host.as_deref().unwrap_or_default();
        let base = http::base_url(host, config.url_base.as_deref())
            .map_err(|e| ClientError::http(&config.id, e))?;
        let http = http::build_client(settings, true).map_err(|e| ClientError::http(&config.id, e))?;

        Ok(Self {
            id: config.id.clone(),
            base,
            username: config.username.clone(),
            password: config.password.clone(),
            http,
            retry: settings.retry.clone(),
        })
    }

    async fn authenticate(&self) -> Result<(), ClientError> {
        let (Some(username), Some(password)) = (&self.username, &self.password) else {
            debug!(client = %self.id, "no credentials configured, relying on WebUI whitelist");
            return Ok(());
        };

        let response = self
            .send_once(
                Method::POST,
                "auth/login",
                &[("username", username), ("password", password)],
            )
            .await
            .map_err(|e| {
                if e.is_auth() {
                    ClientError::auth(&self.id, "login rejected (IP banned?)")
                } else {
                    e
                }
            })?;

        let body = response.text().await.unwrap_or_default();
        match body.trim() {
            "Ok." => {
                debug!(client = %self.id, "logged in");
                Ok(())
            }
            "Fails." => Err(ClientError::auth(&self.id, "invalid username or password")),
            other => Err(ClientError::auth(
                &self.id,
                format!("unexpected login response `{other}`"),
            )),
        }
    }

    async fn send_once(
        &self,
        method: Method,
        path: &str,
        params: &[(&str, &str)],
    ) -> Result<Response, ClientError> {
        let mut url = http::endpoint(&self.base, &format!("{API_PREFIX}/{path}"))
            .map_err(|e| ClientError::http(&self.id, e))?;

        let body = if method == Method::GET {
            if !params.is_empty() {
                url.query_pairs_mut().extend_pairs(params);
            }
            None
        } else {
            Some(http::form_body(params))
        };

        http::send_with_retry(&self.retry, url.as_str(), &[], || {
            let request = self
                .http
                .request(method.clone(), url.clone())
                .header(REFERER, self.base.as_str());
            match &body {
                Some(body) => request.header(CONTENT_TYPE, FORM_CONTENT_TYPE).body(body.clone()),
                None => request,
            }
        })
        .await
        .map_err(|e| ClientError::http(&self.id, e))
    }

    /// Sends a request, logging in again once if the session was rejected.
    async fn send(
        &self,
        method: Method,
        path: &str,
        params: &[(&str, &str)],
    ) -> Result<Response, ClientError> {
        match self.send_once(method.clone(), path, params).await {
            Err(error) if error.is_auth() => {
                debug!(client = %self.id, path, "session rejected, logging in again");
                self.authenticate().await?;
                self.send_once(method, path, params).await
            }
            other => other,
        }
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        params: &[(&str, &str)],
    ) -> Result<T, ClientError> {
        let response = self.send(Method::GET, path, params).await?;
        let url = response.url().to_string();
        http::read_json(&url, response)
            .await
            .map_err(|e| ClientError::http(&self.id, e))
    }

    async fn post(&self, path: &str, params: &[(&str, &str)]) -> Result<(), ClientError> {
        self.send(Method::POST, path, params).await.map(|_| ())
    }

    async fn files(&self, hash: &str) -> Result<Vec<DownloadFile>, ClientError> {
        let entries: Vec<TorrentFileEntry> = self.get_json("torrents/files", &[("hash", hash)]).await?;
        Ok(entries
            .into_iter()
            .enumerate()
            .map(|(position, entry)| DownloadFile {
                index: entry.index.unwrap_or(position),
                name: entry.name,
                size: entry.size,
                priority: entry.priority,
            })
            .collect())
    }

    async fn is_private(&self, info: &TorrentInfo) -> Result<bool, ClientError> {
        if let Some(private) = info.private {
            return Ok(private);
        }
        let properties: TorrentProperties = self
            .get_json("torrents/properties", &[("hash", &info.hash)])
            .await?;
        Ok(properties.is_private.unwrap_or(false))
    }
}

#[async_trait]
impl DownloadClientApi for QBittorrentClient {
    fn kind(&self) -> DownloadClientKind {
        DownloadClientKind::Qbittorrent
    }

    #[instrument(skip(self), fields(client = %self.id))]
    async fn login(&self) -> Result<(), ClientError> {
        self.authenticate().await
    }

    async fn find_item(&self, hash: &str) -> Result<Option<DownloadItem>, ClientError> {
        let torrents: Vec<TorrentInfo> = self.get_json("torrents/info", &[("hashes", hash)]).await?;
        let Some(info) = torrents
            .into_iter()
            .find(|torrent| torrent.hash.eq_ignore_ascii_case(hash))
        else {
            return Ok(None);
        };

        let is_private = self.is_private(&info).await?;
        let files = self.files(&info.hash).await?;
        Ok(Some(into_item(info, is_private, files)))
    }

    async fn list_seeding_items(&self) -> Result<Vec<DownloadItem>, ClientError> {
        let torrents: Vec<TorrentInfo> = self
            .get_json("torrents/info", &[("filter", "completed")])
            .await?;

        let mut items = Vec::new();
        for info in torrents {
            if map_state(&info.state) != ItemState::Seeding {
                continue;
            }
            let is_private = self.is_private(&info).await?;
            items.push(into_item(info, is_private, Vec::new()));
        }
        Ok(items)
    }

    async fn load_files(&self, item: &DownloadItem) -> Result<Vec<DownloadFile>, ClientError> {
        self.files(&item.hash).await
    }

    async fn set_unwanted_files(
        &self,
        item: &DownloadItem,
        indexes: &[usize],
    ) -> Result<(), ClientError> {
        let ids = indexes
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("|");
        self.post(
            "torrents/filePrio",
            &[("hash", &item.hash), ("id", &ids), ("priority", "0")],
        )
        .await
    }

    async fn delete_item(&self, hash: &str) -> Result<(), ClientError> {
        self.post("torrents/delete", &[("hashes", hash), ("deleteFiles", "true")])
            .await
    }

    async fn create_category(&self, name: &str) -> Result<(), ClientError> {
        let existing: HashMap<String, serde_json::Value> =
            self.get_json("torrents/categories", &[]).await?;
        if existing.contains_key(name) {
            return Ok(());
        }
        self.post("torrents/createCategory", &[("category", name), ("savePath", "")])
            .await?;
        info!(client = %self.id, category = name, "category created");
        Ok(())
    }

    async fn set_category(&self, item: &DownloadItem, category: &str) -> Result<(), ClientError> {
        self.post(
            "torrents/setCategory",
            &[("hashes", &item.hash), ("category", category)],
        )
        .await
    }

    fn supports_tags(&self) -> bool {
        true
    }

    async fn add_tag(&self, item: &DownloadItem, tag: &str) -> Result<(), ClientError> {
        self.post("torrents/addTags", &[("hashes", &item.hash), ("tags", tag)])
            .await
    }
}

fn map_state(state: &str) -> ItemState {
    match state {
        "downloading" | "stalledDL" | "forcedDL" => ItemState::Downloading,
        "metaDL" | "forcedMetaDL" => ItemState::DownloadingMetadata,
        "uploading" | "stalledUP" | "forcedUP" | "queuedUP" | "pausedUP" | "stoppedUP" => {
            ItemState::Seeding
        }
        "pausedDL" | "stoppedDL" => ItemState::Paused,
        "queuedDL" | "allocating" => ItemState::Queued,
        "checkingDL" | "checkingUP" | "checkingResumeData" | "moving" => ItemState::Checking,
        "error" | "missingFiles" => ItemState::Error,
        _ => ItemState::Unknown,
    }
}

#[allow(clippy::cast_sign_loss)]
fn normalize_eta(eta: i64) -> u64 {
    if eta <= 0 || eta >= INFINITE_ETA {
        0
    } else {
        eta as u64
    }
}

#[allow(clippy::cast_sign_loss)]
fn into_item(info: TorrentInfo, is_private: bool, files: Vec<DownloadFile>) -> DownloadItem {
    DownloadItem {
        hash: info.hash.to_lowercase(),
        state: map_state(&info.state),
        is_private,
        size: info.size,
        download_speed: info.dlspeed.max(0) as u64,
        eta: normalize_eta(info.eta),
        downloaded: info.downloaded,
        ratio: info.ratio,
        seeding_time: Duration::from_secs(info.seeding_time.max(0) as u64),
        category: Some(info.category).filter(|c| !c.is_empty()),
        tags: info
            .tags
            .split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(String::from)
            .collect(),
        save_path: PathBuf::from(info.save_path),
        name: info.name,
        files,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_state_mapping() {
        assert_eq!(map_state("stalledDL"), ItemState::Downloading);
        assert_eq!(map_state("metaDL"), ItemState::DownloadingMetadata);
        assert_eq!(map_state("stoppedUP"), ItemState::Seeding);
        assert_eq!(map_state("pausedDL"), ItemState::Paused);
        assert_eq!(map_state("something new"), ItemState::Unknown);
    }

    #[test]
    fn test_infinite_eta_is_unknown() {
        assert_eq!(normalize_eta(INFINITE_ETA), 0);
        assert_eq!(normalize_eta(-1), 0);
        assert_eq!(normalize_eta(120), 120);
    }

    #[test]
    fn test_into_item_normalizes_fields() {
        let info: TorrentInfo = serde_json::from_value(serde_json::json!({
            "hash": "ABCDEF",
            "name": "Show.S01",
            "state": "uploading",
            "category": "",
            "tags": "one, two,",
            "seeding_time": 7200,
            "save_path": "/downloads",
            "dlspeed": -5
        }))
        .unwrap();

        let item = into_item(info, true, vec![]);
        assert_eq!(item.hash, "abcdef");
        assert_eq!(item.state, ItemState::Seeding);
        assert_eq!(item.category, None);
        assert_eq!(item.tags, vec!["one".to_string(), "two".to_string()]);
        assert_eq!(item.seeding_time, Duration::from_secs(7200));
        assert_eq!(item.download_speed, 0);
        assert!(item.is_private);
    }
}
