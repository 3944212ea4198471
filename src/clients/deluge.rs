//! Deluge Web UI JSON-RPC adapter.
//!
//! Every call is a POST to `{host}/json` carrying `{method, params, id}`.
//! The web UI is only a proxy: after `auth.login` it must also be connected
//! to a daemon, and a web UI with no daemon hosts configured is unusable.
//! Categories map onto the Label plugin, whose labels are always lowercase.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, info, instrument};
use url::Url;

use super::{ClientError, DownloadClientApi, DownloadFile, DownloadItem, ItemState};
use crate::config::{DownloadClientConfig, DownloadClientKind};
use crate::http::{self, HttpSettings, RetryPolicy};

/// RPC error code for a missing or expired session.
const NOT_AUTHENTICATED: i64 = 1;

const STATUS_FIELDS: &[&str] = &[
    "hash",
    "name",
    "state",
    "private",
    "total_size",
    "download_payload_rate",
    "eta",
    "total_done",
    "ratio",
    "seeding_time",
    "label",
    "save_path",
];

#[derive(Debug, Serialize)]
struct RpcRequest<'a> {
    method: &'a str,
    params: &'a Value,
    id: u64,
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Value,
    #[serde(default)]
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    #[serde(default)]
    message: String,
    #[serde(default)]
    code: i64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct TorrentStatus {
    hash: String,
    name: String,
    state: String,
    private: bool,
    total_size: u64,
    download_payload_rate: f64,
    eta: f64,
    total_done: u64,
    ratio: f64,
    seeding_time: f64,
    label: Option<String>,
    save_path: String,
}

/// Adapter for one Deluge web UI.
#[derive(Debug)]
pub struct DelugeClient {
    id: String,
    url: Url,
    password: String,
    http: Client,
    retry: RetryPolicy,
    next_id: AtomicU64,
}

impl DelugeClient {
    /// # Errors
    ///
    /// Invalid host URL or HTTP client construction failure.
    pub fn new(config: &DownloadClientConfig, settings: &HttpSettings) -> Result<Self, ClientError> {
        let host = config.host.as_deref().unwrap_or_default();
        let url = http::base_url(host, config.url_base.as_deref())
            .and_then(|base| http::endpoint(&base, "json"))
            .map_err(|e| ClientError::http(&config.id, e))?;
        let http = http::build_client(settings, true).map_err(|e| ClientError::http(&config.id, e))?;

        Ok(Self {
            id: config.id.clone(),
            url,
            password: config.password.clone().unwrap_or_default(),
            http,
            retry: settings.retry.clone(),
            next_id: AtomicU64::new(1),
        })
    }

    /// One round trip. The outer error is transport, the inner one is the
    /// RPC error object.
    async fn call_once(
        &self,
        method: &str,
        params: &Value,
    ) -> Result<Result<Value, RpcError>, ClientError> {
        let body = RpcRequest {
            method,
            params,
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
        };

        let response = http::send_with_retry(&self.retry, self.url.as_str(), &[], || {
            self.http.post(self.url.clone()).json(&body)
        })
        .await
        .map_err(|e| ClientError::http(&self.id, e))?;
        let response: RpcResponse = http::read_json(self.url.as_str(), response)
            .await
            .map_err(|e| ClientError::http(&self.id, e))?;

        Ok(match response.error {
            Some(error) => Err(error),
            None => Ok(response.result),
        })
    }

    fn rpc_error(&self, method: &str, error: &RpcError) -> ClientError {
        ClientError::protocol(
            &self.id,
            format!("{method} failed (code {}): {}", error.code, error.message),
        )
    }

    fn decode<T: DeserializeOwned>(&self, method: &str, value: Value) -> Result<T, ClientError> {
        serde_json::from_value(value)
            .map_err(|e| ClientError::protocol(&self.id, format!("{method}: {e}")))
    }

    /// Calls `method`, logging in again once if the session was lost.
    async fn call<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T, ClientError> {
        let value = match self.call_once(method, &params).await? {
            Ok(value) => value,
            Err(error) if error.code == NOT_AUTHENTICATED => {
                debug!(client = %self.id, method, "session lost, logging in again");
                self.authenticate().await?;
                self.call_once(method, &params)
                    .await?
                    .map_err(|error| self.rpc_error(method, &error))?
            }
            Err(error) => return Err(self.rpc_error(method, &error)),
        };
        self.decode(method, value)
    }

    /// Like [`DelugeClient::call`] without the re-login, for the login
    /// sequence itself.
    async fn call_direct<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Value,
    ) -> Result<T, ClientError> {
        let value = self
            .call_once(method, &params)
            .await?
            .map_err(|error| self.rpc_error(method, &error))?;
        self.decode(method, value)
    }

    async fn authenticate(&self) -> Result<(), ClientError> {
        let accepted: bool = self
            .call_direct("auth.login", json!([self.password]))
            .await?;
        if !accepted {
            return Err(ClientError::auth(&self.id, "password rejected"));
        }

        let connected: bool = self.call_direct("web.connected", json!([])).await?;
        if connected {
            debug!(client = %self.id, "logged in");
            return Ok(());
        }

        // Each host is [id, address, port, status].
        let hosts: Vec<Vec<Value>> = self.call_direct("web.get_hosts", json!([])).await?;
        let Some(host_id) = hosts
            .first()
            .and_then(|host| host.first())
            .and_then(Value::as_str)
            .map(String::from)
        else {
            return Err(ClientError::fatal(
                &self.id,
                "Deluge web UI has no daemon hosts configured",
            ));
        };

        let _: Value = self.call_direct("web.connect", json!([host_id])).await?;
        let connected: bool = self.call_direct("web.connected", json!([])).await?;
        if !connected {
            return Err(ClientError::fatal(
                &self.id,
                format!("Deluge web UI could not connect to daemon {host_id}"),
            ));
        }

        info!(client = %self.id, host = %host_id, "connected web UI to daemon");
        Ok(())
    }

    async fn files(&self, hash: &str) -> Result<Vec<DownloadFile>, ClientError> {
        let tree: Value = self.call("web.get_torrent_files", json!([hash])).await?;
        let mut files = Vec::new();
        collect_files(&tree, &mut files);
        files.sort_by_key(|file| file.index);
        Ok(files)
    }
}

#[async_trait]
impl DownloadClientApi for DelugeClient {
    fn kind(&self) -> DownloadClientKind {
        DownloadClientKind::Deluge
    }

    #[instrument(skip(self), fields(client = %self.id))]
    async fn login(&self) -> Result<(), ClientError> {
        self.authenticate().await
    }

    async fn find_item(&self, hash: &str) -> Result<Option<DownloadItem>, ClientError> {
        let status: Value = self
            .call("core.get_torrent_status", json!([hash, STATUS_FIELDS]))
            .await?;
        // Unknown hashes come back as an empty object.
        if status.as_object().is_none_or(serde_json::Map::is_empty) {
            return Ok(None);
        }

        let status: TorrentStatus = self.decode("core.get_torrent_status", status)?;
        let files = self.files(hash).await?;
        Ok(Some(into_item(hash, status, files)))
    }

    async fn list_seeding_items(&self) -> Result<Vec<DownloadItem>, ClientError> {
        let torrents: HashMap<String, TorrentStatus> = self
            .call(
                "core.get_torrents_status",
                json!([{ "state": "Seeding" }, STATUS_FIELDS]),
            )
            .await?;

        Ok(torrents
            .into_iter()
            .map(|(hash, status)| into_item(&hash, status, Vec::new()))
            .collect())
    }

    async fn load_files(&self, item: &DownloadItem) -> Result<Vec<DownloadFile>, ClientError> {
        self.files(&item.hash).await
    }

    async fn set_unwanted_files(
        &self,
        item: &DownloadItem,
        indexes: &[usize],
    ) -> Result<(), ClientError> {
        let files = if item.files.is_empty() {
            self.files(&item.hash).await?
        } else {
            item.files.clone()
        };

        // Deluge takes the full priority vector, indexed by file index.
        let len = files.iter().map(|f| f.index + 1).max().unwrap_or(0);
        let mut priorities = vec![1_i64; len];
        for file in &files {
            priorities[file.index] = if indexes.contains(&file.index) {
                0
            } else {
                file.priority
            };
        }

        let _: Value = self
            .call(
                "core.set_torrent_options",
                json!([[item.hash], { "file_priorities": priorities }]),
            )
            .await?;
        Ok(())
    }

    async fn delete_item(&self, hash: &str) -> Result<(), ClientError> {
        match self
            .call::<Value>("core.remove_torrent", json!([hash, true]))
            .await
        {
            Ok(_) => Ok(()),
            // Removing an unknown torrent raises; treat it as already gone.
            Err(error @ ClientError::Protocol { .. }) => match self.find_item(hash).await? {
                None => Ok(()),
                Some(_) => Err(error),
            },
            Err(error) => Err(error),
        }
    }

    async fn create_category(&self, name: &str) -> Result<(), ClientError> {
        let label = name.to_lowercase();
        let labels: Vec<String> = self.call("label.get_labels", json!([])).await?;
        if labels.iter().any(|existing| *existing == label) {
            return Ok(());
        }
        let _: Value = self.call("label.add", json!([label])).await?;
        info!(client = %self.id, label = %label, "label created");
        Ok(())
    }

    async fn set_category(&self, item: &DownloadItem, category: &str) -> Result<(), ClientError> {
        let _: Value = self
            .call(
                "label.set_torrent",
                json!([item.hash, category.to_lowercase()]),
            )
            .await?;
        Ok(())
    }
}

/// Flattens `web.get_torrent_files` output, a tree of `dir` nodes whose
/// `contents` hold further nodes and `file` leaves.
fn collect_files(node: &Value, files: &mut Vec<DownloadFile>) {
    let Some(contents) = node.get("contents").and_then(Value::as_object) else {
        return;
    };
    for (name, child) in contents {
        if child.get("type").and_then(Value::as_str) == Some("dir") {
            collect_files(child, files);
            continue;
        }
        let Some(index) = child
            .get("index")
            .and_then(Value::as_u64)
            .and_then(|index| usize::try_from(index).ok())
        else {
            continue;
        };
        let path = child
            .get("path")
            .and_then(Value::as_str)
            .unwrap_or(name)
            .to_string();
        files.push(DownloadFile {
            index,
            name: path,
            size: child.get("size").and_then(Value::as_u64).unwrap_or(0),
            priority: child.get("priority").and_then(Value::as_i64).unwrap_or(1),
        });
    }
}

fn map_state(state: &str) -> ItemState {
    match state {
        "Downloading" => ItemState::Downloading,
        "Seeding" => ItemState::Seeding,
        "Paused" => ItemState::Paused,
        "Queued" => ItemState::Queued,
        "Checking" | "Moving" | "Allocating" => ItemState::Checking,
        "Error" => ItemState::Error,
        _ => ItemState::Unknown,
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn non_negative(value: f64) -> u64 {
    if value.is_finite() && value > 0.0 {
        value as u64
    } else {
        0
    }
}

fn into_item(hash: &str, status: TorrentStatus, files: Vec<DownloadFile>) -> DownloadItem {
    let hash = if status.hash.is_empty() {
        hash.to_lowercase()
    } else {
        status.hash.to_lowercase()
    };
    DownloadItem {
        hash,
        state: map_state(&status.state),
        is_private: status.private,
        size: status.total_size,
        download_speed: non_negative(status.download_payload_rate),
        eta: non_negative(status.eta),
        downloaded: status.total_done,
        ratio: status.ratio,
        seeding_time: Duration::from_secs(non_negative(status.seeding_time)),
        category: status.label.filter(|label| !label.is_empty()),
        tags: Vec::new(),
        save_path: PathBuf::from(status.save_path),
        name: status.name,
        files,
    }
}
