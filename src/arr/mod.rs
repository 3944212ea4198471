//! Client for the Sonarr/Radarr/Lidarr queue and command APIs.
//!
//! # Overview
//!
//! Only three endpoints are used:
//!
//! - `GET /api/{v}/queue` - paged read of the download queue
//! - `DELETE /api/{v}/queue/{id}` - remove an entry, blocklisting the release
//! - `POST /api/{v}/command` - trigger a replacement search
//!
//! Sonarr and Radarr speak `v3`, Lidarr `v1`. The two mutating calls go
//! through the shared [`DryRun`] gate.

mod models;

use std::fmt;

use reqwest::header::HeaderValue;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, instrument};
use url::Url;

use crate::config::ArrInstanceConfig;
use crate::dry_run::DryRun;
use crate::http::{self, HttpError, HttpSettings, RetryPolicy};

pub use models::{DownloadProtocol, QueuePage, QueueRecord, SearchCommand, StatusMessage};

/// Records requested per queue page.
pub const QUEUE_PAGE_SIZE: u32 = 200;

const API_KEY_HEADER: &str = "X-Api-Key";

/// The PVR applications this engine manages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArrType {
    Sonarr,
    Radarr,
    Lidarr,
}

impl ArrType {
    pub const ALL: [Self; 3] = [Self::Sonarr, Self::Radarr, Self::Lidarr];

    #[must_use]
    pub fn api_version(self) -> &'static str {
        match self {
            Self::Sonarr | Self::Radarr => "v3",
            Self::Lidarr => "v1",
        }
    }

    fn include_unknown_param(self) -> &'static str {
        match self {
            Self::Sonarr => "includeUnknownSeriesItems",
            Self::Radarr => "includeUnknownMovieItems",
            Self::Lidarr => "includeUnknownArtistItems",
        }
    }
}

impl fmt::Display for ArrType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Sonarr => "sonarr",
            Self::Radarr => "radarr",
            Self::Lidarr => "lidarr",
        })
    }
}

#[derive(Debug, Error)]
pub enum ArrError {
    #[error("{arr} instance {instance}: {source}")]
    Request {
        arr: ArrType,
        instance: String,
        #[source]
        source: HttpError,
    },

    #[error("{arr} instance {instance}: API key is not a valid header value")]
    InvalidApiKey { arr: ArrType, instance: String },
}

/// Client bound to one Arr instance.
#[derive(Debug, Clone)]
pub struct ArrClient {
    arr_type: ArrType,
    name: String,
    base: Url,
    api_key: HeaderValue,
    http: reqwest::Client,
    retry: RetryPolicy,
    dry_run: DryRun,
}

impl ArrClient {
    /// # Errors
    ///
    /// Fails on an unparseable URL, an API key that cannot be sent as a
    /// header, or an HTTP client that cannot be built.
    pub fn new(
        arr_type: ArrType,
        instance: &ArrInstanceConfig,
        settings: &HttpSettings,
        dry_run: DryRun,
    ) -> Result<Self, ArrError> {
        let wrap = |source| ArrError::Request {
            arr: arr_type,
            instance: instance.name.clone(),
            source,
        };
        let base = http::base_url(&instance.url, None).map_err(wrap)?;
        let mut api_key =
            HeaderValue::from_str(instance.api_key.trim()).map_err(|_| ArrError::InvalidApiKey {
                arr: arr_type,
                instance: instance.name.clone(),
            })?;
        api_key.set_sensitive(true);
        let http = http::build_client(settings, false).map_err(wrap)?;

        Ok(Self {
            arr_type,
            name: instance.name.clone(),
            base,
            api_key,
            http,
            retry: settings.retry.clone(),
            dry_run,
        })
    }

    #[must_use]
    pub fn arr_type(&self) -> ArrType {
        self.arr_type
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    fn error(&self, source: HttpError) -> ArrError {
        ArrError::Request {
            arr: self.arr_type,
            instance: self.name.clone(),
            source,
        }
    }

    fn api_url(&self, path: &str) -> Result<Url, ArrError> {
        http::endpoint(
            &self.base,
            &format!("api/{}/{path}", self.arr_type.api_version()),
        )
        .map_err(|e| self.error(e))
    }

    /// Reads the whole queue, page by page.
    ///
    /// # Errors
    ///
    /// Any page failing fails the whole read; partial queues are never
    /// returned.
    #[instrument(skip(self), fields(arr = %self.arr_type, instance = %self.name))]
    pub async fn get_queue(&self) -> Result<Vec<QueueRecord>, ArrError> {
        let mut records = Vec::new();
        let mut page = 1_u32;

        loop {
            let mut url = self.api_url("queue")?;
            url.query_pairs_mut()
                .append_pair("page", &page.to_string())
                .append_pair("pageSize", &QUEUE_PAGE_SIZE.to_string())
                .append_pair(self.arr_type.include_unknown_param(), "true");

            let response = http::send_with_retry(&self.retry, url.as_str(), &[], || {
                self.http
                    .get(url.clone())
                    .header(API_KEY_HEADER, self.api_key.clone())
            })
            .await
            .map_err(|e| self.error(e))?;
            let body: QueuePage = http::read_json(url.as_str(), response)
                .await
                .map_err(|e| self.error(e))?;

            let received = body.records.len();
            records.extend(body.records);
            debug!(page, received, total = body.total_records, "queue page read");

            if received == 0 || records.len() >= body.total_records as usize {
                break;
            }
            page += 1;
        }

        Ok(records)
    }

    /// Removes a queue entry without touching the download client, and
    /// optionally blocklists the release.
    ///
    /// # Errors
    ///
    /// [`ArrError::Request`] when the instance rejects the call.
    #[instrument(skip(self), fields(arr = %self.arr_type, instance = %self.name))]
    pub async fn remove_queue_item(&self, record_id: i64, blocklist: bool) -> Result<(), ArrError> {
        let mut url = self.api_url(&format!("queue/{record_id}"))?;
        url.query_pairs_mut()
            .append_pair("removeFromClient", "false")
            .append_pair("blocklist", if blocklist { "true" } else { "false" });

        self.dry_run
            .intercept("remove queue item", &record_id.to_string(), || async {
                http::send_with_retry(&self.retry, url.as_str(), &[], || {
                    self.http
                        .delete(url.clone())
                        .header(API_KEY_HEADER, self.api_key.clone())
                })
                .await
                .map_err(|e| self.error(e))?;
                info!(record_id, blocklist, "queue item removed");
                Ok(())
            })
            .await
    }

    /// Triggers a search command.
    ///
    /// # Errors
    ///
    /// [`ArrError::Request`] when the instance rejects the command.
    #[instrument(skip(self), fields(arr = %self.arr_type, instance = %self.name))]
    pub async fn search(&self, command: &SearchCommand) -> Result<(), ArrError> {
        let url = self.api_url("command")?;

        self.dry_run
            .intercept("search", &format!("{command:?}"), || async {
                http::send_with_retry(&self.retry, url.as_str(), &[], || {
                    self.http
                        .post(url.clone())
                        .header(API_KEY_HEADER, self.api_key.clone())
                        .json(command)
                })
                .await
                .map_err(|e| self.error(e))?;
                info!(?command, "search triggered");
                Ok(())
            })
            .await
    }
}
