//! Shared HTTP plumbing for download-client adapters and the Arr client.
//!
//! Both sides of the engine talk JSON over HTTP with slightly different
//! session models (cookie, session header, API key). What they share lives
//! here: client construction with a bounded timeout, a retrying send loop,
//! URL joining and form encoding.

mod retry;

use std::time::Duration;

use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::warn;
use url::Url;

pub use retry::{
    DEFAULT_MAX_ATTEMPTS, FailureType, RetryDecision, RetryPolicy, classify_error,
    classify_status,
};

/// Default per-request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(100);

/// Error bodies longer than this are cut before they land in an error message.
const MAX_ERROR_BODY: usize = 512;

/// Transport-level errors, before any protocol interpretation.
#[derive(Debug, Error)]
pub enum HttpError {
    #[error("network error calling {url}: {source}")]
    Network {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("timeout calling {url}")]
    Timeout { url: String },

    #[error("HTTP {status} from {url}")]
    Status {
        url: String,
        status: u16,
        /// Response body, truncated.
        body: String,
    },

    #[error("invalid response from {url}: {message}")]
    Decode { url: String, message: String },

    #[error("invalid URL: {url}")]
    InvalidUrl { url: String },

    #[error("failed to build HTTP client: {source}")]
    Build {
        #[source]
        source: reqwest::Error,
    },
}

impl HttpError {
    pub fn network(url: impl Into<String>, source: reqwest::Error) -> Self {
        Self::Network {
            url: url.into(),
            source,
        }
    }

    pub fn timeout(url: impl Into<String>) -> Self {
        Self::Timeout { url: url.into() }
    }

    pub fn status(url: impl Into<String>, status: u16, body: impl Into<String>) -> Self {
        let mut body = body.into();
        if body.len() > MAX_ERROR_BODY {
            let mut cut = MAX_ERROR_BODY;
            while !body.is_char_boundary(cut) {
                cut -= 1;
            }
            body.truncate(cut);
        }
        Self::Status {
            url: url.into(),
            status,
            body,
        }
    }

    pub fn decode(url: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Decode {
            url: url.into(),
            message: message.into(),
        }
    }

    pub fn invalid_url(url: impl Into<String>) -> Self {
        Self::InvalidUrl { url: url.into() }
    }

    /// HTTP status when the remote answered with a non-success code.
    #[must_use]
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// True for 401/403 answers.
    #[must_use]
    pub fn is_auth(&self) -> bool {
        classify_error(self) == FailureType::NeedsAuth
    }
}

/// Timeout and retry settings applied to every outbound call.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpSettings {
    pub timeout: Duration,
    pub retry: RetryPolicy,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            retry: RetryPolicy::default(),
        }
    }
}

impl HttpSettings {
    #[must_use]
    pub fn new(timeout: Duration, retry: RetryPolicy) -> Self {
        Self { timeout, retry }
    }
}

/// Builds a client bounded by `settings.timeout`.
///
/// `cookie_store` is enabled for protocols whose session lives in a cookie
/// (qBittorrent SID, Deluge `_session_id`).
///
/// # Errors
///
/// Returns [`HttpError::Build`] if the TLS backend cannot be initialized.
pub fn build_client(settings: &HttpSettings, cookie_store: bool) -> Result<Client, HttpError> {
    Client::builder()
        .user_agent(concat!("cleanarr/", env!("CARGO_PKG_VERSION")))
        .timeout(settings.timeout)
        .connect_timeout(settings.timeout.min(Duration::from_secs(30)))
        .cookie_store(cookie_store)
        .build()
        .map_err(|source| HttpError::Build { source })
}

/// Sends the request produced by `request`, retrying per `policy`.
///
/// The closure is called once per attempt because a `RequestBuilder` cannot
/// be replayed. Statuses listed in `passthrough` are handed back as `Ok` so
/// the caller can inspect them (Transmission's 409 handshake).
///
/// # Errors
///
/// The last classified [`HttpError`] once the policy stops retrying.
pub async fn send_with_retry<F>(
    policy: &RetryPolicy,
    url: &str,
    passthrough: &[StatusCode],
    mut request: F,
) -> Result<Response, HttpError>
where
    F: FnMut() -> RequestBuilder,
{
    let mut attempt = 1;
    loop {
        let error = match request().send().await {
            Ok(response)
                if response.status().is_success()
                    || passthrough.contains(&response.status()) =>
            {
                return Ok(response);
            }
            Ok(response) => {
                let status = response.status().as_u16();
                let body = response.text().await.unwrap_or_default();
                HttpError::status(url, status, body)
            }
            Err(source) if source.is_timeout() => HttpError::timeout(url),
            Err(source) => HttpError::network(url, source),
        };

        match policy.should_retry(classify_error(&error), attempt) {
            RetryDecision::Retry {
                delay,
                attempt: next,
            } => {
                warn!(url, error = %error, delay_ms = delay.as_millis(), "request failed, retrying");
                tokio::time::sleep(delay).await;
                attempt = next;
            }
            RetryDecision::DoNotRetry { .. } => return Err(error),
        }
    }
}

/// Reads a response body and decodes it as JSON.
///
/// # Errors
///
/// [`HttpError::Network`] if the body cannot be read, [`HttpError::Decode`]
/// if it is not the expected shape.
pub async fn read_json<T: DeserializeOwned>(url: &str, response: Response) -> Result<T, HttpError> {
    let body = response
        .text()
        .await
        .map_err(|source| HttpError::network(url, source))?;
    serde_json::from_str(&body).map_err(|e| HttpError::decode(url, e.to_string()))
}

/// Encodes `pairs` as an `application/x-www-form-urlencoded` body.
#[must_use]
pub fn form_body(pairs: &[(&str, &str)]) -> String {
    url::form_urlencoded::Serializer::new(String::new())
        .extend_pairs(pairs)
        .finish()
}

/// Parses `host` and appends the optional `url_base` path.
///
/// # Errors
///
/// [`HttpError::InvalidUrl`] when `host` is not an absolute http(s) URL.
pub fn base_url(host: &str, url_base: Option<&str>) -> Result<Url, HttpError> {
    let parsed = Url::parse(host.trim()).map_err(|_| HttpError::invalid_url(host))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(HttpError::invalid_url(host));
    }
    match url_base {
        Some(extra) if !extra.trim_matches('/').is_empty() => endpoint(&parsed, extra),
        _ => Ok(parsed),
    }
}

/// Joins `path` (slash-separated, leading slash optional) onto `base`.
///
/// # Errors
///
/// [`HttpError::InvalidUrl`] for URLs that cannot carry a path.
pub fn endpoint(base: &Url, path: &str) -> Result<Url, HttpError> {
    let mut url = base.clone();
    {
        let mut segments = url
            .path_segments_mut()
            .map_err(|()| HttpError::invalid_url(base.as_str()))?;
        segments.pop_if_empty();
        segments.extend(path.split('/').filter(|s| !s.is_empty()));
    }
    Ok(url)
}
