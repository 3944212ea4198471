//! Integration tests for the Transmission adapter against a mock RPC daemon.

use std::path::PathBuf;
use std::time::Duration;

use cleanarr_core::clients::{
    ClientError, DownloadClientApi, DownloadItem, ItemState, TransmissionClient,
};
use cleanarr_core::config::{DownloadClientConfig, DownloadClientKind};
use cleanarr_core::http::{HttpSettings, RetryPolicy};
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

mod support;
use support::socket_guard::start_mock_server_or_skip;

macro_rules! require_mock_server {
    () => {{
        let Some(mock_server) = start_mock_server_or_skip().await else {
            return;
        };
        mock_server
    }};
}

const HASH: &str = "1111222233334444555566667777888899990000";
const SESSION: &str = "session-abc";

fn client(server: &MockServer) -> TransmissionClient {
    let config = DownloadClientConfig {
        id: "transmission".to_string(),
        name: String::new(),
        enabled: true,
        kind: DownloadClientKind::Transmission,
        host: Some(server.uri()),
        username: Some("user".to_string()),
        password: Some("pass".to_string()),
        url_base: None,
    };
    let settings = HttpSettings::new(Duration::from_secs(5), RetryPolicy::no_retry());
    TransmissionClient::new(&config, &settings).unwrap()
}

/// Answers 409 with a session id to anything that does not carry it yet.
async fn mount_handshake(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/transmission/rpc"))
        .respond_with(ResponseTemplate::new(409).insert_header("X-Transmission-Session-Id", SESSION))
        .with_priority(10)
        .mount(server)
        .await;
}

fn success(arguments: serde_json::Value) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({"result": "success", "arguments": arguments}))
}

// ==================== Session ====================

#[tokio::test]
async fn test_login_completes_session_id_handshake() {
    let mock_server = require_mock_server!();
    Mock::given(method("POST"))
        .and(path("/transmission/rpc"))
        .and(header("X-Transmission-Session-Id", SESSION))
        .and(body_partial_json(json!({"method": "session-get"})))
        .respond_with(success(json!({"version": "4.0.5"})))
        .expect(1)
        .mount(&mock_server)
        .await;
    mount_handshake(&mock_server).await;

    let result = client(&mock_server).login().await;

    assert!(result.is_ok(), "handshake should settle: {:?}", result.err());
}

#[tokio::test]
async fn test_login_rejected_credentials_is_auth_error() {
    let mock_server = require_mock_server!();
    Mock::given(method("POST"))
        .and(path("/transmission/rpc"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&mock_server)
        .await;

    let error = client(&mock_server).login().await.unwrap_err();

    assert!(matches!(error, ClientError::Auth { .. }), "got {error:?}");
}

#[tokio::test]
async fn test_conflict_without_session_header_is_protocol_error() {
    let mock_server = require_mock_server!();
    Mock::given(method("POST"))
        .and(path("/transmission/rpc"))
        .respond_with(ResponseTemplate::new(409))
        .mount(&mock_server)
        .await;

    let error = client(&mock_server).login().await.unwrap_err();

    assert!(matches!(error, ClientError::Protocol { .. }), "got {error:?}");
}

// ==================== Lookup ====================

#[tokio::test]
async fn test_find_item_maps_torrent() {
    let mock_server = require_mock_server!();
    Mock::given(method("POST"))
        .and(path("/transmission/rpc"))
        .and(header("X-Transmission-Session-Id", SESSION))
        .and(body_partial_json(json!({"method": "torrent-get", "arguments": {"ids": [HASH]}})))
        .respond_with(success(json!({"torrents": [{
            "hashString": HASH,
            "name": "Album",
            "status": 4,
            "isPrivate": false,
            "totalSize": 3000,
            "rateDownload": 0,
            "eta": -1,
            "downloadedEver": 1500,
            "uploadRatio": 0.0,
            "secondsSeeding": 0,
            "downloadDir": "/downloads/lidarr",
            "labels": ["music"],
            "files": [
                {"name": "Album/01.flac", "length": 1000},
                {"name": "Album/cover.lnk", "length": 2}
            ],
            "fileStats": [{"wanted": true}, {"wanted": false}],
            "metadataPercentComplete": 1.0
        }]})))
        .mount(&mock_server)
        .await;
    mount_handshake(&mock_server).await;

    let item = client(&mock_server).find_item(HASH).await.unwrap().unwrap();

    assert_eq!(item.state, ItemState::Downloading);
    assert_eq!(item.eta, 0, "negative ETA means unknown");
    assert_eq!(item.category.as_deref(), Some("lidarr"));
    assert_eq!(item.tags, vec!["music".to_string()]);
    assert_eq!(item.wanted_files().count(), 1);
    assert_eq!(item.files[1].priority, 0);
}

#[tokio::test]
async fn test_find_item_unknown_hash_is_none() {
    let mock_server = require_mock_server!();
    Mock::given(method("POST"))
        .and(path("/transmission/rpc"))
        .and(header("X-Transmission-Session-Id", SESSION))
        .respond_with(success(json!({"torrents": []})))
        .mount(&mock_server)
        .await;
    mount_handshake(&mock_server).await;

    let item = client(&mock_server).find_item(HASH).await.unwrap();

    assert!(item.is_none());
}

// ==================== Mutations ====================

#[tokio::test]
async fn test_set_category_moves_to_sibling_directory() {
    let mock_server = require_mock_server!();
    Mock::given(method("POST"))
        .and(path("/transmission/rpc"))
        .and(header("X-Transmission-Session-Id", SESSION))
        .and(body_partial_json(json!({
            "method": "torrent-set-location",
            "arguments": {"ids": [HASH], "location": "/downloads/unlinked", "move": true}
        })))
        .respond_with(success(json!({})))
        .expect(1)
        .mount(&mock_server)
        .await;
    mount_handshake(&mock_server).await;

    let item = DownloadItem {
        hash: HASH.to_string(),
        save_path: PathBuf::from("/downloads/tv"),
        ..DownloadItem::default()
    };
    client(&mock_server)
        .set_category(&item, "unlinked")
        .await
        .unwrap();
}

#[tokio::test]
async fn test_delete_item_removes_local_data() {
    let mock_server = require_mock_server!();
    Mock::given(method("POST"))
        .and(path("/transmission/rpc"))
        .and(header("X-Transmission-Session-Id", SESSION))
        .and(body_partial_json(json!({
            "method": "torrent-remove",
            "arguments": {"ids": [HASH], "delete-local-data": true}
        })))
        .respond_with(success(json!({})))
        .expect(1)
        .mount(&mock_server)
        .await;
    mount_handshake(&mock_server).await;

    client(&mock_server).delete_item(HASH).await.unwrap();
}

#[tokio::test]
async fn test_failed_result_is_protocol_error() {
    let mock_server = require_mock_server!();
    Mock::given(method("POST"))
        .and(path("/transmission/rpc"))
        .and(header("X-Transmission-Session-Id", SESSION))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"result": "invalid or corrupt torrent", "arguments": {}})),
        )
        .mount(&mock_server)
        .await;
    mount_handshake(&mock_server).await;

    let error = client(&mock_server).delete_item(HASH).await.unwrap_err();

    assert!(matches!(error, ClientError::Protocol { .. }), "got {error:?}");
}
