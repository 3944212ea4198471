//! Wire types for the Arr queue and command APIs.

use serde::{Deserialize, Serialize};

use super::ArrType;

/// Transfer protocol of a queue entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DownloadProtocol {
    Torrent,
    Usenet,
    #[default]
    #[serde(other)]
    Unknown,
}

/// One line of a status message block.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(default)]
pub struct StatusMessage {
    pub title: String,
    pub messages: Vec<String>,
}

/// A PVR queue entry. Fetched fresh every run, never cached.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct QueueRecord {
    pub id: i64,
    pub download_id: Option<String>,
    pub title: String,
    pub protocol: DownloadProtocol,
    pub status: String,
    pub tracked_download_status: String,
    pub tracked_download_state: String,
    pub status_messages: Vec<StatusMessage>,
    pub error_message: Option<String>,
    pub series_id: Option<i64>,
    pub episode_id: Option<i64>,
    pub season_number: Option<i64>,
    pub movie_id: Option<i64>,
    pub artist_id: Option<i64>,
    pub album_id: Option<i64>,
}

impl QueueRecord {
    /// Download id lowercased, `None` when absent or blank.
    #[must_use]
    pub fn hash(&self) -> Option<String> {
        self.download_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(str::to_lowercase)
    }

    /// Every status message line plus the error message, for pattern checks.
    pub fn messages(&self) -> impl Iterator<Item = &str> {
        self.status_messages
            .iter()
            .flat_map(|block| std::iter::once(block.title.as_str()).chain(block.messages.iter().map(String::as_str)))
            .chain(self.error_message.as_deref())
    }
}

/// One page of `GET /api/{v}/queue`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct QueuePage {
    pub page: u32,
    pub page_size: u32,
    pub total_records: u32,
    pub records: Vec<QueueRecord>,
}

/// Body of `POST /api/{v}/command` for the searches this engine triggers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "name")]
pub enum SearchCommand {
    #[serde(rename_all = "camelCase")]
    EpisodeSearch { episode_ids: Vec<i64> },
    #[serde(rename_all = "camelCase")]
    SeasonSearch { series_id: i64, season_number: i64 },
    #[serde(rename_all = "camelCase")]
    MoviesSearch { movie_ids: Vec<i64> },
    #[serde(rename_all = "camelCase")]
    AlbumSearch { album_ids: Vec<i64> },
}

impl SearchCommand {
    /// Builds the search for a group of records sharing one download id.
    ///
    /// A Sonarr group with more than one record is a season pack and becomes
    /// a season search. Returns `None` when the records carry no usable ids.
    #[must_use]
    pub fn for_records(arr_type: ArrType, records: &[QueueRecord]) -> Option<Self> {
        match arr_type {
            ArrType::Sonarr => {
                if records.len() > 1
                    && let Some(first) = records.first()
                    && let (Some(series_id), Some(season_number)) = (first.series_id, first.season_number)
                {
                    return Some(Self::SeasonSearch {
                        series_id,
                        season_number,
                    });
                }
                let episode_ids = collect_ids(records, |r| r.episode_id);
                (!episode_ids.is_empty()).then_some(Self::EpisodeSearch { episode_ids })
            }
            ArrType::Radarr => {
                let movie_ids = collect_ids(records, |r| r.movie_id);
                (!movie_ids.is_empty()).then_some(Self::MoviesSearch { movie_ids })
            }
            ArrType::Lidarr => {
                let album_ids = collect_ids(records, |r| r.album_id);
                (!album_ids.is_empty()).then_some(Self::AlbumSearch { album_ids })
            }
        }
    }
}

fn collect_ids(records: &[QueueRecord], id: impl Fn(&QueueRecord) -> Option<i64>) -> Vec<i64> {
    let mut ids: Vec<i64> = records.iter().filter_map(id).collect();
    ids.sort_unstable();
    ids.dedup();
    ids
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;

    use super::*;

    fn episode(id: i64, episode_id: i64) -> QueueRecord {
        QueueRecord {
            id,
            download_id: Some("ABC".into()),
            series_id: Some(7),
            season_number: Some(2),
            episode_id: Some(episode_id),
            ..QueueRecord::default()
        }
    }

    #[test]
    fn test_queue_record_deserializes_camel_case() {
        let record: QueueRecord = serde_json::from_value(json!({
            "id": 12,
            "downloadId": "ABCDEF",
            "title": "Show.S01E01",
            "protocol": "torrent",
            "trackedDownloadStatus": "warning",
            "trackedDownloadState": "importPending",
            "statusMessages": [{"title": "Show.S01E01", "messages": ["No files found are eligible for import"]}],
            "seriesId": 3,
            "episodeId": 44,
            "seasonNumber": 1,
            "someFutureField": true
        }))
        .unwrap();

        assert_eq!(record.hash().as_deref(), Some("abcdef"));
        assert_eq!(record.protocol, DownloadProtocol::Torrent);
        assert_eq!(record.episode_id, Some(44));
        assert!(record.messages().any(|m| m.contains("eligible for import")));
    }

    #[test]
    fn test_unknown_protocol_is_tolerated() {
        let record: QueueRecord = serde_json::from_value(json!({"protocol": "carrier-pigeon"})).unwrap();
        assert_eq!(record.protocol, DownloadProtocol::Unknown);
        assert_eq!(record.hash(), None);
    }

    #[test]
    fn test_single_episode_group_searches_episode() {
        let command = SearchCommand::for_records(ArrType::Sonarr, &[episode(1, 10)]).unwrap();
        assert_eq!(command, SearchCommand::EpisodeSearch { episode_ids: vec![10] });
    }

    #[test]
    fn test_multi_episode_group_searches_season() {
        let command =
            SearchCommand::for_records(ArrType::Sonarr, &[episode(1, 10), episode(2, 11)]).unwrap();
        assert_eq!(
            command,
            SearchCommand::SeasonSearch {
                series_id: 7,
                season_number: 2
            }
        );
    }

    #[test]
    fn test_search_command_serializes_with_name_tag() {
        let value = serde_json::to_value(SearchCommand::MoviesSearch { movie_ids: vec![5] }).unwrap();
        assert_eq!(value, json!({"name": "MoviesSearch", "movieIds": [5]}));

        let value = serde_json::to_value(SearchCommand::SeasonSearch {
            series_id: 1,
            season_number: 3,
        })
        .unwrap();
        assert_eq!(value, json!({"name": "SeasonSearch", "seriesId": 1, "seasonNumber": 3}));
    }

    #[test]
    fn test_album_search_dedups_ids() {
        let records = vec![
            QueueRecord {
                album_id: Some(9),
                ..QueueRecord::default()
            },
            QueueRecord {
                album_id: Some(9),
                ..QueueRecord::default()
            },
        ];
        assert_eq!(
            SearchCommand::for_records(ArrType::Lidarr, &records),
            Some(SearchCommand::AlbumSearch { album_ids: vec![9] })
        );
    }

    #[test]
    fn test_no_ids_means_no_search() {
        assert_eq!(SearchCommand::for_records(ArrType::Radarr, &[QueueRecord::default()]), None);
    }
}
