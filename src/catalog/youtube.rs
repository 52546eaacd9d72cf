use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::blocking::Client;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::database::repo::{Counters, VideoCandidate};
use crate::error::{PipelineError, Result};

/// Hard ceiling of ids per statistics request imposed by the API.
pub const MAX_IDS_PER_STATS_REQUEST: usize = 50;

/// External search index plus statistics endpoint.
pub trait VideoIndex {
    /// One search request; at most `max_results` candidates.
    fn search(&self, query: &str, max_results: u32) -> Result<Vec<VideoCandidate>>;

    /// Counters for the ids the service still knows about. Ids it does not
    /// return are simply absent from the map.
    fn statistics(&self, video_ids: &[String]) -> Result<HashMap<String, Counters>>;
}

/// YouTube Data API v3 client.
pub struct YouTubeClient {
    http: Client,
    base_url: String,
    api_key: String,
}

impl YouTubeClient {
    pub fn new(base_url: &str, api_key: &str) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| PipelineError::external("client", e))?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        })
    }

    fn get_json<T: for<'de> Deserialize<'de>>(&self, endpoint: &str, query: &[(&str, String)]) -> Result<T> {
        let url = format!("{}/{}", self.base_url, endpoint);
        debug!("GET {} {:?}", url, query.iter().map(|(k, _)| k).collect::<Vec<_>>());

        let response = self
            .http
            .get(&url)
            .query(query)
            .query(&[("key", self.api_key.as_str())])
            .send()
            .map_err(|e| PipelineError::external(endpoint, e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(PipelineError::external(
                endpoint,
                format!("status {}: {}", status, body),
            ));
        }

        response
            .json::<T>()
            .map_err(|e| PipelineError::external(endpoint, format!("malformed response: {}", e)))
    }
}

impl VideoIndex for YouTubeClient {
    fn search(&self, query: &str, max_results: u32) -> Result<Vec<VideoCandidate>> {
        let response: SearchResponse = self.get_json(
            "search",
            &[
                ("part", "snippet".to_string()),
                ("type", "video".to_string()),
                ("q", query.to_string()),
                ("maxResults", max_results.to_string()),
            ],
        )?;
        Ok(search_candidates(response, max_results))
    }

    fn statistics(&self, video_ids: &[String]) -> Result<HashMap<String, Counters>> {
        let response: VideosResponse = self.get_json(
            "videos",
            &[
                ("part", "statistics".to_string()),
                ("id", video_ids.join(",")),
            ],
        )?;
        Ok(statistics_by_id(response))
    }
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    items: Vec<SearchItem>,
}

// Every field is optional so one incomplete item cannot fail the whole page.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SearchItem {
    id: SearchItemId,
    snippet: Snippet,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct SearchItemId {
    video_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct Snippet {
    title: Option<String>,
    channel_title: Option<String>,
    published_at: Option<String>,
    description: Option<String>,
    thumbnails: HashMap<String, Thumbnail>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Thumbnail {
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct VideosResponse {
    #[serde(default)]
    items: Vec<VideoItem>,
}

#[derive(Debug, Deserialize)]
struct VideoItem {
    id: String,
    #[serde(default)]
    statistics: Statistics,
}

// The API encodes counts as strings and omits hidden ones.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Statistics {
    view_count: Option<String>,
    like_count: Option<String>,
    comment_count: Option<String>,
}

/// Converts one search page into candidates. Non-video results and items
/// missing required fields are skipped; the rest are kept.
fn search_candidates(response: SearchResponse, max_results: u32) -> Vec<VideoCandidate> {
    let mut candidates = Vec::with_capacity(response.items.len());
    for item in response.items {
        let Some(video_id) = item.id.video_id else {
            continue;
        };
        let snippet = item.snippet;
        let (Some(title), Some(channel_name), Some(raw_published)) =
            (snippet.title, snippet.channel_title, snippet.published_at)
        else {
            warn!("Skipping search result {}: incomplete snippet", video_id);
            continue;
        };
        let published_at = match parse_timestamp(&raw_published) {
            Ok(ts) => ts,
            Err(e) => {
                warn!("Skipping search result {}: {}", video_id, e);
                continue;
            }
        };
        let thumbnail_url = snippet.thumbnails.get("high").and_then(|t| t.url.clone());

        candidates.push(VideoCandidate {
            video_id,
            title,
            channel_name,
            published_at,
            description: snippet.description,
            thumbnail_url,
        });
    }
    candidates.truncate(max_results as usize);
    candidates
}

fn statistics_by_id(response: VideosResponse) -> HashMap<String, Counters> {
    response
        .items
        .into_iter()
        .map(|item| {
            let counters = Counters {
                views: parse_count(item.statistics.view_count.as_deref()),
                likes: parse_count(item.statistics.like_count.as_deref()),
                comments: parse_count(item.statistics.comment_count.as_deref()),
            };
            (item.id, counters)
        })
        .collect()
}

fn parse_count(raw: Option<&str>) -> u64 {
    raw.and_then(|s| s.parse().ok()).unwrap_or(0)
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| PipelineError::external("search", format!("bad publishedAt {:?}: {}", raw, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const SEARCH_BODY: &str = r#"{
        "kind": "youtube#searchListResponse",
        "items": [
            {
                "id": {"kind": "youtube#video", "videoId": "abc123"},
                "snippet": {
                    "publishedAt": "2024-05-01T09:30:00Z",
                    "channelId": "UC1",
                    "title": "Stage cam",
                    "description": "fancam",
                    "thumbnails": {
                        "default": {"url": "https://i.ytimg.com/vi/abc123/default.jpg"},
                        "high": {"url": "https://i.ytimg.com/vi/abc123/hqdefault.jpg"}
                    },
                    "channelTitle": "Fan Channel"
                }
            },
            {
                "id": {"kind": "youtube#channel", "channelId": "UC2"},
                "snippet": {
                    "publishedAt": "2024-05-01T09:30:00Z",
                    "title": "a channel",
                    "channelTitle": "a channel"
                }
            },
            {
                "id": {"kind": "youtube#video", "videoId": "def456"},
                "snippet": {
                    "publishedAt": "2023-12-31T23:59:59Z",
                    "title": "Interview",
                    "channelTitle": "News"
                }
            }
        ]
    }"#;

    #[test]
    fn parses_search_items() {
        let response: SearchResponse = serde_json::from_str(SEARCH_BODY).unwrap();
        let candidates = search_candidates(response, 30);

        assert_eq!(candidates.len(), 2);
        let first = &candidates[0];
        assert_eq!(first.video_id, "abc123");
        assert_eq!(first.title, "Stage cam");
        assert_eq!(first.channel_name, "Fan Channel");
        assert_eq!(first.published_at, Utc.with_ymd_and_hms(2024, 5, 1, 9, 30, 0).unwrap());
        assert_eq!(first.description.as_deref(), Some("fancam"));
        assert_eq!(
            first.thumbnail_url.as_deref(),
            Some("https://i.ytimg.com/vi/abc123/hqdefault.jpg")
        );

        let second = &candidates[1];
        assert_eq!(second.description, None);
        assert_eq!(second.thumbnail_url, None);
    }

    #[test]
    fn search_respects_max_results() {
        let response: SearchResponse = serde_json::from_str(SEARCH_BODY).unwrap();
        let candidates = search_candidates(response, 1);
        assert_eq!(candidates.len(), 1);
    }

    #[test]
    fn bad_items_are_skipped_without_losing_the_page() {
        let body = r#"{"items": [
            {"id": {"videoId": "good1"}, "snippet": {
                "publishedAt": "2024-05-01T09:30:00Z", "title": "t1", "channelTitle": "c"}},
            {"id": {"videoId": "bad_date"}, "snippet": {
                "publishedAt": "2024-05-01", "title": "t2", "channelTitle": "c"}},
            {"id": {"videoId": "no_title"}, "snippet": {
                "publishedAt": "2024-05-01T09:30:00Z", "channelTitle": "c"}},
            {"id": {"videoId": "no_snippet"}},
            {"id": {"videoId": "good2"}, "snippet": {
                "publishedAt": "2024-05-02T10:00:00+02:00", "title": "t3", "channelTitle": "c"}}
        ]}"#;
        let response: SearchResponse = serde_json::from_str(body).unwrap();
        let candidates = search_candidates(response, 10);

        let ids: Vec<&str> = candidates.iter().map(|c| c.video_id.as_str()).collect();
        assert_eq!(ids, vec!["good1", "good2"]);
        assert_eq!(candidates[1].published_at, Utc.with_ymd_and_hms(2024, 5, 2, 8, 0, 0).unwrap());
    }

    #[test]
    fn malformed_timestamp_is_an_error() {
        let err = parse_timestamp("yesterday").unwrap_err();
        assert!(matches!(err, PipelineError::ExternalApi { .. }));
    }

    #[test]
    fn parses_statistics_with_hidden_counts() {
        let body = r#"{"items": [
            {"id": "abc123", "statistics": {"viewCount": "1500", "likeCount": "42", "commentCount": "7"}},
            {"id": "def456", "statistics": {"viewCount": "10"}}
        ]}"#;
        let response: VideosResponse = serde_json::from_str(body).unwrap();
        let stats = statistics_by_id(response);

        assert_eq!(stats.len(), 2);
        assert_eq!(stats["abc123"], Counters { views: 1500, likes: 42, comments: 7 });
        assert_eq!(stats["def456"], Counters { views: 10, likes: 0, comments: 0 });
    }
}
