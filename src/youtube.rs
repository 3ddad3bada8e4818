#![forbid(unsafe_code)]

//! Typed client for the YouTube Data API v3.
//!
//! Two read operations are wrapped: `videos.list` (snippet + statistics) and
//! `channels.list` (statistics). The client is blocking (`ureq`); handlers
//! run it through `tokio::task::spawn_blocking`.
//!
//! Upstream counts arrive as strings and may be absent entirely (e.g. the
//! comment count of a video with comments disabled); every numeric field
//! defaults to 0 when missing or unparseable.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use ureq::{Agent, AgentBuilder};

pub const DEFAULT_API_BASE: &str = "https://www.googleapis.com/youtube/v3";

/// Truncation limit for the description snippet returned to clients.
const DESCRIPTION_LIMIT: usize = 200;

#[derive(Debug, Error)]
pub enum StatsError {
    #[error("Video not found or invalid video ID")]
    VideoNotFound,
    #[error("Channel not found")]
    ChannelNotFound,
    #[error("YouTube API request failed: {0}")]
    Upstream(String),
}

/// Per-video statistics merged with the snippet fields clients care about.
/// Subscriber count is deliberately absent: it is a channel-level statistic.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoStats {
    pub video_id: String,
    pub title: String,
    pub channel_title: String,
    pub published_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumbnail: Option<String>,
    pub statistics: VideoCounts,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<String>,
    pub description: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoCounts {
    pub view_count: u64,
    pub like_count: u64,
    pub comment_count: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelStats {
    pub subscriber_count: u64,
    pub video_count: u64,
    pub view_count: u64,
}

/// Video statistics with the owning channel's aggregate statistics nested in.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteStats {
    #[serde(flatten)]
    pub video: VideoStats,
    pub channel_statistics: ChannelStats,
}

// Wire types for the upstream list responses. Only the parts we request are
// modeled; anything else in the payload is ignored.

#[derive(Debug, Deserialize)]
struct ListResponse<T> {
    #[serde(default = "Vec::new")]
    items: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct VideoItem {
    snippet: VideoSnippet,
    #[serde(default)]
    statistics: RawVideoCounts,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VideoSnippet {
    title: String,
    channel_id: String,
    channel_title: String,
    published_at: String,
    #[serde(default)]
    description: String,
    thumbnails: Option<Thumbnails>,
    duration: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Thumbnails {
    high: Option<Thumbnail>,
    #[serde(rename = "default")]
    fallback: Option<Thumbnail>,
}

#[derive(Debug, Deserialize)]
struct Thumbnail {
    url: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawVideoCounts {
    view_count: Option<String>,
    like_count: Option<String>,
    comment_count: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChannelItem {
    #[serde(default)]
    statistics: RawChannelCounts,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawChannelCounts {
    subscriber_count: Option<String>,
    video_count: Option<String>,
    view_count: Option<String>,
}

/// Blocking YouTube Data API client. Constructed once at startup and shared
/// through the server state; `Agent` is internally reference counted, so
/// cloning is cheap.
#[derive(Clone)]
pub struct StatsClient {
    agent: Agent,
    api_key: String,
    base_url: String,
}

impl StatsClient {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self::with_base_url(api_key, DEFAULT_API_BASE)
    }

    /// Points the client at an alternate API base, used by tests to target a
    /// local mock server.
    pub fn with_base_url(api_key: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            agent: AgentBuilder::new().build(),
            api_key: api_key.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Fetches statistics for a single video. Zero items from upstream means
    /// the id does not resolve to a video.
    pub fn video_stats(&self, video_id: &str) -> Result<VideoStats, StatsError> {
        let (stats, _channel_id) = self.fetch_video(video_id)?;
        Ok(stats)
    }

    /// Fetches aggregate statistics for a channel (subscriber count lives
    /// here, not on individual videos).
    pub fn channel_stats(&self, channel_id: &str) -> Result<ChannelStats, StatsError> {
        let response: ListResponse<ChannelItem> = self
            .agent
            .get(&format!("{}/channels", self.base_url))
            .query("part", "statistics")
            .query("id", channel_id)
            .query("key", &self.api_key)
            .call()
            .map_err(request_error)?
            .into_json()
            .map_err(|err| StatsError::Upstream(err.to_string()))?;

        let channel = response.items.into_iter().next().ok_or(StatsError::ChannelNotFound)?;
        Ok(shape_channel(channel))
    }

    /// Fetches video statistics and the owning channel's statistics in one
    /// combined record. The channel id comes out of the same `videos.list`
    /// response as the video statistics, so this is two upstream calls total.
    /// Either failure propagates unchanged; there are no partial results.
    pub fn complete_stats(&self, video_id: &str) -> Result<CompleteStats, StatsError> {
        let (video, channel_id) = self.fetch_video(video_id)?;
        let channel_statistics = self.channel_stats(&channel_id)?;
        Ok(CompleteStats {
            video,
            channel_statistics,
        })
    }

    fn fetch_video(&self, video_id: &str) -> Result<(VideoStats, String), StatsError> {
        let response: ListResponse<VideoItem> = self
            .agent
            .get(&format!("{}/videos", self.base_url))
            .query("part", "snippet,statistics")
            .query("id", video_id)
            .query("key", &self.api_key)
            .call()
            .map_err(request_error)?
            .into_json()
            .map_err(|err| StatsError::Upstream(err.to_string()))?;

        let video = response.items.into_iter().next().ok_or(StatsError::VideoNotFound)?;
        Ok(shape_video(video_id, video))
    }
}

fn request_error(err: ureq::Error) -> StatsError {
    match err {
        ureq::Error::Status(code, response) => {
            let body = response.into_string().unwrap_or_default();
            let message = upstream_message(&body).unwrap_or(body);
            StatsError::Upstream(format!("upstream status {code}: {message}"))
        }
        ureq::Error::Transport(transport) => StatsError::Upstream(transport.to_string()),
    }
}

/// Pulls the human-readable message out of a Google API error body, e.g.
/// `{"error": {"code": 403, "message": "API key not valid..."}}`.
fn upstream_message(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    value
        .get("error")?
        .get("message")?
        .as_str()
        .map(str::to_string)
}

fn shape_video(video_id: &str, item: VideoItem) -> (VideoStats, String) {
    let VideoItem { snippet, statistics } = item;
    let thumbnail = snippet.thumbnails.and_then(|thumbs| {
        thumbs
            .high
            .or(thumbs.fallback)
            .map(|thumbnail| thumbnail.url)
    });
    let stats = VideoStats {
        video_id: video_id.to_string(),
        title: snippet.title,
        channel_title: snippet.channel_title,
        published_at: snippet.published_at,
        thumbnail,
        statistics: VideoCounts {
            view_count: parse_count(statistics.view_count),
            like_count: parse_count(statistics.like_count),
            comment_count: parse_count(statistics.comment_count),
        },
        duration: snippet.duration,
        description: truncate_description(&snippet.description),
    };
    (stats, snippet.channel_id)
}

fn shape_channel(item: ChannelItem) -> ChannelStats {
    ChannelStats {
        subscriber_count: parse_count(item.statistics.subscriber_count),
        video_count: parse_count(item.statistics.video_count),
        view_count: parse_count(item.statistics.view_count),
    }
}

fn parse_count(raw: Option<String>) -> u64 {
    raw.and_then(|value| value.parse().ok()).unwrap_or(0)
}

/// First 200 characters with an ellipsis marker, appended even when the
/// original was shorter. That matches the deployed behavior clients already
/// depend on. Truncation happens on character boundaries.
fn truncate_description(description: &str) -> String {
    let mut truncated: String = description.chars().take(DESCRIPTION_LIMIT).collect();
    truncated.push_str("...");
    truncated
}
