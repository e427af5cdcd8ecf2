use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of media a [`MediaItem`] points to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Video,
    Gif,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Image => "image",
            MediaKind::Video => "video",
            MediaKind::Gif => "gif",
        }
    }

    pub fn default_extension(&self) -> &'static str {
        match self {
            MediaKind::Image => "jpg",
            MediaKind::Video => "mp4",
            MediaKind::Gif => "gif",
        }
    }

    pub fn parse(s: &str) -> Option<MediaKind> {
        match s.trim().to_ascii_lowercase().as_str() {
            "image" | "photo" | "img" => Some(MediaKind::Image),
            "video" => Some(MediaKind::Video),
            "gif" | "animated_gif" => Some(MediaKind::Gif),
            _ => None,
        }
    }
}

/// A single piece of media discovered for an account, resolved to exactly
/// one downloadable URL (video variants are already reduced to the
/// highest-bitrate MP4 by the scraper that produced this item).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaItem {
    pub id: String,
    pub tweet_id: String,
    pub username: String,
    pub kind: MediaKind,
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename_hint: Option<String>,
}

/// The scope a [`FailureDetail`] applies to: an entire account attempt, or a
/// single media download.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureScope {
    User,
    Media,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaFailureRef {
    pub tweet_id: String,
    pub media_id: String,
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureDetail {
    pub scope: FailureScope,
    pub username: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media: Option<MediaFailureRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attempts: Option<u32>,
    pub timestamp: DateTime<Utc>,
}

/// Running progress counters, carried on several [`JobEvent`] variants.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Progress {
    pub total: usize,
    pub downloaded: usize,
    pub failed: usize,
    pub skipped: usize,
}

/// One step of the batch orchestrator's event stream. The full sequence for
/// a single account is always
/// `user_started (warning|media_found download_progress)* user_finished`
/// or `user_started warning* error`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobEvent {
    JobStarted {
        message: String,
        timestamp: DateTime<Utc>,
        #[serde(rename = "userCount")]
        user_count: usize,
    },
    UserStarted {
        message: String,
        timestamp: DateTime<Utc>,
        username: String,
    },
    MediaFound {
        message: String,
        timestamp: DateTime<Utc>,
        username: String,
        count: usize,
    },
    DownloadProgress {
        message: String,
        timestamp: DateTime<Utc>,
        username: String,
        progress: Progress,
    },
    UserFinished {
        message: String,
        timestamp: DateTime<Utc>,
        username: String,
    },
    Warning {
        message: String,
        timestamp: DateTime<Utc>,
        #[serde(skip_serializing_if = "Option::is_none")]
        username: Option<String>,
    },
    Error {
        message: String,
        timestamp: DateTime<Utc>,
        #[serde(skip_serializing_if = "Option::is_none")]
        username: Option<String>,
    },
    JobFinished {
        message: String,
        timestamp: DateTime<Utc>,
        progress: Progress,
        #[serde(skip_serializing_if = "std::ops::Not::not")]
        cancelled: bool,
    },
}

/// Aggregate outcome of a batch job, produced once the event sequence in
/// [`JobEvent`] terminates normally.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobResult {
    pub total_users: usize,
    pub succeeded_users: usize,
    pub failed_users: usize,
    pub total_media: usize,
    pub downloaded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub failure_details: Vec<FailureDetail>,
}

impl JobResult {
    /// `true` when the job should be reported to the caller as a partial
    /// success rather than a clean run (drives the CLI's exit code 4).
    pub fn has_final_failures(&self) -> bool {
        self.failed_users > 0 || self.failed > 0
    }
}

/// Outcome of a single [`crate::downloader`] batch run.
#[derive(Debug, Clone, Default)]
pub struct DownloadOutcome {
    pub total: usize,
    pub downloaded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub failure_details: Vec<FailureDetail>,
}
