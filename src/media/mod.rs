//! Media acquisition: platform classification, download requests,
//! progress snapshots, temporary file ownership and the external
//! extraction / transcoding engines.

/// Extraction engine adapter (yt-dlp).
pub mod extractor;
/// Progress snapshots and the per-request progress channel.
pub mod progress;
/// Temporary media file ownership.
pub mod temp;
/// Transcoder adapter (ffmpeg).
pub mod transcoder;

pub use extractor::{ExtractedMedia, ExtractionError, Extractor, MediaMetadata, YtDlpExtractor};
pub use progress::{progress_channel, ProgressFeed, ProgressSink, ProgressSnapshot, ProgressStatus};
pub use temp::{cleanup_file, TempMedia};
pub use transcoder::{CompressionError, FfmpegTranscoder, Transcoder};

use std::fmt;
use uuid::Uuid;

const DESKTOP_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";
const MOBILE_USER_AGENT: &str = "Mozilla/5.0 (iPhone; CPU iPhone OS 17_0 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.0 Mobile/15E148 Safari/604.1";
const ACCEPT_HTML: &str = "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8";

const YOUTUBE_HEADERS: &[(&str, &str)] = &[
    ("User-Agent", DESKTOP_USER_AGENT),
    ("Accept", ACCEPT_HTML),
    ("Accept-Language", "en-US,en;q=0.5"),
    ("Sec-Fetch-Mode", "navigate"),
];

const TIKTOK_HEADERS: &[(&str, &str)] = &[
    ("User-Agent", DESKTOP_USER_AGENT),
    ("Referer", "https://www.tiktok.com/"),
    ("Accept", ACCEPT_HTML),
];

const INSTAGRAM_HEADERS: &[(&str, &str)] = &[
    ("User-Agent", MOBILE_USER_AGENT),
    ("Accept", ACCEPT_HTML),
];

/// Source platforms the bot accepts links from. The set is closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Platform {
    /// YouTube videos and Shorts
    YouTube,
    /// TikTok videos
    TikTok,
    /// Instagram Reels and video posts
    Instagram,
}

impl Platform {
    /// All supported platforms
    pub const ALL: [Self; 3] = [Self::YouTube, Self::TikTok, Self::Instagram];

    /// Classify a link by its host. Returns `None` for anything unsupported.
    ///
    /// # Examples
    ///
    /// ```
    /// use vidrelay::media::Platform;
    /// assert_eq!(Platform::detect("https://youtu.be/abc"), Some(Platform::YouTube));
    /// assert_eq!(Platform::detect("https://vimeo.com/1"), None);
    /// ```
    #[must_use]
    pub fn detect(url: &str) -> Option<Self> {
        let url = url.to_lowercase();
        if url.contains("tiktok.com") {
            Some(Self::TikTok)
        } else if url.contains("instagram.com") || url.contains("instagr.am") {
            Some(Self::Instagram)
        } else if url.contains("youtube.com") || url.contains("youtu.be") {
            Some(Self::YouTube)
        } else {
            None
        }
    }

    /// Stable tag stored in the statistics database
    #[must_use]
    pub const fn tag(self) -> &'static str {
        match self {
            Self::YouTube => "youtube",
            Self::TikTok => "tiktok",
            Self::Instagram => "instagram",
        }
    }

    /// Human-readable platform name
    #[must_use]
    pub const fn display_name(self) -> &'static str {
        match self {
            Self::YouTube => "YouTube",
            Self::TikTok => "TikTok",
            Self::Instagram => "Instagram",
        }
    }

    /// yt-dlp format selection for this platform
    #[must_use]
    pub const fn format_selector(self) -> &'static str {
        match self {
            Self::YouTube => "bestvideo[ext=mp4][height<=1080]+bestaudio[ext=m4a]/best[ext=mp4]/best",
            Self::TikTok | Self::Instagram => "best[ext=mp4]/best",
        }
    }

    /// Request headers sent to the platform while extracting
    #[must_use]
    pub const fn http_headers(self) -> &'static [(&'static str, &'static str)] {
        match self {
            Self::YouTube => YOUTUBE_HEADERS,
            Self::TikTok => TIKTOK_HEADERS,
            Self::Instagram => INSTAGRAM_HEADERS,
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

/// Unique identifier of one download request, also the statistics row key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId(Uuid);

impl RequestId {
    /// Allocate a fresh identifier
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.as_simple())
    }
}

/// One user-submitted link travelling through the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadRequest {
    /// Identifier assigned at creation
    pub id: RequestId,
    /// Telegram user id
    pub user_id: i64,
    /// Chat the request came from
    pub chat_id: i64,
    /// Source link
    pub url: String,
    /// Detected platform
    pub platform: Platform,
}

impl DownloadRequest {
    /// Create a request with a fresh identifier
    #[must_use]
    pub fn new(user_id: i64, chat_id: i64, url: impl Into<String>, platform: Platform) -> Self {
        Self {
            id: RequestId::new(),
            user_id,
            chat_id,
            url: url.into(),
            platform,
        }
    }
}
