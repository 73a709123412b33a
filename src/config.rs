//! Configuration and settings management
//!
//! Loads settings from environment variables (and optional config files)
//! and defines the size and timing constants used by the pipeline.

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Media payload ceiling enforced by the Telegram Bot API for uploads.
pub const MAX_FILE_SIZE: u64 = 50 * 1024 * 1024; // 50 MB

/// Interval between two polls of the progress snapshot.
pub const PROGRESS_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Default wall-clock budget for one transcoding run.
pub const COMPRESS_TIMEOUT_SECS: u64 = 300;

/// Delay used after the first failed reconnect and before resuming polling.
pub const RECONNECT_SHORT_DELAY: Duration = Duration::from_secs(5);
/// Delay used once reconnecting has failed repeatedly.
pub const RECONNECT_LONG_DELAY: Duration = Duration::from_secs(30);

/// Number of polling errors inside [`POLLING_ERROR_WINDOW`] that trips a reconnect.
pub const POLLING_ERROR_THRESHOLD: u32 = 3;
/// Window in which polling errors are counted.
pub const POLLING_ERROR_WINDOW: Duration = Duration::from_secs(60);
/// HTTP timeout of the client used for `getUpdates`; must exceed the long-poll timeout.
pub const POLLING_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Application settings loaded from environment variables
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Settings {
    /// Telegram Bot API token
    pub telegram_bot_token: String,

    /// SOCKS5 proxy host
    pub socks5_host: Option<String>,
    /// SOCKS5 proxy port (kept as text so a typo drops the path instead of failing startup)
    pub socks5_port: Option<String>,
    /// SOCKS5 proxy user name
    pub socks5_username: Option<String>,
    /// SOCKS5 proxy password
    pub socks5_password: Option<String>,

    /// MTProto proxy host
    pub mtproto_host: Option<String>,
    /// MTProto proxy port
    pub mtproto_port: Option<String>,
    /// MTProto proxy secret
    pub mtproto_secret: Option<String>,

    /// Directory for temporary media files
    #[serde(default = "default_downloads_dir")]
    pub downloads_dir: PathBuf,
    /// Path of the SQLite statistics database
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
    /// yt-dlp executable
    #[serde(default = "default_ytdlp_bin")]
    pub ytdlp_bin: String,
    /// ffmpeg executable
    #[serde(default = "default_ffmpeg_bin")]
    pub ffmpeg_bin: String,
    /// Timeout for one ffmpeg run, in seconds
    #[serde(default = "default_compress_timeout_secs")]
    pub compress_timeout_secs: u64,
    /// Reconnect attempts before giving up; `None` retries forever
    pub max_reconnect_attempts: Option<u32>,
}

fn default_downloads_dir() -> PathBuf {
    PathBuf::from("videos")
}

fn default_database_path() -> PathBuf {
    PathBuf::from("bot.db")
}

fn default_ytdlp_bin() -> String {
    "yt-dlp".to_string()
}

fn default_ffmpeg_bin() -> String {
    "ffmpeg".to_string()
}

const fn default_compress_timeout_secs() -> u64 {
    COMPRESS_TIMEOUT_SECS
}

/// Build the layered configuration source shared by all settings loaders.
///
/// # Errors
///
/// Returns a `ConfigError` if one of the sources cannot be read.
pub fn build_config() -> Result<Config, ConfigError> {
    let run_mode = std::env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

    Config::builder()
        .add_source(File::with_name("config/default").required(false))
        .add_source(File::with_name(&format!("config/{run_mode}")).required(false))
        // This file shouldn't be checked into git
        .add_source(File::with_name("config/local").required(false))
        // Eg.. `APP_DOWNLOADS_DIR=/tmp ./target/app` would set the `downloads_dir` key
        .add_source(Environment::with_prefix("APP").separator("__"))
        // Environment::default() maps UPPER_SNAKE_CASE to snake_case;
        // ignore_empty treats empty env vars as unset
        .add_source(Environment::default().ignore_empty(true))
        .build()
}

impl Settings {
    /// Create new settings by loading from environment and files
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use vidrelay::config::Settings;
    ///
    /// let settings = Settings::new().expect("Failed to load configuration");
    /// ```
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if loading fails or the bot token is empty.
    pub fn new() -> Result<Self, ConfigError> {
        let settings: Self = build_config()?.try_deserialize()?;
        if settings.telegram_bot_token.trim().is_empty() {
            return Err(ConfigError::Message(
                "TELEGRAM_BOT_TOKEN is not set".to_string(),
            ));
        }
        Ok(settings)
    }

    /// Settings with only a token set, everything else defaulted.
    #[must_use]
    pub fn with_token(token: impl Into<String>) -> Self {
        Self {
            telegram_bot_token: token.into(),
            socks5_host: None,
            socks5_port: None,
            socks5_username: None,
            socks5_password: None,
            mtproto_host: None,
            mtproto_port: None,
            mtproto_secret: None,
            downloads_dir: default_downloads_dir(),
            database_path: default_database_path(),
            ytdlp_bin: default_ytdlp_bin(),
            ffmpeg_bin: default_ffmpeg_bin(),
            compress_timeout_secs: COMPRESS_TIMEOUT_SECS,
            max_reconnect_attempts: None,
        }
    }

    /// Timeout for one transcoding run
    #[must_use]
    pub const fn compress_timeout(&self) -> Duration {
        Duration::from_secs(self.compress_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    // Single test touching the process environment to avoid races
    #[test]
    fn test_config_env_loading() -> Result<(), Box<dyn std::error::Error>> {
        env::set_var("TELEGRAM_BOT_TOKEN", "dummy_token");
        env::set_var("SOCKS5_HOST", "127.0.0.1");
        env::set_var("SOCKS5_PORT", "1080");
        env::set_var("MTPROTO_HOST", "");

        let settings = Settings::new()?;
        assert_eq!(settings.telegram_bot_token, "dummy_token");
        assert_eq!(settings.socks5_host.as_deref(), Some("127.0.0.1"));
        assert_eq!(settings.socks5_port.as_deref(), Some("1080"));
        // Empty values are treated as unset
        assert_eq!(settings.mtproto_host, None);
        assert_eq!(settings.downloads_dir, PathBuf::from("videos"));
        assert_eq!(settings.compress_timeout(), Duration::from_secs(300));

        env::set_var("TELEGRAM_BOT_TOKEN", "");
        assert!(Settings::new().is_err());

        env::remove_var("TELEGRAM_BOT_TOKEN");
        env::remove_var("SOCKS5_HOST");
        env::remove_var("SOCKS5_PORT");
        env::remove_var("MTPROTO_HOST");
        Ok(())
    }

    #[test]
    fn test_with_token_defaults() {
        let settings = Settings::with_token("t");
        assert_eq!(settings.ytdlp_bin, "yt-dlp");
        assert_eq!(settings.ffmpeg_bin, "ffmpeg");
        assert_eq!(settings.database_path, PathBuf::from("bot.db"));
        assert!(settings.max_reconnect_attempts.is_none());
    }
}
