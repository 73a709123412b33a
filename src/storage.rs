//! Usage statistics storage.
//!
//! The pipeline records users, requests and request outcomes through the
//! [`StatsStore`] trait. Failures here are logged by the caller and never
//! change the outcome of a request.

use crate::media::{DownloadRequest, RequestId};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;
use tracing::info;

/// Errors that can occur in the statistics store
#[derive(Debug, Error)]
pub enum StorageError {
    /// SQLite error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    /// Filesystem error while preparing the database location
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Telegram user as seen by the bot
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserProfile {
    /// Telegram user id
    pub user_id: i64,
    /// @username, if set
    pub username: Option<String>,
    /// First name
    pub first_name: Option<String>,
    /// Last name
    pub last_name: Option<String>,
}

/// Final (or initial) state of a download request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestStatus {
    /// Logged, not finished yet
    Pending,
    /// Video delivered
    Success,
    /// Request failed
    Error,
    /// User declined the compression offer or the offer was superseded
    Cancelled,
}

impl RequestStatus {
    /// Value stored in the `status` column
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Success => "success",
            Self::Error => "error",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Aggregated statistics for one user
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserStats {
    /// All logged requests
    pub total: i64,
    /// Delivered requests
    pub success: i64,
    /// Failed requests
    pub errors: i64,
    /// Delivered requests per platform tag, most frequent first
    pub by_platform: Vec<(String, i64)>,
}

/// Interface for statistics persistence
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait StatsStore: Send + Sync {
    /// Record a user; existing users are left untouched
    async fn register_user(&self, profile: &UserProfile) -> Result<(), StorageError>;
    /// Record a new request as pending, keyed by its id
    async fn log_request(&self, request: &DownloadRequest) -> Result<(), StorageError>;
    /// Record the outcome of a request
    async fn update_request_status(
        &self,
        id: RequestId,
        status: RequestStatus,
        file_size: Option<u64>,
        compressed: bool,
    ) -> Result<(), StorageError>;
    /// Aggregate statistics for a user
    async fn user_stats(&self, user_id: i64) -> Result<UserStats, StorageError>;
}

/// SQLite-backed [`StatsStore`]
#[derive(Clone)]
pub struct SqliteStatsStore {
    pool: SqlitePool,
}

impl SqliteStatsStore {
    /// Open (creating if needed) the database at `path` and apply the schema.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory or database cannot be created.
    pub async fn open(path: &Path) -> Result<Self, StorageError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        info!(path = %path.display(), "Statistics database ready");
        Ok(store)
    }

    /// Private in-memory database, mainly for tests.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be created.
    pub async fn in_memory() -> Result<Self, StorageError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        // One connection that never expires, otherwise the data goes with it
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<(), StorageError> {
        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS users (
              user_id INTEGER PRIMARY KEY,
              username TEXT NULL,
              first_name TEXT NULL,
              last_name TEXT NULL,
              registered_at TEXT NOT NULL
            );
            ",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS downloads (
              id TEXT PRIMARY KEY,
              user_id INTEGER NOT NULL,
              url TEXT NOT NULL,
              platform TEXT NOT NULL,
              status TEXT NOT NULL DEFAULT 'pending',
              file_size INTEGER NULL,
              compressed INTEGER NOT NULL DEFAULT 0,
              created_at TEXT NOT NULL
            );
            ",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_downloads_user ON downloads(user_id);")
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}

#[async_trait]
impl StatsStore for SqliteStatsStore {
    async fn register_user(&self, profile: &UserProfile) -> Result<(), StorageError> {
        sqlx::query(
            r"
            INSERT OR IGNORE INTO users (user_id, username, first_name, last_name, registered_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ",
        )
        .bind(profile.user_id)
        .bind(profile.username.as_deref())
        .bind(profile.first_name.as_deref())
        .bind(profile.last_name.as_deref())
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn log_request(&self, request: &DownloadRequest) -> Result<(), StorageError> {
        sqlx::query(
            r"
            INSERT INTO downloads (id, user_id, url, platform, status, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ",
        )
        .bind(request.id.to_string())
        .bind(request.user_id)
        .bind(&request.url)
        .bind(request.platform.tag())
        .bind(RequestStatus::Pending.as_str())
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_request_status(
        &self,
        id: RequestId,
        status: RequestStatus,
        file_size: Option<u64>,
        compressed: bool,
    ) -> Result<(), StorageError> {
        let file_size = file_size.map(|s| i64::try_from(s).unwrap_or(i64::MAX));
        sqlx::query(
            r"
            UPDATE downloads
            SET status = ?1, compressed = ?2, file_size = COALESCE(?3, file_size)
            WHERE id = ?4
            ",
        )
        .bind(status.as_str())
        .bind(compressed)
        .bind(file_size)
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn user_stats(&self, user_id: i64) -> Result<UserStats, StorageError> {
        let row = sqlx::query(
            r"
            SELECT
              COUNT(*) AS total,
              COALESCE(SUM(CASE WHEN status = 'success' THEN 1 ELSE 0 END), 0) AS success,
              COALESCE(SUM(CASE WHEN status = 'error' THEN 1 ELSE 0 END), 0) AS errors
            FROM downloads WHERE user_id = ?1
            ",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;

        let platforms = sqlx::query(
            r"
            SELECT platform, COUNT(*) AS n
            FROM downloads
            WHERE user_id = ?1 AND status = 'success'
            GROUP BY platform
            ORDER BY n DESC, platform ASC
            ",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        let mut by_platform = Vec::with_capacity(platforms.len());
        for r in platforms {
            by_platform.push((r.try_get::<String, _>("platform")?, r.try_get::<i64, _>("n")?));
        }

        Ok(UserStats {
            total: row.try_get("total")?,
            success: row.try_get("success")?,
            errors: row.try_get("errors")?,
            by_platform,
        })
    }
}
