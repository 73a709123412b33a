//! SQLite statistics store against a real database file.

use vidrelay::media::{DownloadRequest, Platform};
use vidrelay::storage::{
    RequestStatus, SqliteStatsStore, StatsStore, StorageError, UserProfile,
};

fn profile(user_id: i64) -> UserProfile {
    UserProfile {
        user_id,
        username: Some(format!("user{user_id}")),
        first_name: Some("Test".to_string()),
        last_name: None,
    }
}

#[tokio::test]
async fn records_outcomes_per_platform() -> Result<(), StorageError> {
    let dir = tempfile::tempdir()?;
    let store = SqliteStatsStore::open(&dir.path().join("nested").join("bot.db")).await?;

    store.register_user(&profile(1)).await?;
    // Registering twice is harmless
    store.register_user(&profile(1)).await?;

    let outcomes = [
        (Platform::YouTube, RequestStatus::Success),
        (Platform::YouTube, RequestStatus::Success),
        (Platform::TikTok, RequestStatus::Success),
        (Platform::Instagram, RequestStatus::Error),
        (Platform::YouTube, RequestStatus::Cancelled),
    ];
    for (platform, status) in outcomes {
        let request = DownloadRequest::new(1, 1, "https://example/v", platform);
        store.log_request(&request).await?;
        store
            .update_request_status(request.id, status, Some(1024), false)
            .await?;
    }

    // A request still in flight counts toward the total only
    let open = DownloadRequest::new(1, 1, "https://youtu.be/open", Platform::YouTube);
    store.log_request(&open).await?;

    let stats = store.user_stats(1).await?;
    assert_eq!(stats.total, 6);
    assert_eq!(stats.success, 3);
    assert_eq!(stats.errors, 1);
    assert_eq!(
        stats.by_platform,
        vec![("youtube".to_string(), 2), ("tiktok".to_string(), 1)]
    );
    Ok(())
}

#[tokio::test]
async fn users_are_isolated() -> Result<(), StorageError> {
    let store = SqliteStatsStore::in_memory().await?;
    let a = DownloadRequest::new(1, 1, "https://youtu.be/a", Platform::YouTube);
    let b = DownloadRequest::new(2, 2, "https://youtu.be/b", Platform::YouTube);
    store.log_request(&a).await?;
    store.log_request(&b).await?;
    store
        .update_request_status(a.id, RequestStatus::Success, Some(10), true)
        .await?;

    assert_eq!(store.user_stats(1).await?.success, 1);
    let other = store.user_stats(2).await?;
    assert_eq!(other.total, 1);
    assert_eq!(other.success, 0);
    Ok(())
}

#[tokio::test]
async fn reopening_keeps_data() -> Result<(), StorageError> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("bot.db");
    {
        let store = SqliteStatsStore::open(&path).await?;
        let request = DownloadRequest::new(7, 7, "https://vm.tiktok.com/x", Platform::TikTok);
        store.log_request(&request).await?;
    }
    let store = SqliteStatsStore::open(&path).await?;
    assert_eq!(store.user_stats(7).await?.total, 1);
    Ok(())
}
