//! Progress snapshots and the watch channel between extractor and reporter.
//!
//! The extractor publishes and the reporter reads the latest value.
//! Dropping the sink resets the feed to `None` and closes it.

use chrono::{DateTime, Utc};
use tokio::sync::watch;

/// Phase of an extraction reported by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressStatus {
    /// Bytes are being transferred
    Downloading,
    /// Transfer finished, the engine is merging / remuxing
    Processing,
}

/// Latest known state of one extraction.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressSnapshot {
    /// Percent complete, 0–100
    pub percent: f64,
    /// Bytes downloaded so far
    pub downloaded: u64,
    /// Total bytes, 0 if unknown
    pub total: u64,
    /// Instantaneous speed in bytes per second, 0 if unknown
    pub speed: f64,
    /// Estimated seconds remaining, 0 if unknown
    pub eta: u64,
    /// Current phase
    pub status: ProgressStatus,
    /// When the snapshot was produced
    pub updated_at: DateTime<Utc>,
}

impl ProgressSnapshot {
    /// Snapshot for an in-flight transfer
    #[must_use]
    pub fn downloading(downloaded: u64, total: Option<u64>, speed: Option<f64>, eta: Option<u64>) -> Self {
        let total = total.unwrap_or(0);
        #[allow(clippy::cast_precision_loss)]
        let percent = if total > 0 {
            (downloaded as f64 / total as f64 * 100.0).min(100.0)
        } else {
            0.0
        };
        Self {
            percent,
            downloaded,
            total,
            speed: speed.unwrap_or(0.0),
            eta: eta.unwrap_or(0),
            status: ProgressStatus::Downloading,
            updated_at: Utc::now(),
        }
    }

    /// Snapshot emitted once the transfer finished
    #[must_use]
    pub fn processing() -> Self {
        Self {
            percent: 100.0,
            downloaded: 0,
            total: 0,
            speed: 0.0,
            eta: 0,
            status: ProgressStatus::Processing,
            updated_at: Utc::now(),
        }
    }
}

/// Consumer side of a per-request progress channel.
pub type ProgressFeed = watch::Receiver<Option<ProgressSnapshot>>;

/// Producer side of a per-request progress channel.
///
/// Each publish overwrites the previous snapshot. Dropping the sink clears
/// the snapshot and closes the channel, so nothing outlives the extraction
/// call that owned it.
#[derive(Debug)]
pub struct ProgressSink {
    tx: watch::Sender<Option<ProgressSnapshot>>,
}

/// Create a fresh progress channel for one extraction.
#[must_use]
pub fn progress_channel() -> (ProgressSink, ProgressFeed) {
    let (tx, rx) = watch::channel(None);
    (ProgressSink { tx }, rx)
}

impl ProgressSink {
    /// Overwrite the current snapshot
    pub fn publish(&self, snapshot: ProgressSnapshot) {
        self.tx.send_replace(Some(snapshot));
    }

    /// Signal that the transfer finished and post-processing started
    pub fn finished(&self) {
        self.publish(ProgressSnapshot::processing());
    }
}

impl Drop for ProgressSink {
    fn drop(&mut self) {
        self.tx.send_replace(None);
    }
}
