//! Periodic progress edits of a download's status message.

use super::messaging::{Markup, MessageRef, Messenger};
use super::progress_render::render_progress_text;
use crate::media::{Platform, ProgressFeed};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Handle to a running progress reporter.
///
/// The reporter edits `target` with the rendered progress every poll
/// interval until [`ProgressReporter::finish`] is called.
pub struct ProgressReporter {
    handle: JoinHandle<usize>,
    cancel: CancellationToken,
}

impl ProgressReporter {
    /// Stop the reporter and wait until its last edit has been issued or
    /// abandoned. Returns the number of edits it made.
    pub async fn finish(self) -> usize {
        self.cancel.cancel();
        match self.handle.await {
            Ok(edits) => edits,
            Err(e) => {
                warn!(error = %e, "Progress reporter task failed");
                0
            }
        }
    }
}

/// Spawn a reporter for one download on the Tokio runtime.
pub fn spawn_progress_reporter(
    messenger: Arc<dyn Messenger>,
    target: MessageRef,
    platform: Platform,
    feed: ProgressFeed,
    interval: Duration,
) -> ProgressReporter {
    let cancel = CancellationToken::new();
    let handle = tokio::spawn(run_progress_loop(
        messenger,
        target,
        platform,
        feed,
        interval,
        cancel.clone(),
    ));
    ProgressReporter { handle, cancel }
}

/// Poll `feed` every `interval` and edit `target` when the text changes.
///
/// Ends when `cancel` fires or the producer side of the feed is gone.
/// Edit failures are logged and otherwise ignored.
pub async fn run_progress_loop(
    messenger: Arc<dyn Messenger>,
    target: MessageRef,
    platform: Platform,
    mut feed: ProgressFeed,
    interval: Duration,
    cancel: CancellationToken,
) -> usize {
    let mut last_text: Option<String> = None;
    let mut edits = 0;

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            () = tokio::time::sleep(interval) => {}
        }

        // Extraction returned and dropped its sink
        if feed.has_changed().is_err() {
            break;
        }

        let text = render_progress_text(feed.borrow_and_update().as_ref(), platform);
        if last_text.as_deref() == Some(text.as_str()) {
            continue;
        }

        match messenger.edit_text(target, &text, Markup::None).await {
            Ok(()) => {
                edits += 1;
                last_text = Some(text);
            }
            Err(e) => debug!(error = %e, "Progress edit failed"),
        }
    }

    edits
}
