//! Per-request pipeline: extract, check size, optionally compress after the
//! user agrees, deliver, and clean up.
//!
//! Every temporary file is owned by a [`TempMedia`] and discarded on each
//! exit path, so a run never leaks media regardless of where it ends. Every
//! logged request gets exactly one final status update and the user gets
//! exactly one terminal message.

use crate::bot::messaging::{Markup, MessageRef, Messenger};
use crate::bot::pending::{Decision, PendingDecision, PendingRegistry};
use crate::bot::progress_reporter::spawn_progress_reporter;
use crate::bot::views;
use crate::config::{MAX_FILE_SIZE, PROGRESS_POLL_INTERVAL};
use crate::media::{
    progress_channel, DownloadRequest, ExtractionError, Extractor, Platform, TempMedia,
    Transcoder,
};
use crate::storage::{RequestStatus, StatsStore, UserProfile};
use crate::utils::extract_url;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};


/// One inbound text message
#[derive(Debug, Clone)]
pub struct Inbound {
    /// Sender
    pub profile: UserProfile,
    /// Chat to answer in
    pub chat_id: i64,
    /// Message text
    pub text: String,
}

/// Terminal (or parking) state a pipeline step ended in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// No link in the message
    NoLink,
    /// Link to an unsupported site
    PlatformRejected,
    /// The engine could not produce a file
    ExtractFailed,
    /// Oversized file parked until the user decides
    AwaitingDecision,
    /// User declined compression
    Declined,
    /// Decision arrived for an offer that no longer exists
    Expired,
    /// Transcoder failed or produced nothing
    CompressFailed,
    /// Compressed copy is still too large
    CompressedSizeExceeded,
    /// Video sent
    Delivered {
        /// Whether the sent file was a compressed copy
        compressed: bool,
    },
    /// Upload failed
    DeliverFailed,
}

/// Orchestrates one request from link to delivered video.
pub struct Pipeline {
    messenger: Arc<dyn Messenger>,
    extractor: Arc<dyn Extractor>,
    transcoder: Arc<dyn Transcoder>,
    stats: Arc<dyn StatsStore>,
    pending: Arc<PendingRegistry>,
    max_file_size: u64,
    progress_interval: Duration,
}

impl Pipeline {
    /// Create a pipeline with the default size limit and poll interval
    #[must_use]
    pub fn new(
        messenger: Arc<dyn Messenger>,
        extractor: Arc<dyn Extractor>,
        transcoder: Arc<dyn Transcoder>,
        stats: Arc<dyn StatsStore>,
        pending: Arc<PendingRegistry>,
    ) -> Self {
        Self {
            messenger,
            extractor,
            transcoder,
            stats,
            pending,
            max_file_size: MAX_FILE_SIZE,
            progress_interval: PROGRESS_POLL_INTERVAL,
        }
    }

    /// Override the progress poll interval
    #[must_use]
    pub const fn with_progress_interval(mut self, interval: Duration) -> Self {
        self.progress_interval = interval;
        self
    }

    /// Registry of outstanding compression offers
    #[must_use]
    pub fn pending(&self) -> &PendingRegistry {
        &self.pending
    }

    /// Handle a message that may contain a link.
    pub async fn handle_link(&self, inbound: Inbound) -> Outcome {
        let chat_id = inbound.chat_id;
        self.register(&inbound.profile).await;

        let Some(url) = extract_url(&inbound.text) else {
            self.reply(chat_id, views::NO_LINK).await;
            return Outcome::NoLink;
        };
        let Some(platform) = Platform::detect(url) else {
            self.reply(chat_id, views::UNSUPPORTED_PLATFORM).await;
            return Outcome::PlatformRejected;
        };

        let request = DownloadRequest::new(inbound.profile.user_id, chat_id, url, platform);
        let status = match self
            .messenger
            .send_text(chat_id, &views::downloading_from(platform), Markup::None)
            .await
        {
            Ok(msg) => Some(msg),
            Err(e) => {
                warn!(request_id = %request.id, error = %e, "Failed to send status message");
                None
            }
        };

        if let Err(e) = self.stats.log_request(&request).await {
            warn!(request_id = %request.id, error = %e, "Failed to log request");
        }
        info!(
            request_id = %request.id,
            user_id = request.user_id,
            platform = %platform,
            "Processing request"
        );

        let media = match self.extract(&request, status).await {
            Ok(media) => media,
            Err(e) => {
                error!(request_id = %request.id, error = %e, "Extraction failed");
                self.finish(&request, RequestStatus::Error, None, false).await;
                self.notify(chat_id, status, &views::extraction_failed(&e), Markup::None)
                    .await;
                return Outcome::ExtractFailed;
            }
        };

        let size = match media.size().await {
            Ok(size) => size,
            Err(e) => {
                error!(request_id = %request.id, error = %e, "Extracted file is unreadable");
                media.discard();
                self.finish(&request, RequestStatus::Error, None, false).await;
                let failure = ExtractionError::Unknown(e.to_string());
                self.notify(chat_id, status, &views::extraction_failed(&failure), Markup::None)
                    .await;
                return Outcome::ExtractFailed;
            }
        };

        if size > self.max_file_size {
            return self.offer_compression(request, status, media, size).await;
        }
        self.deliver(&request, status, media, size, false).await
    }

    /// Resolve the user's outstanding compression offer.
    pub async fn resolve_decision(&self, user_id: i64, chat_id: i64, decision: Decision) -> Outcome {
        let Some(pending) = self.pending.take(user_id).await else {
            debug!(user_id = user_id, "Decision for an offer that no longer exists");
            self.reply(chat_id, views::REQUEST_EXPIRED).await;
            return Outcome::Expired;
        };
        let PendingDecision {
            request,
            status,
            media,
        } = pending;

        match decision {
            Decision::Decline => {
                info!(request_id = %request.id, "Compression declined");
                media.discard();
                self.finish(&request, RequestStatus::Cancelled, None, false)
                    .await;
                self.notify(request.chat_id, status, views::DECLINED, Markup::None)
                    .await;
                Outcome::Declined
            }
            Decision::Accept => self.compress_and_deliver(request, status, media).await,
        }
    }

    /// Run the extractor with a progress reporter attached to `status`.
    async fn extract(
        &self,
        request: &DownloadRequest,
        status: Option<MessageRef>,
    ) -> Result<TempMedia, ExtractionError> {
        let (sink, feed) = progress_channel();
        let reporter = status.map(|target| {
            spawn_progress_reporter(
                Arc::clone(&self.messenger),
                target,
                request.platform,
                feed,
                self.progress_interval,
            )
        });

        let result = self.extractor.extract(request, sink).await;

        // No progress edit may land after the next status edit
        if let Some(reporter) = reporter {
            let edits = reporter.finish().await;
            debug!(request_id = %request.id, edits = edits, "Progress reporter stopped");
        }
        result.map(|extracted| extracted.file)
    }

    async fn offer_compression(
        &self,
        request: DownloadRequest,
        status: Option<MessageRef>,
        media: TempMedia,
        size: u64,
    ) -> Outcome {
        info!(request_id = %request.id, size = size, "File exceeds size limit, offering compression");
        let user_id = request.user_id;
        let request_id = request.id;
        let chat_id = request.chat_id;
        // The offer is registered before its keyboard is shown
        let superseded = self
            .pending
            .put(
                user_id,
                PendingDecision {
                    request,
                    status,
                    media,
                },
            )
            .await;

        if let Some(old) = superseded {
            info!(request_id = %old.request.id, "Earlier offer superseded");
            old.media.discard();
            self.finish(&old.request, RequestStatus::Cancelled, None, false)
                .await;
            if let Some(target) = old.status {
                if let Err(e) = self
                    .messenger
                    .edit_text(target, views::REQUEST_EXPIRED, Markup::None)
                    .await
                {
                    debug!(error = %e, "Failed to retire superseded offer");
                }
            }
        }

        let shown = self
            .notify(
                chat_id,
                status,
                &views::too_large_offer(size),
                Markup::CompressChoice,
            )
            .await;
        if let Some(shown) = shown {
            if status != Some(shown) && !self.pending.set_status(user_id, request_id, shown).await {
                debug!(request_id = %request_id, "Offer resolved before its message was recorded");
            }
        }
        Outcome::AwaitingDecision
    }

    async fn compress_and_deliver(
        &self,
        request: DownloadRequest,
        status: Option<MessageRef>,
        media: TempMedia,
    ) -> Outcome {
        let chat_id = request.chat_id;
        let status = self
            .notify(chat_id, status, views::COMPRESSING, Markup::None)
            .await;

        let result = self.transcoder.compress(media.path()).await;
        let scratch = media.scratch_dir().map(Path::to_path_buf);
        // The original is gone whatever the transcoder did
        media.discard();

        let output = match result {
            Ok(path) => {
                let output = TempMedia::new(path);
                match scratch {
                    Some(dir) => output.with_scratch_dir(dir),
                    None => output,
                }
            }
            Err(e) => {
                warn!(request_id = %request.id, error = %e, "Compression failed");
                self.finish(&request, RequestStatus::Error, None, false).await;
                self.notify(chat_id, status, views::compression_failed(&e), Markup::None)
                    .await;
                return Outcome::CompressFailed;
            }
        };

        let size = match output.size().await {
            Ok(size) => size,
            Err(e) => {
                warn!(request_id = %request.id, error = %e, "Compressed file is unreadable");
                output.discard();
                self.finish(&request, RequestStatus::Error, None, true).await;
                self.notify(chat_id, status, views::COMPRESS_FAILED, Markup::None)
                    .await;
                return Outcome::CompressFailed;
            }
        };

        if size > self.max_file_size {
            info!(request_id = %request.id, size = size, "Still too large after compression");
            output.discard();
            self.finish(&request, RequestStatus::Error, Some(size), true)
                .await;
            self.notify(chat_id, status, views::STILL_TOO_LARGE, Markup::None)
                .await;
            return Outcome::CompressedSizeExceeded;
        }

        self.deliver(&request, status, output, size, true).await
    }

    async fn deliver(
        &self,
        request: &DownloadRequest,
        status: Option<MessageRef>,
        media: TempMedia,
        size: u64,
        compressed: bool,
    ) -> Outcome {
        let sent = self
            .messenger
            .send_video(request.chat_id, media.path())
            .await;
        media.discard();

        match sent {
            Ok(()) => {
                info!(request_id = %request.id, size = size, compressed = compressed, "Video delivered");
                self.finish(request, RequestStatus::Success, Some(size), compressed)
                    .await;
                let text = if compressed {
                    views::DONE_COMPRESSED
                } else {
                    views::DONE
                };
                self.notify(request.chat_id, status, text, Markup::None)
                    .await;
                Outcome::Delivered { compressed }
            }
            Err(e) => {
                error!(request_id = %request.id, error = %e, "Failed to send video");
                self.finish(request, RequestStatus::Error, Some(size), compressed)
                    .await;
                self.notify(request.chat_id, status, views::SEND_FAILED, Markup::None)
                    .await;
                Outcome::DeliverFailed
            }
        }
    }

    async fn register(&self, profile: &UserProfile) {
        if let Err(e) = self.stats.register_user(profile).await {
            warn!(user_id = profile.user_id, error = %e, "Failed to register user");
        }
    }

    async fn finish(
        &self,
        request: &DownloadRequest,
        status: RequestStatus,
        size: Option<u64>,
        compressed: bool,
    ) {
        if let Err(e) = self
            .stats
            .update_request_status(request.id, status, size, compressed)
            .await
        {
            warn!(request_id = %request.id, error = %e, "Failed to record request status");
        }
    }

    async fn reply(&self, chat_id: i64, text: &str) {
        if let Err(e) = self.messenger.send_text(chat_id, text, Markup::None).await {
            warn!(chat_id = chat_id, error = %e, "Failed to send reply");
        }
    }

    /// Show `text` in the status message, or in a new message if there is
    /// none or it cannot be edited. Returns the message now showing it.
    async fn notify(
        &self,
        chat_id: i64,
        status: Option<MessageRef>,
        text: &str,
        markup: Markup,
    ) -> Option<MessageRef> {
        if let Some(target) = status {
            match self.messenger.edit_text(target, text, markup).await {
                Ok(()) => return Some(target),
                Err(e) => debug!(error = %e, "Status edit failed, sending a new message"),
            }
        }
        match self.messenger.send_text(chat_id, text, markup).await {
            Ok(msg) => Some(msg),
            Err(e) => {
                warn!(chat_id = chat_id, error = %e, "Failed to notify user");
                None
            }
        }
    }
}
