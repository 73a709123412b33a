//! Pending-decision registry
//!
//! Holds at most one unresolved compression offer per user. While an entry
//! exists, the user's text replies and keyboard callbacks are routed to the
//! decision handler instead of the link pipeline.

use super::messaging::MessageRef;
use super::views::{COMPRESS_CALLBACK_NO, COMPRESS_CALLBACK_YES};
use crate::media::{DownloadRequest, RequestId, TempMedia};
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::debug;

/// Replies accepted as "yes, compress it"
const AFFIRMATIVE: &[&str] = &["да", "yes", "ок", "ok", "давай", "сжать", "сжимай"];

/// An oversized download waiting for the user's answer.
#[derive(Debug)]
pub struct PendingDecision {
    /// Request that produced the file
    pub request: DownloadRequest,
    /// Status message carrying the offer, if one could be sent
    pub status: Option<MessageRef>,
    /// Already-downloaded file, released when the decision is dropped
    pub media: TempMedia,
}

/// The user's answer to a compression offer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Compress and send
    Accept,
    /// Cancel the request
    Decline,
}

impl Decision {
    /// Interpret a free-text reply. Anything not affirmative declines.
    #[must_use]
    pub fn from_text(text: &str) -> Self {
        let text = text.trim().to_lowercase();
        if AFFIRMATIVE.contains(&text.as_str()) {
            Self::Accept
        } else {
            Self::Decline
        }
    }

    /// Interpret inline keyboard callback data
    #[must_use]
    pub fn from_callback(data: &str) -> Option<Self> {
        match data {
            COMPRESS_CALLBACK_YES => Some(Self::Accept),
            COMPRESS_CALLBACK_NO => Some(Self::Decline),
            _ => None,
        }
    }
}

/// Per-user single-slot store of pending decisions
#[derive(Debug, Default)]
pub struct PendingRegistry {
    slots: RwLock<HashMap<i64, PendingDecision>>,
}

impl PendingRegistry {
    /// Create a new empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `decision` for `user_id`, returning the entry it replaced.
    ///
    /// The replaced entry still owns its file; dropping it deletes the file.
    pub async fn put(&self, user_id: i64, decision: PendingDecision) -> Option<PendingDecision> {
        let mut slots = self.slots.write().await;
        let previous = slots.insert(user_id, decision);
        if previous.is_some() {
            debug!(user_id = user_id, "Pending decision superseded");
        }
        previous
    }

    /// Remove and return the entry for `user_id`
    pub async fn take(&self, user_id: i64) -> Option<PendingDecision> {
        let mut slots = self.slots.write().await;
        slots.remove(&user_id)
    }

    /// Point the entry of `user_id` at a new status message, but only while
    /// it still belongs to `request`. Returns whether it was updated.
    pub async fn set_status(&self, user_id: i64, request: RequestId, status: MessageRef) -> bool {
        let mut slots = self.slots.write().await;
        match slots.get_mut(&user_id) {
            Some(entry) if entry.request.id == request => {
                entry.status = Some(status);
                true
            }
            _ => false,
        }
    }

    /// Whether `user_id` has an unresolved offer
    pub async fn has_pending(&self, user_id: i64) -> bool {
        let slots = self.slots.read().await;
        slots.contains_key(&user_id)
    }

    /// Number of unresolved offers
    #[cfg(test)]
    pub async fn len(&self) -> usize {
        self.slots.read().await.len()
    }

    /// Whether no offers are outstanding
    #[cfg(test)]
    pub async fn is_empty(&self) -> bool {
        self.slots.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::Platform;
    use proptest::prelude::*;

    fn decision(user_id: i64, url: &str) -> PendingDecision {
        PendingDecision {
            request: DownloadRequest::new(user_id, user_id, url, Platform::YouTube),
            status: None,
            media: TempMedia::new(format!("/nonexistent/vidrelay/{url}.mp4")),
        }
    }

    #[test]
    fn parses_text_replies() {
        for yes in ["да", " Да ", "YES", "ok", "Ок", "давай", "сжать", "СЖИМАЙ"] {
            assert_eq!(Decision::from_text(yes), Decision::Accept, "{yes}");
        }
        for no in ["нет", "no", "", "да нет", "okay"] {
            assert_eq!(Decision::from_text(no), Decision::Decline, "{no}");
        }
    }

    #[test]
    fn parses_callbacks() {
        assert_eq!(Decision::from_callback("compress:yes"), Some(Decision::Accept));
        assert_eq!(Decision::from_callback("compress:no"), Some(Decision::Decline));
        assert_eq!(Decision::from_callback("other"), None);
    }

    #[tokio::test]
    async fn take_removes_entry() {
        let registry = PendingRegistry::new();
        assert!(registry.put(1, decision(1, "a")).await.is_none());
        assert!(registry.has_pending(1).await);
        assert!(!registry.has_pending(2).await);

        let taken = registry.take(1).await;
        assert_eq!(taken.map(|d| d.request.url), Some("a".to_string()));
        assert!(!registry.has_pending(1).await);
        assert!(registry.take(1).await.is_none());
    }

    #[tokio::test]
    async fn users_do_not_interfere() {
        let registry = PendingRegistry::new();
        registry.put(1, decision(1, "a")).await;
        registry.put(2, decision(2, "b")).await;
        assert_eq!(registry.len().await, 2);

        assert_eq!(registry.take(2).await.map(|d| d.request.url), Some("b".to_string()));
        assert!(registry.has_pending(1).await);
    }

    #[tokio::test]
    async fn set_status_only_touches_the_same_request() {
        let registry = PendingRegistry::new();
        let first = decision(1, "a");
        let first_id = first.request.id;
        registry.put(1, first).await;
        let status = MessageRef {
            chat_id: 1,
            message_id: 7,
        };

        assert!(registry.set_status(1, first_id, status).await);
        assert!(!registry.set_status(2, first_id, status).await);

        // A newer offer must not inherit the old request's status
        registry.put(1, decision(1, "b")).await;
        assert!(!registry.set_status(1, first_id, status).await);
        let current = registry.take(1).await;
        assert_eq!(current.and_then(|d| d.status), None);
    }

    proptest! {
        #[test]
        fn only_latest_put_is_retrievable(urls in proptest::collection::vec("[a-z]{1,6}", 1..8)) {
            let rt = match tokio::runtime::Builder::new_current_thread().build() {
                Ok(rt) => rt,
                Err(e) => panic!("runtime: {e}"),
            };
            rt.block_on(async {
                let registry = PendingRegistry::new();
                let mut superseded = 0;
                for url in &urls {
                    if registry.put(5, decision(5, url)).await.is_some() {
                        superseded += 1;
                    }
                }
                prop_assert_eq!(superseded, urls.len() - 1);

                let taken = registry.take(5).await.map(|d| d.request.url);
                prop_assert_eq!(taken.as_ref(), urls.last());
                prop_assert!(registry.take(5).await.is_none());
                prop_assert!(registry.is_empty().await);
                Ok(())
            })?;
        }
    }
}
