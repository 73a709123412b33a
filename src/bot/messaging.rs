//! Outbound messaging over the resilient transport.
//!
//! The pipeline talks to Telegram only through the [`Messenger`] trait so it
//! can be exercised without a live bot; [`TelegramMessenger`] routes every
//! call through [`ResilientInvoker`].

use super::resilient::ResilientInvoker;
use super::transport::{Connector, TransportError};
use super::views;
use crate::utils;
use async_trait::async_trait;
use std::path::Path;
use teloxide::prelude::*;
use teloxide::types::{ChatId, InputFile, MessageId};
use tracing::debug;

/// Maximum message length for Telegram with safety margin.
/// Telegram's official limit is 4096, but we use 4000 to account for
/// formatting that may be added.
pub const TELEGRAM_MESSAGE_LIMIT: usize = 4000;

const ERROR_NOT_MODIFIED: &str = "message is not modified";

/// Address of a sent message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageRef {
    /// Chat the message lives in
    pub chat_id: i64,
    /// Message id within the chat
    pub message_id: i32,
}

/// Keyboard attached to a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Markup {
    /// No keyboard; an edit removes any existing one
    #[default]
    None,
    /// The compress / cancel offer
    CompressChoice,
}

/// Outbound Bot API calls used by the pipeline.
#[async_trait]
pub trait Messenger: Send + Sync {
    /// Send a text message
    async fn send_text(
        &self,
        chat_id: i64,
        text: &str,
        markup: Markup,
    ) -> Result<MessageRef, TransportError>;

    /// Replace the text (and keyboard) of a message
    async fn edit_text(
        &self,
        target: MessageRef,
        text: &str,
        markup: Markup,
    ) -> Result<(), TransportError>;

    /// Upload a video file
    async fn send_video(&self, chat_id: i64, path: &Path) -> Result<(), TransportError>;
}

/// [`Messenger`] backed by teloxide and the resilient invoker.
pub struct TelegramMessenger<C: Connector<Client = Bot>> {
    invoker: ResilientInvoker<C>,
}

impl<C: Connector<Client = Bot>> TelegramMessenger<C> {
    /// Create a messenger over `invoker`
    #[must_use]
    pub const fn new(invoker: ResilientInvoker<C>) -> Self {
        Self { invoker }
    }
}

fn fit(text: &str) -> String {
    if text.chars().count() > TELEGRAM_MESSAGE_LIMIT {
        format!("{}...", utils::truncate_str(text, TELEGRAM_MESSAGE_LIMIT))
    } else {
        text.to_string()
    }
}

#[async_trait]
impl<C: Connector<Client = Bot>> Messenger for TelegramMessenger<C> {
    async fn send_text(
        &self,
        chat_id: i64,
        text: &str,
        markup: Markup,
    ) -> Result<MessageRef, TransportError> {
        let text = fit(text);
        let msg = self
            .invoker
            .invoke(|bot| {
                let mut req = bot.send_message(ChatId(chat_id), text.clone());
                if let Some(kb) = views::keyboard(markup) {
                    req = req.reply_markup(kb);
                }
                async move { req.await }
            })
            .await?;
        Ok(MessageRef {
            chat_id,
            message_id: msg.id.0,
        })
    }

    async fn edit_text(
        &self,
        target: MessageRef,
        text: &str,
        markup: Markup,
    ) -> Result<(), TransportError> {
        let text = fit(text);
        self.invoker
            .invoke(|bot| {
                let mut req = bot.edit_message_text(
                    ChatId(target.chat_id),
                    MessageId(target.message_id),
                    text.clone(),
                );
                if let Some(kb) = views::keyboard(markup) {
                    req = req.reply_markup(kb);
                }
                async move {
                    match req.await {
                        Ok(_) => Ok(()),
                        // Same text twice is not a transport failure
                        Err(e) if e.to_string().contains(ERROR_NOT_MODIFIED) => {
                            debug!("Message update skipped: {e}");
                            Ok(())
                        }
                        Err(e) => Err(e),
                    }
                }
            })
            .await
    }

    async fn send_video(&self, chat_id: i64, path: &Path) -> Result<(), TransportError> {
        self.invoker
            .invoke(|bot| {
                let req = bot
                    .send_video(ChatId(chat_id), InputFile::file(path.to_path_buf()))
                    .supports_streaming(true);
                async move { req.await.map(|_| ()) }
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn long_text_is_truncated() {
        let text = "a".repeat(TELEGRAM_MESSAGE_LIMIT + 10);
        let fitted = fit(&text);
        assert_eq!(fitted.chars().count(), TELEGRAM_MESSAGE_LIMIT + 3);
        assert!(fitted.ends_with("..."));
        assert_eq!(fit("short"), "short");
    }
}
