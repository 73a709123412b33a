//! Telegram update routing.
//!
//! Commands always go to the command handler. Other text goes to the
//! decision handler while the sender has an open compression offer, and
//! to the link pipeline otherwise. Pipeline runs are spawned so the
//! dispatcher keeps serving other updates.

use super::messaging::{Markup, Messenger};
use super::pending::Decision;
use super::resilient::ResilientInvoker;
use super::transport::TelegramConnector;
use super::views;
use crate::pipeline::{Inbound, Pipeline};
use crate::storage::{StatsStore, UserProfile};
use anyhow::Result;
use std::sync::Arc;
use teloxide::dispatching::UpdateHandler;
use teloxide::prelude::*;
use teloxide::types::{CallbackQuery, User};
use teloxide::utils::command::BotCommands;
use tracing::{debug, error, info, warn};

/// Supported commands for the bot
#[derive(BotCommands, Clone, Debug, PartialEq, Eq)]
#[command(rename_rule = "lowercase", description = "Поддерживаемые команды:")]
pub enum Command {
    /// Register and show the welcome message
    #[command(description = "начать работу.")]
    Start,
    /// Explain how to use the bot
    #[command(description = "как пользоваться ботом.")]
    Help,
    /// Show the user's download statistics
    #[command(description = "твоя статистика.")]
    Stats,
}

/// Shared state injected into every endpoint.
pub struct App {
    /// Link pipeline
    pub pipeline: Arc<Pipeline>,
    /// Statistics store
    pub stats: Arc<dyn StatsStore>,
    /// Outbound messaging
    pub messenger: Arc<dyn Messenger>,
    /// Invoker for calls outside the [`Messenger`] surface
    pub invoker: ResilientInvoker<TelegramConnector>,
}

/// Safe extraction of user ID from a message.
/// Returns 0 if the user information is missing.
#[must_use]
pub fn get_user_id_safe(msg: &Message) -> i64 {
    msg.from.as_ref().map_or(0, |u| u.id.0.cast_signed())
}

fn profile_of(user: Option<&User>) -> UserProfile {
    user.map_or_else(UserProfile::default, |u| UserProfile {
        user_id: u.id.0.cast_signed(),
        username: u.username.clone(),
        first_name: Some(u.first_name.clone()).filter(|s| !s.is_empty()),
        last_name: u.last_name.clone(),
    })
}

/// Build the dispatcher schema.
#[must_use]
pub fn schema() -> UpdateHandler<teloxide::RequestError> {
    dptree::entry()
        .branch(Update::filter_callback_query().endpoint(handle_callback))
        .branch(
            Update::filter_message()
                .branch(
                    dptree::entry()
                        .filter_command::<Command>()
                        .endpoint(handle_command),
                )
                .branch(
                    dptree::filter(|msg: Message| msg.text().is_some())
                        .branch(
                            dptree::filter_async(|msg: Message, app: Arc<App>| async move {
                                app.pipeline
                                    .pending()
                                    .has_pending(get_user_id_safe(&msg))
                                    .await
                            })
                            .endpoint(handle_decision_text),
                        )
                        .branch(dptree::endpoint(handle_link)),
                ),
        )
}

async fn handle_command(
    msg: Message,
    cmd: Command,
    app: Arc<App>,
) -> Result<(), teloxide::RequestError> {
    let res = match cmd {
        Command::Start => start(&msg, &app).await,
        Command::Help => help(&msg, &app).await,
        Command::Stats => stats(&msg, &app).await,
    };
    if let Err(e) = res {
        error!("Command error: {}", e);
    }
    respond(())
}

/// `/start`: register the user and greet them.
///
/// # Errors
///
/// Returns an error if the welcome message cannot be sent.
pub async fn start(msg: &Message, app: &App) -> Result<()> {
    let profile = profile_of(msg.from.as_ref());
    info!(user_id = profile.user_id, "User started the bot");
    if let Err(e) = app.stats.register_user(&profile).await {
        warn!(user_id = profile.user_id, error = %e, "Failed to register user");
    }
    app.messenger
        .send_text(msg.chat.id.0, views::WELCOME, Markup::None)
        .await?;
    Ok(())
}

/// `/help`
///
/// # Errors
///
/// Returns an error if the message cannot be sent.
pub async fn help(msg: &Message, app: &App) -> Result<()> {
    app.messenger
        .send_text(msg.chat.id.0, views::HELP, Markup::None)
        .await?;
    Ok(())
}

/// `/stats`: show the user's totals and per-platform counts.
///
/// # Errors
///
/// Returns an error if the reply cannot be sent.
pub async fn stats(msg: &Message, app: &App) -> Result<()> {
    let user_id = get_user_id_safe(msg);
    let text = match app.stats.user_stats(user_id).await {
        Ok(stats) => views::stats(&stats),
        Err(e) => {
            warn!(user_id = user_id, error = %e, "Failed to load statistics");
            views::STATS_UNAVAILABLE.to_string()
        }
    };
    app.messenger
        .send_text(msg.chat.id.0, &text, Markup::None)
        .await?;
    Ok(())
}

async fn handle_link(msg: Message, app: Arc<App>) -> Result<(), teloxide::RequestError> {
    let Some(text) = msg.text() else {
        return respond(());
    };
    let inbound = Inbound {
        profile: profile_of(msg.from.as_ref()),
        chat_id: msg.chat.id.0,
        text: text.to_string(),
    };

    let pipeline = Arc::clone(&app.pipeline);
    tokio::spawn(async move {
        let outcome = pipeline.handle_link(inbound).await;
        debug!(outcome = ?outcome, "Link handled");
    });
    respond(())
}

async fn handle_decision_text(msg: Message, app: Arc<App>) -> Result<(), teloxide::RequestError> {
    let decision = Decision::from_text(msg.text().unwrap_or_default());
    spawn_decision(&app, get_user_id_safe(&msg), msg.chat.id.0, decision);
    respond(())
}

async fn handle_callback(q: CallbackQuery, app: Arc<App>) -> Result<(), teloxide::RequestError> {
    let callback_id = q.id.clone();
    if let Err(e) = app
        .invoker
        .invoke(|bot| {
            let req = bot.answer_callback_query(callback_id.clone());
            async move { req.await }
        })
        .await
    {
        debug!(error = %e, "Failed to answer callback query");
    }

    let Some(decision) = q.data.as_deref().and_then(Decision::from_callback) else {
        debug!(data = ?q.data, "Ignoring unknown callback");
        return respond(());
    };
    let user_id = q.from.id.0.cast_signed();
    let chat_id = q.message.as_ref().map_or(user_id, |m| m.chat().id.0);
    spawn_decision(&app, user_id, chat_id, decision);
    respond(())
}

fn spawn_decision(app: &Arc<App>, user_id: i64, chat_id: i64, decision: Decision) {
    let pipeline = Arc::clone(&app.pipeline);
    tokio::spawn(async move {
        let outcome = pipeline.resolve_decision(user_id, chat_id, decision).await;
        debug!(user_id = user_id, outcome = ?outcome, "Decision handled");
    });
}
