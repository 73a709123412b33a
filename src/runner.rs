//! Startup and serving loop.
//!
//! Connects through the first reachable transport path, then polls for
//! updates until polling breaks down. A watchdog on the update listener
//! stops the dispatcher after repeated polling errors and the supervisor
//! decides whether and when to reconnect. One Ctrl-C listener cancels a
//! shared token that every wait, connect and serving session observes.

use crate::bot::handlers::{schema, App};
use crate::bot::messaging::{Messenger, TelegramMessenger};
use crate::bot::pending::PendingRegistry;
use crate::bot::resilient::ResilientInvoker;
use crate::bot::supervisor::{Directive, LinkEvent, LinkState, Supervisor};
use crate::bot::transport::{PathId, TelegramConnector, TransportSelector};
use crate::config::{
    Settings, POLLING_ERROR_THRESHOLD, POLLING_ERROR_WINDOW, POLLING_REQUEST_TIMEOUT,
};
use crate::media::{FfmpegTranscoder, YtDlpExtractor};
use crate::pipeline::Pipeline;
use crate::storage::{SqliteStatsStore, StatsStore};
use anyhow::{anyhow, Context, Result};
use std::collections::VecDeque;
use std::fmt::Debug;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use teloxide::dispatching::ShutdownToken;
use teloxide::error_handlers::ErrorHandler;
use teloxide::prelude::*;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Sliding window of polling errors.
#[derive(Debug)]
pub struct ErrorWindow {
    threshold: u32,
    window: Duration,
    hits: VecDeque<Instant>,
}

impl ErrorWindow {
    /// Trip after `threshold` errors within `window`
    #[must_use]
    pub const fn new(threshold: u32, window: Duration) -> Self {
        Self {
            threshold,
            window,
            hits: VecDeque::new(),
        }
    }

    /// Widen the window so `threshold` requests that each fail only at
    /// `request_timeout` still land inside it.
    #[must_use]
    pub fn covering(mut self, request_timeout: Duration) -> Self {
        self.window = self.window.max(request_timeout * self.threshold);
        self
    }

    /// Record an error at `now`; returns `true` once the threshold is reached.
    pub fn record(&mut self, now: Instant) -> bool {
        while let Some(first) = self.hits.front() {
            if now.saturating_duration_since(*first) > self.window {
                self.hits.pop_front();
            } else {
                break;
            }
        }
        self.hits.push_back(now);
        self.hits.len() >= self.threshold as usize
    }
}

/// Update-listener error handler that stops the dispatcher when polling
/// keeps failing.
pub struct PollingWatchdog {
    errors: Mutex<ErrorWindow>,
    token: ShutdownToken,
    tripped: AtomicBool,
}

impl PollingWatchdog {
    fn new(token: ShutdownToken) -> Self {
        Self {
            errors: Mutex::new(
                ErrorWindow::new(POLLING_ERROR_THRESHOLD, POLLING_ERROR_WINDOW)
                    .covering(POLLING_REQUEST_TIMEOUT),
            ),
            token,
            tripped: AtomicBool::new(false),
        }
    }

    fn tripped(&self) -> bool {
        self.tripped.load(Ordering::SeqCst)
    }
}

impl<E: Debug + Send + 'static> ErrorHandler<E> for PollingWatchdog {
    fn handle_error(self: Arc<Self>, error: E) -> Pin<Box<dyn Future<Output = ()> + Send>> {
        Box::pin(async move {
            warn!(error = ?error, "Polling error");
            let trip = {
                let mut errors = match self.errors.lock() {
                    Ok(guard) => guard,
                    Err(poisoned) => poisoned.into_inner(),
                };
                errors.record(Instant::now())
            };
            if trip && !self.tripped.swap(true, Ordering::SeqCst) {
                error!("Too many polling errors, stopping dispatcher");
                // The dispatcher is waiting on this handler; don't await here
                let token = self.token.clone();
                tokio::spawn(async move {
                    match token.shutdown() {
                        Ok(done) => done.await,
                        Err(e) => debug!(error = %e, "Dispatcher already idle"),
                    }
                });
            }
        })
    }
}

/// Why one serving session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionEnd {
    PollingFailed,
    Stopped,
}

type Invoker = ResilientInvoker<TelegramConnector>;

/// Run the bot until it is stopped or loses connectivity for good.
///
/// # Errors
///
/// Returns an error if no transport path is reachable at startup, if the
/// reconnect budget runs out, or if local resources cannot be prepared.
pub async fn run_bot(settings: Arc<Settings>) -> Result<()> {
    tokio::fs::create_dir_all(&settings.downloads_dir)
        .await
        .with_context(|| {
            format!(
                "Failed to create downloads directory {}",
                settings.downloads_dir.display()
            )
        })?;

    let stats: Arc<dyn StatsStore> = Arc::new(
        SqliteStatsStore::open(&settings.database_path)
            .await
            .context("Failed to open statistics database")?,
    );

    let selector = Arc::new(TransportSelector::new(
        TelegramConnector::new(settings.telegram_bot_token.clone()),
        Arc::clone(&settings),
    ));
    let invoker = ResilientInvoker::new(selector);
    let app = Arc::new(build_app(&settings, &invoker, stats));

    let shutdown = CancellationToken::new();
    let interrupt = tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    info!("Ctrl-C received, shutting down");
                    shutdown.cancel();
                }
                Err(e) => warn!(error = %e, "Failed to listen for Ctrl-C"),
            }
        }
    });

    let mut supervisor = Supervisor::new(settings.max_reconnect_attempts);
    let first = or_shutdown(&shutdown, connect(&invoker)).await;
    let mut directive = supervisor.on_event(first.unwrap_or(LinkEvent::Shutdown));

    loop {
        let event = match directive {
            Directive::Stop => break,
            Directive::Reconnect => or_shutdown(&shutdown, connect(&invoker)).await,
            Directive::Retry(delay) => {
                or_shutdown(&shutdown, async {
                    tokio::time::sleep(delay).await;
                    connect(&invoker).await
                })
                .await
            }
            Directive::Serve { path, after } => {
                match or_shutdown(&shutdown, tokio::time::sleep(after)).await {
                    Some(()) => Some(serve(&invoker, path, Arc::clone(&app), &shutdown).await),
                    None => None,
                }
            }
        };
        directive = supervisor.on_event(event.unwrap_or(LinkEvent::Shutdown));
    }
    interrupt.abort();

    match supervisor.state() {
        LinkState::Fatal => Err(anyhow!("No transport path to Telegram is reachable")),
        LinkState::GaveUp => Err(anyhow!("Lost connectivity to Telegram, giving up")),
        state => {
            info!(state = ?state, "Bot stopped");
            Ok(())
        }
    }
}

fn build_app(settings: &Settings, invoker: &Invoker, stats: Arc<dyn StatsStore>) -> App {
    let messenger: Arc<dyn Messenger> = Arc::new(TelegramMessenger::new(invoker.clone()));
    let pipeline = Pipeline::new(
        Arc::clone(&messenger),
        Arc::new(YtDlpExtractor::new(
            settings.ytdlp_bin.clone(),
            settings.downloads_dir.clone(),
        )),
        Arc::new(FfmpegTranscoder::new(
            settings.ffmpeg_bin.clone(),
            settings.compress_timeout(),
        )),
        Arc::clone(&stats),
        Arc::new(PendingRegistry::new()),
    );
    App {
        pipeline: Arc::new(pipeline),
        stats,
        messenger,
        invoker: invoker.clone(),
    }
}

async fn connect(invoker: &Invoker) -> LinkEvent {
    match invoker.connect().await {
        Ok(path) => LinkEvent::Connected(path.id),
        Err(e) => {
            warn!(error = %e, "Connect failed");
            LinkEvent::ConnectFailed
        }
    }
}

/// Run `fut` unless shutdown is requested first; `None` means shutdown won.
async fn or_shutdown<F: Future>(shutdown: &CancellationToken, fut: F) -> Option<F::Output> {
    tokio::select! {
        biased;
        () = shutdown.cancelled() => None,
        out = fut => Some(out),
    }
}

async fn serve(
    invoker: &Invoker,
    path: PathId,
    app: Arc<App>,
    shutdown: &CancellationToken,
) -> LinkEvent {
    let selector = invoker.selector();
    let Some(active) = selector.build_chain().into_iter().find(|p| p.id == path) else {
        warn!(path = %path, "Active path vanished from the chain");
        return LinkEvent::PollingFailed;
    };
    let bot = match selector.connector().polling_client(&active) {
        Ok(bot) => bot,
        Err(e) => {
            warn!(path = %path, error = %e, "Failed to build polling client");
            return LinkEvent::PollingFailed;
        }
    };

    match serve_session(bot, app, shutdown).await {
        SessionEnd::PollingFailed => LinkEvent::PollingFailed,
        SessionEnd::Stopped => LinkEvent::Shutdown,
    }
}

async fn serve_session(bot: Bot, app: Arc<App>, shutdown: &CancellationToken) -> SessionEnd {
    let mut dispatcher = Dispatcher::builder(bot.clone(), schema())
        .dependencies(dptree::deps![app])
        .default_handler(|upd| async move {
            debug!(update_id = ?upd.id, "Unhandled update");
        })
        .build();

    let token = dispatcher.shutdown_token();
    let watchdog = Arc::new(PollingWatchdog::new(token.clone()));

    let stopper = tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            shutdown.cancelled().await;
            // shutdown() refuses while the dispatcher has not started yet
            loop {
                match token.shutdown() {
                    Ok(done) => break done.await,
                    Err(_) => tokio::time::sleep(Duration::from_millis(100)).await,
                }
            }
        }
    });

    let Some(listener) = or_shutdown(
        shutdown,
        teloxide::update_listeners::polling_default(bot),
    )
    .await
    else {
        stopper.abort();
        return SessionEnd::Stopped;
    };
    info!("Bot is running...");
    dispatcher
        .dispatch_with_listener(listener, Arc::clone(&watchdog))
        .await;
    stopper.abort();

    if !shutdown.is_cancelled() && watchdog.tripped() {
        SessionEnd::PollingFailed
    } else {
        SessionEnd::Stopped
    }
}
