//! Reconnect supervisor
//!
//! A pure state machine deciding what the serving loop does after each
//! connectivity event. Keeping it free of I/O makes the fatal-vs-retry
//! policy testable on its own.

use super::transport::PathId;
use crate::config::{RECONNECT_LONG_DELAY, RECONNECT_SHORT_DELAY};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Connectivity state of the bot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// Before the first successful connect
    Starting,
    /// Polling through the given path
    Serving(PathId),
    /// Polling failed; `failures` reconnect attempts have failed so far
    Reconnecting {
        /// Failed reconnect attempts since polling stopped
        failures: u32,
    },
    /// No path reachable at startup
    Fatal,
    /// Reconnect budget exhausted
    GaveUp,
    /// Shut down on request
    Stopped,
}

impl LinkState {
    /// Whether the loop has ended
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Fatal | Self::GaveUp | Self::Stopped)
    }
}

/// Something that happened to the connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkEvent {
    /// A connect attempt found a working path
    Connected(PathId),
    /// A connect attempt found no working path
    ConnectFailed,
    /// Polling stopped because of repeated errors
    PollingFailed,
    /// Shutdown was requested
    Shutdown,
}

/// What the serving loop should do next
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Directive {
    /// Start polling through `path` after waiting `after`
    Serve {
        /// Path to poll through
        path: PathId,
        /// Delay before polling resumes
        after: Duration,
    },
    /// Try to connect again now
    Reconnect,
    /// Wait, then try to connect again
    Retry(Duration),
    /// Leave the loop
    Stop,
}

/// Drives [`LinkState`] from [`LinkEvent`]s.
#[derive(Debug, Clone)]
pub struct Supervisor {
    state: LinkState,
    max_attempts: Option<u32>,
}

impl Supervisor {
    /// Create a supervisor; `max_attempts` of `None` retries forever
    #[must_use]
    pub const fn new(max_attempts: Option<u32>) -> Self {
        Self {
            state: LinkState::Starting,
            max_attempts,
        }
    }

    /// Current state
    #[must_use]
    pub const fn state(&self) -> LinkState {
        self.state
    }

    /// Apply `event` and return the next step.
    pub fn on_event(&mut self, event: LinkEvent) -> Directive {
        let (next, directive) = match (self.state, event) {
            (state, _) if state.is_terminal() => (state, Directive::Stop),
            (_, LinkEvent::Shutdown) => (LinkState::Stopped, Directive::Stop),

            (LinkState::Starting, LinkEvent::Connected(path)) => (
                LinkState::Serving(path),
                Directive::Serve {
                    path,
                    after: Duration::ZERO,
                },
            ),
            (LinkState::Starting, LinkEvent::ConnectFailed) => {
                error!("No transport path reachable at startup");
                (LinkState::Fatal, Directive::Stop)
            }

            (LinkState::Serving(_), LinkEvent::PollingFailed) => {
                warn!("Polling failed, reconnecting");
                (LinkState::Reconnecting { failures: 0 }, Directive::Reconnect)
            }
            (LinkState::Serving(_) | LinkState::Reconnecting { .. }, LinkEvent::Connected(path)) => {
                info!(path = %path, "Reconnected");
                (
                    LinkState::Serving(path),
                    Directive::Serve {
                        path,
                        after: RECONNECT_SHORT_DELAY,
                    },
                )
            }
            (LinkState::Reconnecting { failures }, LinkEvent::ConnectFailed) => {
                let failures = failures.saturating_add(1);
                if self.max_attempts.is_some_and(|max| failures >= max) {
                    error!(failures = failures, "Giving up reconnecting");
                    (LinkState::GaveUp, Directive::Stop)
                } else {
                    let delay = if failures == 1 {
                        RECONNECT_SHORT_DELAY
                    } else {
                        RECONNECT_LONG_DELAY
                    };
                    warn!(failures = failures, delay = ?delay, "Reconnect failed, retrying");
                    (LinkState::Reconnecting { failures }, Directive::Retry(delay))
                }
            }

            // Serving + ConnectFailed, Starting/Reconnecting + PollingFailed
            (state, event) => {
                debug!(state = ?state, event = ?event, "Ignoring unexpected link event");
                let directive = match state {
                    LinkState::Serving(path) => Directive::Serve {
                        path,
                        after: Duration::ZERO,
                    },
                    _ => Directive::Reconnect,
                };
                (state, directive)
            }
        };

        self.state = next;
        directive
    }
}
