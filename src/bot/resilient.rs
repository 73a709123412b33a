//! Resilient invocation of Bot API calls with transport path rotation.
//!
//! Every outbound call (send, edit, upload, delete, callback answer) goes
//! through [`ResilientInvoker::invoke`]. A call that fails on one path is
//! retried on the next path of the chain, starting from whichever path is
//! active, until every path has been tried once.
//!
//! # Usage
//!
//! ```ignore
//! use vidrelay::bot::resilient::ResilientInvoker;
//!
//! let path = invoker.connect().await?;
//! let me = invoker.invoke(|bot| async move { bot.get_me().await }).await?;
//! ```

use super::transport::{Connector, PathId, TransportError, TransportPath, TransportSelector};
use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Wraps outbound calls with automatic path rotation.
pub struct ResilientInvoker<C: Connector> {
    selector: Arc<TransportSelector<C>>,
}

impl<C: Connector> Clone for ResilientInvoker<C> {
    fn clone(&self) -> Self {
        Self {
            selector: Arc::clone(&self.selector),
        }
    }
}

impl<C: Connector> ResilientInvoker<C> {
    /// Create an invoker over a shared selector
    #[must_use]
    pub const fn new(selector: Arc<TransportSelector<C>>) -> Self {
        Self { selector }
    }

    /// Underlying selector
    #[must_use]
    pub fn selector(&self) -> &TransportSelector<C> {
        &self.selector
    }

    /// Find the first path of the chain that passes a health check.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Unreachable`] if every path fails.
    pub async fn connect(&self) -> Result<TransportPath, TransportError> {
        let chain = self.selector.build_chain();
        for path in &chain {
            if self.selector.health_check(path).await {
                info!(path = %path.id, "Connected to Telegram");
                return Ok(path.clone());
            }
        }
        Err(TransportError::Unreachable { tried: chain.len() })
    }

    /// Chain reordered to start at the active path (or the first one),
    /// wrapping around. Every path appears exactly once.
    #[must_use]
    pub fn rotation(&self) -> Vec<TransportPath> {
        rotate_from(self.selector.build_chain(), self.selector.active_id())
    }

    /// Run `op` on the active path, rotating through the chain on failure.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Exhausted`] carrying the last failure once
    /// every path has been tried.
    pub async fn invoke<T, E, F, Fut>(&self, mut op: F) -> Result<T, TransportError>
    where
        F: FnMut(C::Client) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        let rotation = self.rotation();
        let attempts = rotation.len();
        let mut last: Option<(PathId, String)> = None;

        for path in &rotation {
            let Some(client) = self.selector.activate_client(path) else {
                last = Some((path.id, TransportError::NotConfigured(path.id).to_string()));
                continue;
            };
            match op(client).await {
                Ok(value) => {
                    if last.is_some() {
                        debug!(path = %path.id, "Call succeeded after rotation");
                    }
                    return Ok(value);
                }
                Err(e) => {
                    warn!(path = %path.id, error = %e, "Call failed, rotating transport path");
                    last = Some((path.id, e.to_string()));
                }
            }
        }

        let (path, message) = last.unwrap_or((PathId::Direct, "empty transport chain".to_string()));
        Err(TransportError::Exhausted {
            attempts,
            path,
            message,
        })
    }
}

/// Reorder `chain` to start at `active`, or leave it as is when `active`
/// is unset or no longer part of the chain.
#[must_use]
pub fn rotate_from(mut chain: Vec<TransportPath>, active: Option<PathId>) -> Vec<TransportPath> {
    let start = active
        .and_then(|id| chain.iter().position(|p| p.id == id))
        .unwrap_or(0);
    chain.rotate_left(start);
    chain
}
