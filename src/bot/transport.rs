//! Transport selection: the ordered chain of network paths to the Bot API
//! and the process-wide record of which one is active.
//!
//! Every path gets its own HTTP client. Activating a path swaps the shared
//! client reference; in-flight calls keep the client they started with, so
//! two concurrent requests may briefly disagree on the active path. Callers
//! go through [`crate::bot::resilient::ResilientInvoker`], which rotates on
//! failure instead of assuming the path stays stable.

use crate::config::{Settings, POLLING_REQUEST_TIMEOUT};
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use teloxide::prelude::*;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Per-request timeout of the HTTP clients; a 50 MB upload has to fit in it.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Identifier of one transport path, in chain order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PathId {
    /// Primary proxied path (SOCKS5)
    Socks5,
    /// Secondary proxied path (MTProto-style HTTPS proxy)
    Mtproto,
    /// Direct connection, always available
    Direct,
}

impl fmt::Display for PathId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Socks5 => "socks5",
            Self::Mtproto => "mtproto",
            Self::Direct => "direct",
        })
    }
}

/// Endpoint descriptor of a proxied path.
#[derive(Clone, PartialEq, Eq)]
pub struct ProxyEndpoint {
    /// Proxy host
    pub host: String,
    /// Proxy port
    pub port: u16,
    /// Optional user name
    pub username: Option<String>,
    /// Optional password
    pub password: Option<String>,
    /// Optional proxy secret
    pub secret: Option<String>,
}

impl fmt::Debug for ProxyEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyEndpoint")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "[MASKED]"))
            .field("secret", &self.secret.as_ref().map(|_| "[MASKED]"))
            .finish()
    }
}

/// One concrete network route to the Bot API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportPath {
    /// Which path this is
    pub id: PathId,
    /// Endpoint for proxied paths; `None` for direct
    pub endpoint: Option<ProxyEndpoint>,
}

impl TransportPath {
    /// The always-available direct path
    #[must_use]
    pub const fn direct() -> Self {
        Self {
            id: PathId::Direct,
            endpoint: None,
        }
    }

    /// Whether the path can be activated
    #[must_use]
    pub const fn is_configured(&self) -> bool {
        matches!(self.id, PathId::Direct) || self.endpoint.is_some()
    }

    /// Proxy URL for this path, `None` for direct or an incomplete descriptor
    #[must_use]
    pub fn proxy_url(&self) -> Option<String> {
        let ep = self.endpoint.as_ref()?;
        match self.id {
            PathId::Socks5 => Some(match (&ep.username, &ep.password) {
                (Some(user), Some(pass)) => {
                    format!("socks5://{user}:{pass}@{}:{}", ep.host, ep.port)
                }
                _ => format!("socks5://{}:{}", ep.host, ep.port),
            }),
            PathId::Mtproto => Some(match &ep.secret {
                Some(secret) => format!("https://{}:{}/{secret}", ep.host, ep.port),
                None => format!("https://{}:{}", ep.host, ep.port),
            }),
            PathId::Direct => None,
        }
    }
}

/// Errors raised by the transport layer
#[derive(Debug, Error)]
pub enum TransportError {
    /// The path has no complete endpoint descriptor
    #[error("transport path {0} is not configured")]
    NotConfigured(PathId),
    /// The HTTP client for a path could not be built
    #[error("failed to build client for {path}: {message}")]
    Client {
        /// Path being built
        path: PathId,
        /// Underlying error
        message: String,
    },
    /// The health call failed
    #[error("health check failed: {0}")]
    Probe(String),
    /// No path in the chain passed its health check
    #[error("no transport path reachable (tried {tried})")]
    Unreachable {
        /// Number of paths attempted
        tried: usize,
    },
    /// An outbound call failed on every path of the rotation
    #[error("call failed on all {attempts} transport paths, last on {path}: {message}")]
    Exhausted {
        /// Paths tried
        attempts: usize,
        /// Last path tried
        path: PathId,
        /// Last error
        message: String,
    },
}

fn non_empty(value: Option<&String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_port(id: PathId, raw: Option<&String>) -> Option<u16> {
    let raw = non_empty(raw)?;
    match raw.parse::<u16>() {
        Ok(port) if port > 0 => Some(port),
        _ => {
            warn!(path = %id, port = %raw, "Invalid proxy port, path disabled");
            None
        }
    }
}

/// Build the ordered chain from configuration.
///
/// Proxied paths appear only when host and port are both present and the
/// port is valid; the direct path is always last.
#[must_use]
pub fn build_chain(settings: &Settings) -> Vec<TransportPath> {
    let mut chain = Vec::with_capacity(3);

    if let (Some(host), Some(port)) = (
        non_empty(settings.socks5_host.as_ref()),
        parse_port(PathId::Socks5, settings.socks5_port.as_ref()),
    ) {
        chain.push(TransportPath {
            id: PathId::Socks5,
            endpoint: Some(ProxyEndpoint {
                host,
                port,
                username: non_empty(settings.socks5_username.as_ref()),
                password: non_empty(settings.socks5_password.as_ref()),
                secret: None,
            }),
        });
    }

    if let (Some(host), Some(port)) = (
        non_empty(settings.mtproto_host.as_ref()),
        parse_port(PathId::Mtproto, settings.mtproto_port.as_ref()),
    ) {
        chain.push(TransportPath {
            id: PathId::Mtproto,
            endpoint: Some(ProxyEndpoint {
                host,
                port,
                username: None,
                password: None,
                secret: non_empty(settings.mtproto_secret.as_ref()),
            }),
        });
    }

    chain.push(TransportPath::direct());
    chain
}

/// Builds and probes clients for transport paths.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Client handle used for outbound calls
    type Client: Clone + Send + Sync + 'static;

    /// Client routed through `path`
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Client`] if the client cannot be built.
    fn client_for(&self, path: &TransportPath) -> Result<Self::Client, TransportError>;

    /// One lightweight authenticated call
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Probe`] if the call fails.
    async fn probe(&self, client: &Self::Client) -> Result<(), TransportError>;
}

/// Currently active path and its client.
///
/// Starts empty, set on every successful activation, kept until shutdown.
pub struct TransportState<T> {
    active: RwLock<Option<(PathId, T)>>,
}

impl<T: Clone> TransportState<T> {
    /// Empty state
    #[must_use]
    pub const fn new() -> Self {
        Self {
            active: RwLock::new(None),
        }
    }

    /// Active path, if any
    #[must_use]
    pub fn active_id(&self) -> Option<PathId> {
        match self.active.read() {
            Ok(guard) => guard.as_ref().map(|(id, _)| *id),
            Err(poisoned) => poisoned.into_inner().as_ref().map(|(id, _)| *id),
        }
    }

    /// Client of the active path, if any
    #[must_use]
    pub fn active_client(&self) -> Option<T> {
        match self.active.read() {
            Ok(guard) => guard.as_ref().map(|(_, c)| c.clone()),
            Err(poisoned) => poisoned.into_inner().as_ref().map(|(_, c)| c.clone()),
        }
    }

    fn set(&self, id: PathId, client: T) {
        match self.active.write() {
            Ok(mut guard) => *guard = Some((id, client)),
            Err(poisoned) => *poisoned.into_inner() = Some((id, client)),
        }
    }
}

impl<T: Clone> Default for TransportState<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Chain builder, activator and health checker.
pub struct TransportSelector<C: Connector> {
    connector: C,
    settings: Arc<Settings>,
    state: TransportState<C::Client>,
}

impl<C: Connector> TransportSelector<C> {
    /// Create a selector with no active path
    #[must_use]
    pub fn new(connector: C, settings: Arc<Settings>) -> Self {
        Self {
            connector,
            settings,
            state: TransportState::new(),
        }
    }

    /// Recompute the chain from the current settings
    #[must_use]
    pub fn build_chain(&self) -> Vec<TransportPath> {
        build_chain(&self.settings)
    }

    /// Make `path` the active one. Returns `false` if it cannot be used.
    pub fn activate(&self, path: &TransportPath) -> bool {
        self.activate_client(path).is_some()
    }

    pub(crate) fn activate_client(&self, path: &TransportPath) -> Option<C::Client> {
        if !path.is_configured() {
            debug!(path = %path.id, "Skipping unconfigured transport path");
            return None;
        }
        match self.connector.client_for(path) {
            Ok(client) => {
                if self.state.active_id() != Some(path.id) {
                    info!(path = %path.id, "Switching transport path");
                }
                self.state.set(path.id, client.clone());
                Some(client)
            }
            Err(e) => {
                warn!(path = %path.id, error = %e, "Failed to activate transport path");
                None
            }
        }
    }

    /// Activate `path` and perform one health call through it.
    pub async fn health_check(&self, path: &TransportPath) -> bool {
        let Some(client) = self.activate_client(path) else {
            return false;
        };
        match self.connector.probe(&client).await {
            Ok(()) => true,
            Err(e) => {
                warn!(
                    path = %path.id,
                    active = ?self.state.active_id().map(|id| id.to_string()),
                    error = %e,
                    "Health check failed"
                );
                false
            }
        }
    }

    /// Active path, if any
    #[must_use]
    pub fn active_id(&self) -> Option<PathId> {
        self.state.active_id()
    }

    /// Client of the active path, if any
    #[must_use]
    pub fn active_client(&self) -> Option<C::Client> {
        self.state.active_client()
    }

    /// Connector building the clients
    #[must_use]
    pub const fn connector(&self) -> &C {
        &self.connector
    }
}

/// [`Connector`] producing teloxide [`Bot`]s, one cached per proxy URL.
pub struct TelegramConnector {
    token: String,
    clients: Mutex<HashMap<PathId, (Option<String>, Bot)>>,
}

impl TelegramConnector {
    /// Create a connector for the given bot token
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            clients: Mutex::new(HashMap::new()),
        }
    }

    /// Uncached client for the update listener, with a timeout short enough
    /// that a stalled path fails `getUpdates` quickly.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::NotConfigured`] or [`TransportError::Client`].
    pub fn polling_client(&self, path: &TransportPath) -> Result<Bot, TransportError> {
        if !path.is_configured() {
            return Err(TransportError::NotConfigured(path.id));
        }
        self.build_bot(path, POLLING_REQUEST_TIMEOUT)
    }

    fn build_bot(&self, path: &TransportPath, timeout: Duration) -> Result<Bot, TransportError> {
        let client_err = |message: String| TransportError::Client {
            path: path.id,
            message,
        };

        let builder = teloxide::net::default_reqwest_settings().timeout(timeout);
        let builder = match path.proxy_url() {
            Some(url) => builder.proxy(
                reqwest::Proxy::all(url.as_str()).map_err(|e| client_err(e.to_string()))?,
            ),
            None => builder.no_proxy(),
        };
        let client = builder.build().map_err(|e| client_err(e.to_string()))?;
        Ok(Bot::with_client(self.token.clone(), client))
    }
}

#[async_trait]
impl Connector for TelegramConnector {
    type Client = Bot;

    fn client_for(&self, path: &TransportPath) -> Result<Bot, TransportError> {
        if !path.is_configured() {
            return Err(TransportError::NotConfigured(path.id));
        }
        let url = path.proxy_url();
        let mut clients = match self.clients.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some((cached_url, bot)) = clients.get(&path.id) {
            if *cached_url == url {
                return Ok(bot.clone());
            }
        }
        let bot = self.build_bot(path, REQUEST_TIMEOUT)?;
        clients.insert(path.id, (url, bot.clone()));
        Ok(bot)
    }

    async fn probe(&self, client: &Bot) -> Result<(), TransportError> {
        client
            .get_me()
            .await
            .map(|_| ())
            .map_err(|e| TransportError::Probe(e.to_string()))
    }
}
