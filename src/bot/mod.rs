/// Command, message and callback endpoints
pub mod handlers;
/// Outbound messaging over the resilient transport
pub mod messaging;
/// Outstanding compression offers
pub mod pending;
/// Progress status text rendering
pub mod progress_render;
/// Background progress reporting task
pub mod progress_reporter;
/// Path rotation for outbound calls
pub mod resilient;
/// Reconnect state machine
pub mod supervisor;
/// Transport paths and selection
pub mod transport;
/// User-facing texts and keyboards
pub mod views;

pub use handlers::App;
pub use messaging::{Markup, MessageRef, Messenger, TelegramMessenger};
pub use resilient::ResilientInvoker;
pub use transport::{PathId, TelegramConnector, TransportError, TransportSelector};
