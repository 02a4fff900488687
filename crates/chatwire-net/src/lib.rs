//! Chatwire Net -- peer sessions, connection registry, server accept loop.
//!
//! The connection-oriented half of the engine. `chatwire-protocol` owns the
//! byte-level codecs; this crate owns sockets, lifecycles, and delivery.
//! The embedding application consumes everything through typed [`Event`]
//! values on a single channel.

pub mod config;
pub mod event;
pub mod media;
pub mod registry;
pub mod server;
pub mod session;

pub use config::{NetConfig, SessionConfig};
pub use event::{event_channel, ErrorKind, Event, EventReceiver, EventSender};
pub use registry::ConnectionRegistry;
pub use server::Server;
pub use session::{peer_identity, PeerSession, SessionId, SessionState};

/// Transport-level failures, returned alongside their `Event::Error`
/// classification so direct callers get a `Result` while the event stream
/// stays complete.
#[derive(Debug, thiserror::Error)]
pub enum NetError {
    #[error("connect failed: {0}")]
    Connect(#[source] std::io::Error),
    #[error("bind failed: {0}")]
    Bind(#[source] std::io::Error),
}
