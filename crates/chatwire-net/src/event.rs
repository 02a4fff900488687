//! Typed events surfaced to the embedding application.
//!
//! Queue-of-tagged-values rendition of the original callback wiring: the
//! engine pushes onto an unbounded channel and a single consumer drains it
//! in the order the underlying I/O happened. `peer` identifies the remote
//! end and is `Some` only in server-role events.

use tokio::sync::mpsc;

/// Classification attached to [`Event::Error`].
///
/// Encoding unavailability never appears here: an unresolvable legacy codec
/// is recovered internally by falling back to UTF-8.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Host unreachable, refused, or not found.
    ConnectFailed,
    /// Listen address in use or permission denied.
    BindFailed,
    /// Mid-session I/O failure.
    Transport,
    /// Malformed tagged message (field count or base64).
    Format,
}

#[derive(Debug, Clone)]
pub enum Event {
    /// The single-link (client) session reached Connected.
    Connected,
    /// The single-link session reached Unconnected, whether the close was
    /// local or remote. A graceful remote close is this, not an error.
    Disconnected,
    Error {
        kind: ErrorKind,
        message: String,
    },
    TextReceived {
        peer: Option<String>,
        text: String,
    },
    FileReceived {
        peer: Option<String>,
        name: String,
        size: i64,
        extension: String,
        payload: Vec<u8>,
    },
    ImageReceived {
        peer: Option<String>,
        name: String,
        size: i64,
        format: String,
        payload: Vec<u8>,
    },
    /// A peer was accepted into the registry (server role).
    PeerConnected {
        peer: String,
    },
    /// A peer left the registry (server role).
    PeerDisconnected {
        peer: String,
    },
    ServerStarted {
        port: u16,
    },
    ServerStopped,
}

pub type EventSender = mpsc::UnboundedSender<Event>;
pub type EventReceiver = mpsc::UnboundedReceiver<Event>;

/// Create the event queue. Hand the receiver to the single consumer.
pub fn event_channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}
