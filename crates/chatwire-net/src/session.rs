//! Peer session -- one live TCP connection and its message pipeline.
//!
//! Inbound: frame -> encoding resolver -> classify -> event.
//! Outbound: message -> wire text -> encode -> writer task.
//!
//! The writer task owns the socket's send half and its queue, so `send`
//! never blocks on the network. Disconnect is the only bounded wait: a
//! graceful close that the peer does not acknowledge within the configured
//! timeout is torn down hard.

use std::fmt;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chatwire_protocol::{EncodingResolver, FrameCodec, Message, RecvEncoding, SendEncoding};
use futures_util::{SinkExt, StreamExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, FramedWrite};

use crate::config::SessionConfig;
use crate::event::{ErrorKind, Event, EventSender};
use crate::media::{MediaError, MediaSource};
use crate::NetError;

/// Counter for generating unique session IDs.
static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique session handle.
///
/// Registry removal keys on this rather than on the identity string, which
/// is not guaranteed unique.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sess-{}", self.0)
    }
}

/// Connection lifecycle states.
///
/// `Unconnected -> Connecting -> Connected -> Disconnecting -> Unconnected`.
/// A session object only exists once its transport handshake completed, so
/// the first two states describe the connect call in flight; the object
/// itself moves between the last three.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unconnected,
    Connecting,
    Connected,
    Disconnecting,
}

enum WriterCmd {
    Frame(Bytes),
    /// Flush buffered frames, then FIN the send half.
    Shutdown,
}

/// One live connection: the client's single link, or one of a server's
/// many accepted links.
pub struct PeerSession {
    id: SessionId,
    identity: String,
    /// `Some(identity)` for server-accepted sessions; attached to inbound
    /// message events so the consumer can tell peers apart.
    event_peer: Option<String>,
    state: Arc<RwLock<SessionState>>,
    resolver: EncodingResolver,
    send_encoding: SendEncoding,
    disconnect_timeout: Duration,
    writer_tx: mpsc::UnboundedSender<WriterCmd>,
    events: EventSender,
    closed_tx: Option<mpsc::UnboundedSender<SessionId>>,
    disconnected_sent: Arc<AtomicBool>,
    reader: Mutex<Option<JoinHandle<()>>>,
    writer: Mutex<Option<JoinHandle<()>>>,
}

impl PeerSession {
    /// Connect to a remote peer (client role).
    ///
    /// On transport failure the error is classified, surfaced as an
    /// `Error { kind: ConnectFailed }` event, and returned. The state
    /// machine stays Unconnected; there is no automatic retry.
    pub async fn connect(
        host: &str,
        port: u16,
        config: SessionConfig,
        events: EventSender,
    ) -> Result<Arc<Self>, NetError> {
        let stream = match TcpStream::connect((host, port)).await {
            Ok(stream) => stream,
            Err(e) => {
                let _ = events.send(Event::Error {
                    kind: ErrorKind::ConnectFailed,
                    message: describe_connect_error(host, port, &e),
                });
                return Err(NetError::Connect(e));
            }
        };
        // Announce before the reader task starts so Connected is the first
        // event on the queue.
        let _ = events.send(Event::Connected);
        let session = Self::spawn(stream, config, events, false, None);
        tracing::info!(id = %session.id, peer = %session.identity, "connected");
        Ok(session)
    }

    /// Wrap a freshly accepted socket (server role).
    ///
    /// Inbound message events from this session carry the peer identity.
    /// `closed_tx` receives the session id exactly once when the session
    /// reaches Unconnected, so the registry can drop it.
    pub fn from_accepted(
        stream: TcpStream,
        config: SessionConfig,
        events: EventSender,
        closed_tx: mpsc::UnboundedSender<SessionId>,
    ) -> Arc<Self> {
        Self::spawn(stream, config, events, true, Some(closed_tx))
    }

    fn spawn(
        stream: TcpStream,
        config: SessionConfig,
        events: EventSender,
        server_role: bool,
        closed_tx: Option<mpsc::UnboundedSender<SessionId>>,
    ) -> Arc<Self> {
        let id = SessionId(NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed));
        let identity = stream
            .peer_addr()
            .map(peer_identity)
            .unwrap_or_else(|_| "unknown:0".into());
        let resolver = EncodingResolver::new(&config.legacy_codec);
        let state = Arc::new(RwLock::new(SessionState::Connected));
        let disconnected_sent = Arc::new(AtomicBool::new(false));
        let event_peer = server_role.then(|| identity.clone());

        let (read_half, write_half) = stream.into_split();
        let (writer_tx, writer_rx) = mpsc::unbounded_channel();

        let writer = tokio::spawn(write_loop(write_half, writer_rx, events.clone()));
        let reader = tokio::spawn(read_loop(
            read_half,
            ReaderParts {
                id,
                peer: event_peer.clone(),
                state: state.clone(),
                resolver,
                recv_encoding: config.recv_encoding,
                events: events.clone(),
                disconnected_sent: disconnected_sent.clone(),
                closed_tx: closed_tx.clone(),
                writer_tx: writer_tx.clone(),
            },
        ));

        Arc::new(Self {
            id,
            identity,
            event_peer,
            state,
            resolver,
            send_encoding: config.send_encoding,
            disconnect_timeout: config.disconnect_timeout,
            writer_tx,
            events,
            closed_tx,
            disconnected_sent,
            reader: Mutex::new(Some(reader)),
            writer: Mutex::new(Some(writer)),
        })
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    /// The `"<ip>:<port>"` handle for this peer.
    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub async fn state(&self) -> SessionState {
        *self.state.read().await
    }

    pub async fn is_connected(&self) -> bool {
        *self.state.read().await == SessionState::Connected
    }

    /// Send a message. Best-effort: silently dropped unless Connected --
    /// sends never queue for later delivery.
    pub async fn send(&self, msg: &Message) {
        if !self.is_connected().await {
            tracing::debug!(id = %self.id, "send dropped, session not connected");
            return;
        }
        let bytes = self.resolver.encode(&msg.to_wire_text(), self.send_encoding);
        self.send_frame(Bytes::from(bytes));
    }

    /// Load a file through the collaborator's media source and send it.
    pub async fn send_file(&self, source: &dyn MediaSource, path: &Path) -> Result<(), MediaError> {
        let file = source.load_file(path)?;
        self.send(&file.into_message()).await;
        Ok(())
    }

    /// Load an image (re-encoded to PNG by the source) and send it.
    pub async fn send_image(
        &self,
        source: &dyn MediaSource,
        path: &Path,
    ) -> Result<(), MediaError> {
        let image = source.load_image(path)?;
        self.send(&image.into_message()).await;
        Ok(())
    }

    /// Enqueue an already-encoded frame. Lets the registry serialize a
    /// broadcast once. Drops silently when the writer is gone.
    pub(crate) fn send_frame(&self, frame: Bytes) {
        let _ = self.writer_tx.send(WriterCmd::Frame(frame));
    }

    /// Gracefully close the connection.
    ///
    /// Meaningful only from Connected. Flushes and shuts the send half
    /// down, then waits up to the configured timeout for the peer to close
    /// its side; on timeout the socket is torn down hard rather than
    /// blocking. Exactly one `Disconnected` notification is raised either
    /// way, and the session always ends Unconnected.
    pub async fn disconnect(&self) {
        {
            let mut state = self.state.write().await;
            if *state != SessionState::Connected {
                return;
            }
            *state = SessionState::Disconnecting;
        }
        let _ = self.writer_tx.send(WriterCmd::Shutdown);

        let reader = self.reader.lock().await.take();
        if let Some(handle) = reader {
            let abort = handle.abort_handle();
            if tokio::time::timeout(self.disconnect_timeout, handle)
                .await
                .is_err()
            {
                tracing::warn!(
                    id = %self.id,
                    peer = %self.identity,
                    "peer did not acknowledge close in time, aborting"
                );
                abort.abort();
                if let Some(writer) = self.writer.lock().await.take() {
                    writer.abort();
                }
                finish_close(
                    &self.state,
                    self.event_peer.as_deref(),
                    &self.events,
                    &self.disconnected_sent,
                    self.closed_tx.as_ref(),
                    self.id,
                )
                .await;
            }
        }
    }
}

struct ReaderParts {
    id: SessionId,
    peer: Option<String>,
    state: Arc<RwLock<SessionState>>,
    resolver: EncodingResolver,
    recv_encoding: RecvEncoding,
    events: EventSender,
    disconnected_sent: Arc<AtomicBool>,
    closed_tx: Option<mpsc::UnboundedSender<SessionId>>,
    writer_tx: mpsc::UnboundedSender<WriterCmd>,
}

async fn read_loop(read_half: OwnedReadHalf, parts: ReaderParts) {
    let mut framed = FramedRead::new(read_half, FrameCodec);
    loop {
        match framed.next().await {
            Some(Ok(frame)) => {
                let text = parts.resolver.decode(&frame, parts.recv_encoding);
                match Message::classify(&text) {
                    Ok(msg) => deliver(&parts, msg),
                    Err(e) => {
                        // The malformed message is discarded whole, never
                        // partially delivered as degraded text.
                        tracing::warn!(id = %parts.id, "discarding malformed message: {e}");
                        let _ = parts.events.send(Event::Error {
                            kind: ErrorKind::Format,
                            message: e.to_string(),
                        });
                    }
                }
            }
            Some(Err(e)) => {
                tracing::warn!(id = %parts.id, "transport error: {e}");
                let _ = parts.events.send(Event::Error {
                    kind: ErrorKind::Transport,
                    message: e.to_string(),
                });
                break;
            }
            // Remote close
            None => break,
        }
    }

    // Close our send half too, so the peer's bounded disconnect wait (and
    // the socket itself) can complete.
    let _ = parts.writer_tx.send(WriterCmd::Shutdown);

    finish_close(
        &parts.state,
        parts.peer.as_deref(),
        &parts.events,
        &parts.disconnected_sent,
        parts.closed_tx.as_ref(),
        parts.id,
    )
    .await;
}

fn deliver(parts: &ReaderParts, msg: Message) {
    let peer = parts.peer.clone();
    let event = match msg {
        Message::Text { body } => Event::TextReceived { peer, text: body },
        Message::File {
            name,
            size,
            extension,
            payload,
        } => Event::FileReceived {
            peer,
            name,
            size,
            extension,
            payload,
        },
        Message::Image {
            name,
            size,
            format,
            payload,
        } => Event::ImageReceived {
            peer,
            name,
            size,
            format,
            payload,
        },
    };
    let _ = parts.events.send(event);
}

/// Mark the session Unconnected and raise its close notification exactly
/// once. Client sessions emit `Disconnected`; server-accepted sessions
/// notify the registry instead, which raises `PeerDisconnected`.
async fn finish_close(
    state: &Arc<RwLock<SessionState>>,
    event_peer: Option<&str>,
    events: &EventSender,
    disconnected_sent: &AtomicBool,
    closed_tx: Option<&mpsc::UnboundedSender<SessionId>>,
    id: SessionId,
) {
    *state.write().await = SessionState::Unconnected;
    if disconnected_sent
        .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
        .is_ok()
    {
        if event_peer.is_none() {
            let _ = events.send(Event::Disconnected);
        }
        if let Some(tx) = closed_tx {
            let _ = tx.send(id);
        }
    }
}

async fn write_loop(
    write_half: OwnedWriteHalf,
    mut rx: mpsc::UnboundedReceiver<WriterCmd>,
    events: EventSender,
) {
    let mut framed = FramedWrite::new(write_half, FrameCodec);
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WriterCmd::Frame(frame) => {
                if let Err(e) = framed.send(frame).await {
                    let _ = events.send(Event::Error {
                        kind: ErrorKind::Transport,
                        message: e.to_string(),
                    });
                    break;
                }
            }
            WriterCmd::Shutdown => {
                let _ = framed.close().await;
                break;
            }
        }
    }
}

/// Identity string `"<ip>:<port>"`. IPv4-mapped IPv6 addresses normalize
/// to their embedded IPv4 form so both stacks produce the same handle.
pub fn peer_identity(addr: SocketAddr) -> String {
    match addr {
        SocketAddr::V4(v4) => format!("{}:{}", v4.ip(), v4.port()),
        SocketAddr::V6(v6) => match v6.ip().to_ipv4_mapped() {
            Some(mapped) => format!("{}:{}", mapped, v6.port()),
            None => format!("{}:{}", v6.ip(), v6.port()),
        },
    }
}

/// Human-readable classification for connect failures.
fn describe_connect_error(host: &str, port: u16, e: &std::io::Error) -> String {
    use std::io::ErrorKind as IoKind;
    match e.kind() {
        IoKind::ConnectionRefused => {
            format!("connection to {host}:{port} refused; is the server running?")
        }
        IoKind::TimedOut => format!("connection to {host}:{port} timed out"),
        _ => format!("failed to connect to {host}:{port}: {e}"),
    }
}
