//! Test harness -- in-process server plus real TCP clients on ephemeral
//! ports, all on the same tokio runtime.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chatwire_net::config::NetConfig;
use chatwire_net::media::{MediaError, MediaSource, OutgoingFile, OutgoingImage};
use chatwire_net::{
    event_channel, ConnectionRegistry, Event, EventReceiver, PeerSession, Server, SessionConfig,
};
use tokio::sync::broadcast;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "chatwire_net=debug".into()),
        )
        .with_test_writer()
        .try_init();
}

/// Default config pointed at an ephemeral local port.
pub fn test_config() -> NetConfig {
    let mut cfg = NetConfig::default();
    cfg.server.listen_addr = "127.0.0.1:0".into();
    cfg
}

/// Test config with UTF-8 send encoding.
pub fn utf8_config() -> NetConfig {
    let mut cfg = test_config();
    cfg.encoding.send = chatwire_protocol::SendEncoding::Utf8;
    cfg
}

/// A running in-process server: registry, event stream, accept loop task.
pub struct TestServer {
    pub registry: Arc<ConnectionRegistry>,
    pub events: EventReceiver,
    pub addr: SocketAddr,
    shutdown_tx: broadcast::Sender<()>,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    pub async fn start() -> anyhow::Result<TestServer> {
        Self::start_with(test_config()).await
    }

    pub async fn start_with(config: NetConfig) -> anyhow::Result<TestServer> {
        init_tracing();
        let (tx, mut events) = event_channel();
        let registry = Arc::new(ConnectionRegistry::new(&config.encoding, tx.clone()));
        let server = Server::bind(config, tx).await?;
        let addr = server.local_addr()?;

        // Bind announces itself before the loop starts
        match next_event(&mut events, Duration::from_secs(1)).await {
            Event::ServerStarted { .. } => {}
            other => anyhow::bail!("expected ServerStarted, got {other:?}"),
        }

        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let handle = tokio::spawn(server.run(registry.clone(), shutdown_rx));
        Ok(TestServer {
            registry,
            events,
            addr,
            shutdown_tx,
            handle,
        })
    }

    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(());
        let _ = self.handle.await;
    }
}

/// A connected client session with its own event stream.
pub struct TestClient {
    pub session: Arc<PeerSession>,
    pub events: EventReceiver,
}

pub async fn connect_client(addr: SocketAddr) -> anyhow::Result<TestClient> {
    connect_client_with(addr, SessionConfig::client(&test_config())).await
}

pub async fn connect_client_with(
    addr: SocketAddr,
    config: SessionConfig,
) -> anyhow::Result<TestClient> {
    let (tx, mut events) = event_channel();
    let session = PeerSession::connect(&addr.ip().to_string(), addr.port(), config, tx).await?;
    match next_event(&mut events, Duration::from_secs(1)).await {
        Event::Connected => {}
        other => anyhow::bail!("expected Connected, got {other:?}"),
    }
    Ok(TestClient { session, events })
}

/// Receive the next event or panic after `timeout`.
pub async fn next_event(rx: &mut EventReceiver, timeout: Duration) -> Event {
    tokio::time::timeout(timeout, rx.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event channel closed")
}

/// Assert nothing arrives on `rx` within `window`.
pub async fn assert_quiet(rx: &mut EventReceiver, window: Duration) {
    if let Ok(event) = tokio::time::timeout(window, rx.recv()).await {
        panic!("expected no event, got {event:?}");
    }
}

/// In-memory media source keyed by path.
#[derive(Default)]
pub struct MemoryMedia {
    files: HashMap<PathBuf, OutgoingFile>,
    images: HashMap<PathBuf, OutgoingImage>,
}

impl MemoryMedia {
    pub fn with_file(mut self, path: &str, name: &str, extension: &str, bytes: Vec<u8>) -> Self {
        self.files.insert(
            PathBuf::from(path),
            OutgoingFile {
                name: name.into(),
                extension: extension.into(),
                bytes,
            },
        );
        self
    }

    pub fn with_image(mut self, path: &str, name: &str, png_bytes: Vec<u8>) -> Self {
        self.images.insert(
            PathBuf::from(path),
            OutgoingImage {
                name: name.into(),
                png_bytes,
            },
        );
        self
    }
}

impl MediaSource for MemoryMedia {
    fn load_file(&self, path: &Path) -> Result<OutgoingFile, MediaError> {
        self.files
            .get(path)
            .cloned()
            .ok_or_else(|| MediaError::NotFound(path.display().to_string()))
    }

    fn load_image(&self, path: &Path) -> Result<OutgoingImage, MediaError> {
        self.images
            .get(path)
            .cloned()
            .ok_or_else(|| MediaError::NotFound(path.display().to_string()))
    }
}
