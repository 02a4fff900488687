//! TCP accept loop wiring accepted sockets into the registry.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};

use crate::config::{NetConfig, SessionConfig};
use crate::event::{ErrorKind, Event, EventSender};
use crate::registry::ConnectionRegistry;
use crate::session::{PeerSession, SessionId};
use crate::NetError;

pub struct Server {
    listener: TcpListener,
    config: NetConfig,
    events: EventSender,
}

impl Server {
    /// Bind the listen socket.
    ///
    /// Failure is classified (address in use / permission denied),
    /// surfaced as an `Error { kind: BindFailed }` event, and returned.
    pub async fn bind(config: NetConfig, events: EventSender) -> Result<Self, NetError> {
        match TcpListener::bind(&config.server.listen_addr).await {
            Ok(listener) => {
                let port = listener.local_addr().map(|a| a.port()).unwrap_or(0);
                tracing::info!(addr = %config.server.listen_addr, port, "server listening");
                let _ = events.send(Event::ServerStarted { port });
                Ok(Self {
                    listener,
                    config,
                    events,
                })
            }
            Err(e) => {
                let _ = events.send(Event::Error {
                    kind: ErrorKind::BindFailed,
                    message: describe_bind_error(&config.server.listen_addr, &e),
                });
                Err(NetError::Bind(e))
            }
        }
    }

    /// Address the listener actually bound (useful with an ephemeral port).
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Run the accept loop until the shutdown signal fires, then stop
    /// accepting and disconnect every live peer.
    pub async fn run(self, registry: Arc<ConnectionRegistry>, mut shutdown: broadcast::Receiver<()>) {
        let (closed_tx, mut closed_rx) = mpsc::unbounded_channel::<SessionId>();
        let session_config = SessionConfig::peer(&self.config);

        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, addr)) => {
                            tracing::debug!(%addr, "accepted connection");
                            let session = PeerSession::from_accepted(
                                stream,
                                session_config.clone(),
                                self.events.clone(),
                                closed_tx.clone(),
                            );
                            registry.on_accepted(session).await;
                        }
                        Err(e) => {
                            tracing::warn!("accept failed: {e}");
                        }
                    }
                }
                Some(id) = closed_rx.recv() => {
                    registry.on_peer_disconnected(id).await;
                }
                _ = shutdown.recv() => {
                    tracing::info!("shutdown signal, stopping accept loop");
                    break;
                }
            }
        }

        registry.shutdown().await;
        let _ = self.events.send(Event::ServerStopped);
    }
}

fn describe_bind_error(addr: &str, e: &std::io::Error) -> String {
    use std::io::ErrorKind as IoKind;
    match e.kind() {
        IoKind::AddrInUse => format!("address {addr} is already in use; try another port"),
        IoKind::PermissionDenied => {
            format!("not permitted to bind {addr}; try a port above 1024")
        }
        _ => format!("failed to bind {addr}: {e}"),
    }
}
