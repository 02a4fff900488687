//! Connection registry -- ordered set of live server-side sessions.
//!
//! Insertion order is acceptance order. Identity strings address peers but
//! are not guaranteed unique, so lookups take the first match and removal
//! keys on [`SessionId`].

use std::path::Path;
use std::sync::Arc;

use bytes::Bytes;
use chatwire_protocol::{EncodingResolver, Message, SendEncoding};
use tokio::sync::RwLock;
use tokio::task::JoinSet;

use crate::config::EncodingSection;
use crate::event::{Event, EventSender};
use crate::media::{MediaError, MediaSource};
use crate::session::{PeerSession, SessionId};

pub struct ConnectionRegistry {
    peers: RwLock<Vec<Arc<PeerSession>>>,
    resolver: EncodingResolver,
    send_encoding: SendEncoding,
    events: EventSender,
}

impl ConnectionRegistry {
    pub fn new(encoding: &EncodingSection, events: EventSender) -> Self {
        Self {
            peers: RwLock::new(Vec::new()),
            resolver: EncodingResolver::new(&encoding.legacy_codec),
            send_encoding: encoding.send,
            events,
        }
    }

    /// Register a freshly accepted session and announce it.
    pub async fn on_accepted(&self, session: Arc<PeerSession>) {
        let identity = session.identity().to_owned();
        let count = {
            let mut peers = self.peers.write().await;
            peers.push(session);
            peers.len()
        };
        tracing::info!(peer = %identity, peer_count = count, "registry: peer added");
        let _ = self.events.send(Event::PeerConnected { peer: identity });
    }

    /// Drop a session from the live set. Idempotent: an id that is not
    /// present is a silent no-op.
    pub async fn on_peer_disconnected(&self, id: SessionId) {
        let removed = {
            let mut peers = self.peers.write().await;
            peers
                .iter()
                .position(|s| s.id() == id)
                .map(|idx| peers.remove(idx))
        };
        if let Some(session) = removed {
            tracing::info!(peer = %session.identity(), "registry: peer removed");
            let _ = self.events.send(Event::PeerDisconnected {
                peer: session.identity().to_owned(),
            });
        }
    }

    /// Send to every connected peer.
    ///
    /// The message is serialized and encoded once (send encoding is a
    /// registry-wide setting); peers that are not Connected are skipped,
    /// not treated as an error.
    pub async fn broadcast(&self, msg: &Message) {
        let frame = self.encode_frame(msg);
        let peers = self.peers.read().await.clone();
        for session in &peers {
            if session.is_connected().await {
                session.send_frame(frame.clone());
            }
        }
    }

    /// Addressed send: first identity match, silent no-op when absent.
    pub async fn send_to(&self, identity: &str, msg: &Message) {
        let target = {
            let peers = self.peers.read().await;
            peers.iter().find(|s| s.identity() == identity).cloned()
        };
        match target {
            Some(session) => {
                if session.is_connected().await {
                    session.send_frame(self.encode_frame(msg));
                }
            }
            None => {
                tracing::debug!(peer = identity, "registry: addressed send to unknown peer dropped");
            }
        }
    }

    /// Broadcast a file loaded through the collaborator's media source.
    pub async fn broadcast_file(
        &self,
        source: &dyn MediaSource,
        path: &Path,
    ) -> Result<(), MediaError> {
        let file = source.load_file(path)?;
        self.broadcast(&file.into_message()).await;
        Ok(())
    }

    /// Broadcast an image (re-encoded to PNG by the source).
    pub async fn broadcast_image(
        &self,
        source: &dyn MediaSource,
        path: &Path,
    ) -> Result<(), MediaError> {
        let image = source.load_image(path)?;
        self.broadcast(&image.into_message()).await;
        Ok(())
    }

    /// Send a file to one addressed peer.
    pub async fn send_file_to(
        &self,
        identity: &str,
        source: &dyn MediaSource,
        path: &Path,
    ) -> Result<(), MediaError> {
        let file = source.load_file(path)?;
        self.send_to(identity, &file.into_message()).await;
        Ok(())
    }

    /// Send an image to one addressed peer.
    pub async fn send_image_to(
        &self,
        identity: &str,
        source: &dyn MediaSource,
        path: &Path,
    ) -> Result<(), MediaError> {
        let image = source.load_image(path)?;
        self.send_to(identity, &image.into_message()).await;
        Ok(())
    }

    /// Identity strings of live peers, in acceptance order.
    pub async fn peers(&self) -> Vec<String> {
        self.peers
            .read()
            .await
            .iter()
            .map(|s| s.identity().to_owned())
            .collect()
    }

    pub async fn peer_count(&self) -> usize {
        self.peers.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.peers.read().await.is_empty()
    }

    /// Disconnect every live peer and clear the set.
    ///
    /// Each disconnect honors the per-peer 1000 ms bound; the waits run in
    /// parallel so total shutdown latency is one timeout, not one per peer.
    pub async fn shutdown(&self) {
        let peers: Vec<_> = self.peers.write().await.drain(..).collect();
        if peers.is_empty() {
            return;
        }
        tracing::info!(peer_count = peers.len(), "registry: disconnecting all peers");
        let mut waits = JoinSet::new();
        for session in peers {
            waits.spawn(async move { session.disconnect().await });
        }
        while waits.join_next().await.is_some() {}
    }

    fn encode_frame(&self, msg: &Message) -> Bytes {
        Bytes::from(self.resolver.encode(&msg.to_wire_text(), self.send_encoding))
    }
}
