//! Configuration for the connection layer.
//!
//! Encodings and timeouts are explicit constructor inputs, not process
//! globals. Parsed from TOML when a file is used.

use std::path::Path;
use std::time::Duration;

use chatwire_protocol::encoding::DEFAULT_LEGACY_LABEL;
use chatwire_protocol::{RecvEncoding, SendEncoding};
use serde::{Deserialize, Serialize};

/// Bounded wait for a client-initiated disconnect before hard abort.
pub const CLIENT_DISCONNECT_TIMEOUT_MS: u64 = 3000;
/// Bounded wait for each server-initiated per-peer disconnect.
pub const PEER_DISCONNECT_TIMEOUT_MS: u64 = 1000;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct NetConfig {
    #[serde(default)]
    pub encoding: EncodingSection,
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub session: SessionSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncodingSection {
    #[serde(default)]
    pub send: SendEncoding,
    #[serde(default)]
    pub recv: RecvEncoding,
    #[serde(default = "default_legacy_codec")]
    pub legacy_codec: String,
}

impl Default for EncodingSection {
    fn default() -> Self {
        Self {
            send: SendEncoding::default(),
            recv: RecvEncoding::default(),
            legacy_codec: default_legacy_codec(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSection {
    #[serde(default = "default_client_timeout")]
    pub client_disconnect_timeout_ms: u64,
    #[serde(default = "default_peer_timeout")]
    pub peer_disconnect_timeout_ms: u64,
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            client_disconnect_timeout_ms: default_client_timeout(),
            peer_disconnect_timeout_ms: default_peer_timeout(),
        }
    }
}

// Default value functions
fn default_legacy_codec() -> String {
    DEFAULT_LEGACY_LABEL.into()
}
fn default_listen_addr() -> String {
    "0.0.0.0:9400".into()
}
fn default_client_timeout() -> u64 {
    CLIENT_DISCONNECT_TIMEOUT_MS
}
fn default_peer_timeout() -> u64 {
    PEER_DISCONNECT_TIMEOUT_MS
}

impl NetConfig {
    /// Load config from file, or fall back to defaults if missing.
    pub fn load_or_default(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: NetConfig = toml::from_str(&content)?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }
}

/// Per-session knobs derived from [`NetConfig`].
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub send_encoding: SendEncoding,
    pub recv_encoding: RecvEncoding,
    pub legacy_codec: String,
    pub disconnect_timeout: Duration,
}

impl SessionConfig {
    /// Knobs for the single-link client session (3000 ms disconnect bound).
    pub fn client(cfg: &NetConfig) -> Self {
        Self {
            send_encoding: cfg.encoding.send,
            recv_encoding: cfg.encoding.recv,
            legacy_codec: cfg.encoding.legacy_codec.clone(),
            disconnect_timeout: Duration::from_millis(cfg.session.client_disconnect_timeout_ms),
        }
    }

    /// Knobs for a server-accepted session (1000 ms disconnect bound).
    pub fn peer(cfg: &NetConfig) -> Self {
        Self {
            send_encoding: cfg.encoding.send,
            recv_encoding: cfg.encoding.recv,
            legacy_codec: cfg.encoding.legacy_codec.clone(),
            disconnect_timeout: Duration::from_millis(cfg.session.peer_disconnect_timeout_ms),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::client(&NetConfig::default())
    }
}
