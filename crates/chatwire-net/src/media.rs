//! Collaborator-facing media interfaces.
//!
//! File and image bytes enter the engine through these traits; where they
//! come from (disk, clipboard, a test fixture) is the embedding
//! application's concern, as is whether a received payload gets saved.
//! Images must be handed over already re-encoded to PNG -- the wire format
//! admits no other image encoding.

use std::path::Path;

use chatwire_protocol::Message;

#[derive(Debug, thiserror::Error)]
pub enum MediaError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("not a decodable image: {0}")]
    UnsupportedImage(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// An outgoing file: raw bytes plus the metadata declared to the peer.
#[derive(Debug, Clone)]
pub struct OutgoingFile {
    pub name: String,
    pub extension: String,
    pub bytes: Vec<u8>,
}

impl OutgoingFile {
    pub fn into_message(self) -> Message {
        Message::file(self.name, self.extension, self.bytes)
    }
}

/// An outgoing image, already re-encoded to PNG.
#[derive(Debug, Clone)]
pub struct OutgoingImage {
    pub name: String,
    pub png_bytes: Vec<u8>,
}

impl OutgoingImage {
    pub fn into_message(self) -> Message {
        Message::image(self.name, self.png_bytes)
    }
}

/// Supplies outgoing file and image content.
pub trait MediaSource: Send + Sync {
    /// Read a file's bytes and declared metadata.
    fn load_file(&self, path: &Path) -> Result<OutgoingFile, MediaError>;

    /// Read an image, decode it, and re-encode to PNG. Fails when the
    /// bytes are not a decodable image.
    fn load_image(&self, path: &Path) -> Result<OutgoingImage, MediaError>;
}

/// Persists received file and image payloads. Invoked by the consumer only
/// after a received-file/image event, if it chooses to save.
pub trait MediaSink: Send + Sync {
    fn save(&self, name: &str, bytes: &[u8]) -> Result<(), MediaError>;
}
