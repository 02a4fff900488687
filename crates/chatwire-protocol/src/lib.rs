//! Chatwire Protocol -- encoding resolver, tagged messages, frame codec.
//!
//! Three layers, bottom up: a 4-byte big-endian length prefix frames each
//! logical message on the TCP stream; framed bytes decode to text through
//! the encoding resolver; the text classifies as Text, File, or Image via
//! the bracket-tag format.

pub mod codec;
pub mod encoding;
pub mod message;

pub use codec::FrameCodec;
pub use encoding::{EncodingResolver, RecvEncoding, SendEncoding};
pub use message::Message;

/// Maximum frame size: 16 MB (base64 file payloads get large).
pub const MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("tagged message has {got} of 4 required fields")]
    TruncatedTagged { got: usize },
    #[error("invalid base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: usize, max: usize },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
