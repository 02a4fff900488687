//! Tagged wire messages -- Text, File, Image.
//!
//! One logical frame carries one message as text. Files and images are
//! bracket-tagged with pipe-delimited metadata and a base64 payload:
//!
//! ```text
//! [FILE]name|size|extension|base64
//! [IMAGE]name|size|PNG|base64
//! ```
//!
//! base64's alphabet excludes `|`, so a payload can never introduce a stray
//! delimiter. That property must survive any change to the payload encoding.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;

use crate::ProtocolError;

/// Tag prefix for file transfer messages.
pub const FILE_TAG: &str = "[FILE]";
/// Tag prefix for image transfer messages.
pub const IMAGE_TAG: &str = "[IMAGE]";
/// Images are re-encoded to PNG before transmission; the wire format field
/// always carries this.
pub const IMAGE_FORMAT: &str = "PNG";

/// A decoded wire message.
///
/// `size` is the sender's declared byte count. It is advisory metadata,
/// never checked against `payload.len()`; a mismatch is a data-integrity
/// concern for the consumer, not a transport error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Text {
        body: String,
    },
    File {
        name: String,
        size: i64,
        extension: String,
        payload: Vec<u8>,
    },
    Image {
        name: String,
        size: i64,
        format: String,
        payload: Vec<u8>,
    },
}

impl Message {
    pub fn text(body: impl Into<String>) -> Self {
        Message::Text { body: body.into() }
    }

    /// Build a file message, declaring the payload's current length.
    pub fn file(name: impl Into<String>, extension: impl Into<String>, payload: Vec<u8>) -> Self {
        Message::File {
            name: name.into(),
            size: payload.len() as i64,
            extension: extension.into(),
            payload,
        }
    }

    /// Build an image message from bytes already re-encoded to PNG.
    pub fn image(name: impl Into<String>, png_payload: Vec<u8>) -> Self {
        Message::Image {
            name: name.into(),
            size: png_payload.len() as i64,
            format: IMAGE_FORMAT.to_owned(),
            payload: png_payload,
        }
    }

    /// Classify decoded text as one of the three message shapes.
    ///
    /// Anything without a recognized tag is plain text. A tagged message
    /// with fewer than 4 pipe-delimited fields, or with malformed base64,
    /// is a format error -- the whole message is discarded, never partially
    /// delivered as degraded text.
    pub fn classify(text: &str) -> Result<Message, ProtocolError> {
        if let Some(rest) = text.strip_prefix(FILE_TAG) {
            let (name, size, extension, payload) = parse_tagged(rest)?;
            Ok(Message::File {
                name,
                size,
                extension,
                payload,
            })
        } else if let Some(rest) = text.strip_prefix(IMAGE_TAG) {
            let (name, size, format, payload) = parse_tagged(rest)?;
            Ok(Message::Image {
                name,
                size,
                format,
                payload,
            })
        } else {
            Ok(Message::Text {
                body: text.to_owned(),
            })
        }
    }

    /// Render the wire text for this message.
    pub fn to_wire_text(&self) -> String {
        match self {
            Message::Text { body } => body.clone(),
            Message::File {
                name,
                size,
                extension,
                payload,
            } => format!("{FILE_TAG}{name}|{size}|{extension}|{}", BASE64.encode(payload)),
            // The stored format string is ignored on the wire: images are
            // re-encoded to PNG before they get here.
            Message::Image {
                name,
                size,
                payload,
                ..
            } => format!("{IMAGE_TAG}{name}|{size}|{IMAGE_FORMAT}|{}", BASE64.encode(payload)),
        }
    }
}

/// Split tagged metadata. Empty fields are kept and fields past the fourth
/// are ignored. A non-numeric size parses as 0 (declared size is advisory).
fn parse_tagged(rest: &str) -> Result<(String, i64, String, Vec<u8>), ProtocolError> {
    let parts: Vec<&str> = rest.split('|').collect();
    if parts.len() < 4 {
        return Err(ProtocolError::TruncatedTagged { got: parts.len() });
    }
    let size = parts[1].parse::<i64>().unwrap_or(0);
    let payload = BASE64.decode(parts[3])?;
    Ok((parts[0].to_owned(), size, parts[2].to_owned(), payload))
}
