//! Encoding resolver -- best-effort text decoding across UTF-8 and legacy
//! Chinese codecs.
//!
//! The wire carries no encoding tag. In AUTO receive mode the resolver runs
//! a fixed cascade and treats "the result contains U+FFFD" as the failure
//! signal for each attempt. The cascade is a heuristic, not a guarantee:
//! bytes that happen to decode cleanly under an early codec short-circuit
//! and are never reconsidered under a later one.

use encoding_rs::{Encoding, BIG5, GB18030, GBK, UTF_8};
use serde::{Deserialize, Serialize};

/// Codec label used when no legacy codec is configured.
pub const DEFAULT_LEGACY_LABEL: &str = "GBK";

/// U+FFFD, the per-attempt failure signal for the cascade.
const REPLACEMENT: char = '\u{FFFD}';

/// Send-direction encoding. Auto-detection is receive-only, so it is not a
/// variant here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SendEncoding {
    Utf8,
    #[default]
    Legacy,
}

/// Receive-direction encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RecvEncoding {
    Utf8,
    Legacy,
    #[default]
    Auto,
}

/// Resolves raw bytes to text and text back to bytes.
///
/// Holds the configured legacy codec. Construction never fails: an unknown
/// label recovers to UTF-8 and the caller never sees the failure.
#[derive(Debug, Clone, Copy)]
pub struct EncodingResolver {
    legacy: &'static Encoding,
}

impl Default for EncodingResolver {
    fn default() -> Self {
        Self::new(DEFAULT_LEGACY_LABEL)
    }
}

impl EncodingResolver {
    /// Resolve the legacy codec from a label ("GBK", "GB18030", "Big5", ...).
    pub fn new(legacy_label: &str) -> Self {
        let legacy = match Encoding::for_label(legacy_label.as_bytes()) {
            Some(enc) => enc,
            None => {
                tracing::warn!(
                    label = legacy_label,
                    "unknown legacy codec label, falling back to UTF-8"
                );
                UTF_8
            }
        };
        Self { legacy }
    }

    /// Canonical name of the resolved legacy codec.
    pub fn legacy_name(&self) -> &'static str {
        self.legacy.name()
    }

    /// Decode under a fixed receive mode, or run the cascade for Auto.
    ///
    /// Forced modes are single-codec operations; replacement characters are
    /// permitted in their output.
    pub fn decode(&self, bytes: &[u8], mode: RecvEncoding) -> String {
        match mode {
            RecvEncoding::Utf8 => String::from_utf8_lossy(bytes).into_owned(),
            RecvEncoding::Legacy => {
                let (text, _) = self.legacy.decode_without_bom_handling(bytes);
                text.into_owned()
            }
            RecvEncoding::Auto => self.decode_auto(bytes),
        }
    }

    /// Auto-detect cascade: strict UTF-8, then GB18030, then GBK and Big5,
    /// then an unconditional lossy fallback. First clean decode wins.
    pub fn decode_auto(&self, bytes: &[u8]) -> String {
        if let Some(text) = decode_clean(UTF_8, bytes) {
            return text;
        }
        if let Some(text) = decode_clean(GB18030, bytes) {
            return text;
        }
        // Remaining legacy codecs in priority order. The WHATWG encoding
        // standard folds the GB2312 label into GBK, so the historical
        // {GBK, GB2312, Big5} list collapses to two entries.
        for enc in [GBK, BIG5] {
            if let Some(text) = decode_clean(enc, bytes) {
                return text;
            }
        }
        // Last resort, accepted unconditionally.
        String::from_utf8_lossy(bytes).into_owned()
    }

    /// Encode for sending. Never fails: unmappable characters are
    /// substituted by the codec rather than rejected.
    pub fn encode(&self, text: &str, mode: SendEncoding) -> Vec<u8> {
        match mode {
            SendEncoding::Utf8 => text.as_bytes().to_vec(),
            SendEncoding::Legacy => {
                let (bytes, _, _) = self.legacy.encode(text);
                bytes.into_owned()
            }
        }
    }
}

/// Decode under one codec; `None` if the result contains U+FFFD.
fn decode_clean(enc: &'static Encoding, bytes: &[u8]) -> Option<String> {
    let (text, _) = enc.decode_without_bom_handling(bytes);
    if text.contains(REPLACEMENT) {
        None
    } else {
        Some(text.into_owned())
    }
}
