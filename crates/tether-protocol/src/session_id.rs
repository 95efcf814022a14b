//! Session identifier.
//!
//! The server hands out one id per session. JSON bodies carry it as a
//! UUID string, Protobuf bodies as raw bytes, so a [`SessionId`] keeps both
//! forms around and the transport stamps whichever one its encoding needs.

use std::fmt;

use crate::Encoding;

/// Byte positions after which a dash is inserted when rendering 16 raw
/// bytes as UUID text.
const UUID_DASH_AFTER: [usize; 4] = [3, 5, 7, 9];
/// Character positions of the dashes in UUID text.
const UUID_DASH_AT: [usize; 4] = [8, 13, 18, 23];
const UUID_TEXT_LEN: usize = 36;

/// The session id in text and byte form. Empty until the server assigns one.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionId {
    text: String,
    bytes: Vec<u8>,
}

impl SessionId {
    /// An empty (unassigned) id.
    pub fn new() -> Self {
        Self::default()
    }

    /// An id received in a JSON body. Both forms hold the text.
    pub fn from_text(text: impl Into<String>) -> Self {
        let text = text.into();
        Self {
            bytes: text.as_bytes().to_vec(),
            text,
        }
    }

    /// An id received in a Protobuf body.
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        let bytes = bytes.into();
        Self {
            text: uuid_text_from_bytes(&bytes),
            bytes,
        }
    }

    /// Whether the server has not assigned an id yet.
    pub fn is_empty(&self) -> bool {
        self.text.is_empty() && self.bytes.is_empty()
    }

    /// The UUID text form.
    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// The raw byte form.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Whether `other`, received with `encoding`, names a different session.
    ///
    /// A Protobuf id that matches in content but not in length (the server
    /// sent text bytes once and raw bytes later) is not a change.
    pub fn differs_from(&self, other: &SessionId, encoding: Encoding) -> bool {
        match encoding {
            Encoding::Json => self.text != other.text,
            Encoding::Protobuf => {
                if self.bytes.len() != other.bytes.len() {
                    return self.text != other.text;
                }
                self.bytes != other.bytes
            }
        }
    }

    /// Clears both forms.
    pub fn clear(&mut self) {
        self.text.clear();
        self.bytes.clear();
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

/// Renders raw session-id bytes as UUID text.
///
/// Bytes that are already dashed UUID text are returned unchanged.
/// Anything else becomes lowercase hex with dashes after the 4th, 6th, 8th
/// and 10th byte.
pub fn uuid_text_from_bytes(bytes: &[u8]) -> String {
    if looks_like_uuid_text(bytes) {
        return String::from_utf8_lossy(bytes).into_owned();
    }

    let mut text = String::with_capacity(bytes.len() * 2 + UUID_DASH_AFTER.len());
    for (i, byte) in bytes.iter().enumerate() {
        text.push_str(&format!("{byte:02x}"));
        if UUID_DASH_AFTER.contains(&i) && i + 1 < bytes.len() {
            text.push('-');
        }
    }
    text
}

fn looks_like_uuid_text(bytes: &[u8]) -> bool {
    bytes.len() == UUID_TEXT_LEN && UUID_DASH_AT.iter().all(|&i| bytes[i] == b'-')
}

#[cfg(test)]
mod tests {
    use super::*;

    const RAW: [u8; 16] = [
        0x12, 0x34, 0x56, 0x78, 0x9a, 0xbc, 0xde, 0xf0, 0x01, 0x23, 0x45, 0x67, 0x89, 0xab,
        0xcd, 0xef,
    ];

    #[test]
    fn test_uuid_text_from_raw_bytes() {
        assert_eq!(
            uuid_text_from_bytes(&RAW),
            "12345678-9abc-def0-0123-456789abcdef"
        );
    }

    #[test]
    fn test_uuid_text_passes_through_dashed_text() {
        let text = "12345678-9abc-def0-0123-456789abcdef";
        assert_eq!(uuid_text_from_bytes(text.as_bytes()), text);
    }

    #[test]
    fn test_from_text_fills_both_forms() {
        let id = SessionId::from_text("abc");
        assert_eq!(id.as_str(), "abc");
        assert_eq!(id.as_bytes(), b"abc");
    }

    #[test]
    fn test_differs_from_ignores_length_only_mismatch() {
        let raw = SessionId::from_bytes(RAW.to_vec());
        let text = SessionId::from_bytes(raw.as_str().as_bytes().to_vec());
        assert!(!raw.differs_from(&text, Encoding::Protobuf));
    }

    #[test]
    fn test_differs_from_detects_new_session() {
        let a = SessionId::from_text("a");
        let b = SessionId::from_text("b");
        assert!(a.differs_from(&b, Encoding::Json));
        assert!(!a.differs_from(&a.clone(), Encoding::Json));
    }

    #[test]
    fn test_clear_makes_id_empty() {
        let mut id = SessionId::from_bytes(RAW.to_vec());
        assert!(!id.is_empty());
        id.clear();
        assert!(id.is_empty());
    }
}
