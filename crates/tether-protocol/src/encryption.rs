//! Encryption hooks.
//!
//! The cipher implementations themselves live outside this workspace. A
//! transport only needs the contract below: transform body bytes on the way
//! out and back in, optionally add header fields, and accept handshake
//! frames (empty bodies). [`PassThrough`] is the built-in hook and leaves
//! every byte untouched.

use std::sync::Arc;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{HeaderFields, ProtocolError};

/// Header field naming the encryption applied to a body.
pub const ENCRYPTION_FIELD: &str = "ENC";

/// Cipher selected in a transport option.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum EncryptionType {
    #[default]
    None = 0,
    Default = 100,
    Dummy = 101,
    IFunEngine1 = 102,
    IFunEngine2 = 103,
    ChaCha20 = 104,
    Aes128 = 105,
}

impl EncryptionType {
    /// Whether the transport must exchange a handshake (an empty frame)
    /// right after connecting.
    pub fn needs_handshake(self) -> bool {
        self != Self::None
    }

    /// The numeric value written on the wire.
    pub fn wire_value(self) -> u8 {
        self as u8
    }
}

/// Per-transport body transformation.
///
/// A hook instance belongs to exactly one transport and is only ever called
/// from that transport's task, so methods take `&mut self`.
pub trait EncryptionHook: Send {
    /// The cipher this hook implements.
    fn encryption_type(&self) -> EncryptionType;

    /// Whether a handshake is required after connecting.
    fn needs_handshake(&self) -> bool {
        self.encryption_type().needs_handshake()
    }

    /// Encrypts an outgoing body. May add fields to `header`.
    ///
    /// # Errors
    /// [`ProtocolError::Encryption`] if the body cannot be encrypted yet
    /// (for example before the handshake finished).
    fn encrypt(&mut self, header: &mut HeaderFields, body: Vec<u8>) -> Result<Vec<u8>, ProtocolError>;

    /// Decrypts an inbound body.
    ///
    /// # Errors
    /// [`ProtocolError::Encryption`] on a corrupt body.
    fn decrypt(&mut self, header: &HeaderFields, body: Bytes) -> Result<Bytes, ProtocolError>;

    /// Consumes a handshake frame (a frame with an empty body).
    ///
    /// # Errors
    /// [`ProtocolError::Encryption`] if the handshake is rejected.
    fn on_handshake(&mut self, header: &HeaderFields) -> Result<(), ProtocolError> {
        let _ = header;
        Ok(())
    }
}

/// Builds one hook per transport from the option's [`EncryptionType`].
pub type EncryptionFactory = Arc<dyn Fn(EncryptionType) -> Box<dyn EncryptionHook> + Send + Sync>;

/// The default factory: a [`PassThrough`] for every type.
pub fn pass_through_factory() -> EncryptionFactory {
    Arc::new(|ty| Box::new(PassThrough::new(ty)))
}

/// A hook that copies bytes through unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassThrough {
    encryption: EncryptionType,
}

impl PassThrough {
    pub fn new(encryption: EncryptionType) -> Self {
        Self { encryption }
    }
}

impl EncryptionHook for PassThrough {
    fn encryption_type(&self) -> EncryptionType {
        self.encryption
    }

    fn encrypt(&mut self, header: &mut HeaderFields, body: Vec<u8>) -> Result<Vec<u8>, ProtocolError> {
        if self.encryption != EncryptionType::None {
            header.insert(ENCRYPTION_FIELD, self.encryption.wire_value().to_string());
        }
        Ok(body)
    }

    fn decrypt(&mut self, _header: &HeaderFields, body: Bytes) -> Result<Bytes, ProtocolError> {
        Ok(body)
    }

    fn on_handshake(&mut self, header: &HeaderFields) -> Result<(), ProtocolError> {
        debug!(encryption = ?self.encryption, fields = header.len(), "handshake frame");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_none_skips_handshake() {
        assert!(!EncryptionType::None.needs_handshake());
        assert!(EncryptionType::ChaCha20.needs_handshake());
    }

    #[test]
    fn test_pass_through_keeps_body_and_tags_header() {
        let mut hook = PassThrough::new(EncryptionType::Aes128);
        let mut header = HeaderFields::new();
        let out = hook.encrypt(&mut header, b"abc".to_vec()).unwrap();
        assert_eq!(out, b"abc");
        assert_eq!(header.get(ENCRYPTION_FIELD), Some("105"));
    }

    #[test]
    fn test_pass_through_without_encryption_leaves_header_alone() {
        let mut hook = PassThrough::default();
        let mut header = HeaderFields::new();
        hook.encrypt(&mut header, Vec::new()).unwrap();
        assert!(header.is_empty());
    }
}
