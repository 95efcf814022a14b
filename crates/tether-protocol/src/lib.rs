//! Wire protocol for Tether.
//!
//! This crate defines what travels between the client and the server:
//!
//! - **Framing** ([`HeaderFields`], [`encode_frame`], [`FrameDecoder`]):
//!   the `KEY:VALUE` header block and length-prefixed body.
//! - **Bodies** ([`MessageBody`], [`FunMessage`], [`Encoding`]): JSON objects
//!   or Protobuf messages, with accessors for the reserved fields.
//! - **Session ids** ([`SessionId`]): the text and byte forms of the id.
//! - **Encryption hooks** ([`EncryptionHook`], [`PassThrough`]): the contract
//!   a cipher implements to plug into a transport.
//! - **Errors** ([`ProtocolError`]).
//!
//! # Architecture
//!
//! The protocol layer knows nothing about sockets or sessions. It turns bytes
//! into frames and frames into bodies, and back.
//!
//! ```text
//! Transport (bytes) -> Protocol (Frame -> MessageBody) -> Session (dispatch)
//! ```

// ---------------------------------------------------------------------------
// Module declarations
// ---------------------------------------------------------------------------

pub mod control;
mod encryption;
mod error;
mod framing;
mod fun_message;
pub mod message;
mod session_id;

// ---------------------------------------------------------------------------
// Re-exports
// ---------------------------------------------------------------------------

pub use encryption::{
    pass_through_factory, EncryptionFactory, EncryptionHook, EncryptionType, PassThrough,
    ENCRYPTION_FIELD,
};
pub use error::ProtocolError;
pub use framing::{
    decode_frames, encode_frame, Frame, FrameDecoder, HeaderFields, LENGTH_FIELD,
    PLUGIN_VERSION, PLUGIN_VERSION_FIELD, PROTOCOL_VERSION, VERSION_FIELD,
};
pub use fun_message::{
    FunMaintenanceMessage, FunMessage, FunPingMessage, FunRedirectConnectMessage,
    FunRedirectMessage, RedirectConnectResult, RedirectEncoding, RedirectProtocol, ServerPort,
};
pub use message::{msg_type, Encoding, MessageBody, OutgoingMessage, Sequencing};
pub use session_id::{uuid_text_from_bytes, SessionId};
