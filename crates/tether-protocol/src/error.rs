//! Error types for the protocol layer.
//!
//! A `ProtocolError` always means the bytes themselves are wrong: a header
//! that can't be parsed, a body that isn't the encoding it claims to be, or a
//! reserved field with the wrong type. Transports treat every one of these as
//! a protocol violation and stop.

/// Errors that can occur while framing or decoding messages.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// A header line could not be parsed.
    #[error("malformed header: {0}")]
    MalformedHeader(String),

    /// A required header field is absent.
    #[error("missing header field {0}")]
    MissingHeader(&'static str),

    /// The peer speaks a different protocol version.
    #[error("unsupported protocol version {0}")]
    UnsupportedVersion(String),

    /// A JSON body could not be parsed or produced.
    #[error("json body: {0}")]
    Json(#[from] serde_json::Error),

    /// A JSON body parsed, but is not an object.
    #[error("json body is not an object")]
    NotAnObject,

    /// A Protobuf body could not be decoded.
    #[error("protobuf body: {0}")]
    Protobuf(#[from] prost::DecodeError),

    /// A reserved field carries a value of the wrong type.
    #[error("invalid reserved field {field}: {reason}")]
    InvalidField {
        /// The reserved field name.
        field: &'static str,
        /// What was wrong with it.
        reason: String,
    },

    /// The encryption hook rejected the message.
    #[error("encryption failed: {0}")]
    Encryption(String),
}
