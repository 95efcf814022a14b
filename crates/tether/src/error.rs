//! Unified error type for Tether.

use tether_protocol::ProtocolError;
use tether_session::SessionError;
use tether_transport::TransportError;

/// Top-level error that wraps all crate-specific errors.
///
/// When using the `tether` meta-crate, you deal with this single error
/// type instead of importing errors from each sub-crate. The `#[from]`
/// attribute on each variant generates the `From` impls, so `?` converts
/// sub-crate errors automatically.
#[derive(Debug, thiserror::Error)]
pub enum TetherError {
    /// A transport-level error (resolve, connect, I/O, HTTP).
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A protocol-level error (framing, encode, decode).
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// A session-level error (bad message, no transport, thread spawn).
    #[error(transparent)]
    Session(#[from] SessionError),

    /// The logging subscriber could not be installed.
    #[error("failed to install tracing subscriber: {0}")]
    Tracing(String),
}

#[cfg(test)]
mod tests {
    use tether_transport::TransportProtocol;

    use super::*;

    #[test]
    fn test_from_transport_error() {
        let err: TetherError = TransportError::ConnectionClosed.into();
        assert!(matches!(err, TetherError::Transport(_)));
        assert!(err.to_string().contains("closed"));
    }

    #[test]
    fn test_from_protocol_error() {
        let err: TetherError = ProtocolError::MissingHeader("LEN").into();
        assert!(matches!(err, TetherError::Protocol(_)));
        assert!(err.to_string().contains("LEN"));
    }

    #[test]
    fn test_from_session_error() {
        let err: TetherError = SessionError::NoTransport(TransportProtocol::Http).into();
        assert!(matches!(err, TetherError::Session(_)));
        assert_eq!(err.to_string(), "no http transport is attached");
    }
}
