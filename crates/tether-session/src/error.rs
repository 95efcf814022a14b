//! Error types for the session layer.

use tether_protocol::{Encoding, ProtocolError};
use tether_transport::TransportProtocol;

/// Errors returned synchronously by [`Session`](crate::Session) calls.
///
/// Anything that goes wrong on the network thread arrives as an event
/// instead; these only cover misuse of the API itself.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The message body could not be built (bad JSON, not an object).
    #[error("invalid message: {0}")]
    InvalidMessage(#[from] ProtocolError),

    /// No transport is attached for the requested protocol.
    #[error("no {0} transport is attached")]
    NoTransport(TransportProtocol),

    /// Nothing has been connected yet, so there is no default protocol.
    #[error("no transport is attached")]
    NoDefaultTransport,

    /// The options passed to `connect` are for another protocol.
    #[error("{option} options cannot configure a {protocol} transport")]
    OptionMismatch {
        protocol: TransportProtocol,
        option: TransportProtocol,
    },

    /// The body's encoding does not match the transport's.
    #[error("{protocol} transport speaks {expected}, message is {actual}")]
    EncodingMismatch {
        protocol: TransportProtocol,
        expected: Encoding,
        actual: Encoding,
    },

    /// The network thread could not be started.
    #[error("failed to start the network thread: {0}")]
    NetworkThread(#[source] std::io::Error),
}

/// Why a redirect failed. Carried by
/// [`SessionEvent::RedirectFailed`](crate::SessionEvent::RedirectFailed).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, thiserror::Error)]
pub enum ErrorCode {
    /// The redirect token timed out before the client presented it.
    #[error("redirect token expired")]
    RedirectConnectExpired,

    /// The new host did not recognize the token.
    #[error("redirect token is invalid")]
    RedirectConnectInvalidToken,

    /// The new host rejected the client's credentials.
    #[error("redirect authentication failed")]
    RedirectConnectAuthFailed,

    /// The server answered with a result code this client does not know.
    #[error("redirect rejected with result {0}")]
    RedirectConnectRejected(i32),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_error_display_names_protocol() {
        let err = SessionError::NoTransport(TransportProtocol::Udp);
        assert_eq!(err.to_string(), "no udp transport is attached");

        let err = SessionError::OptionMismatch {
            protocol: TransportProtocol::Tcp,
            option: TransportProtocol::Http,
        };
        assert_eq!(err.to_string(), "http options cannot configure a tcp transport");
    }

    #[test]
    fn test_session_error_from_protocol_error() {
        let err: SessionError = ProtocolError::NotAnObject.into();
        assert!(matches!(err, SessionError::InvalidMessage(_)));
    }
}
