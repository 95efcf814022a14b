use tether_protocol::ProtocolError;

/// Errors that can occur in the transport layer.
///
/// None of these cross into the session layer as `Err` values: the transport
/// task logs them and turns them into notices. They exist so the code in
/// between can use `?`.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The host name did not resolve to any address.
    #[error("could not resolve {host}: {source}")]
    Resolve {
        host: String,
        #[source]
        source: std::io::Error,
    },

    /// The host name resolved to an empty address list.
    #[error("no addresses for {0}")]
    NoAddresses(String),

    /// Opening the connection failed.
    #[error("connect failed: {0}")]
    ConnectFailed(#[source] std::io::Error),

    /// Opening the connection took longer than the configured timeout.
    #[error("connect timed out")]
    ConnectTimedOut,

    /// Sending data failed.
    #[error("send failed: {0}")]
    SendFailed(#[source] std::io::Error),

    /// Receiving data failed.
    #[error("receive failed: {0}")]
    ReceiveFailed(#[source] std::io::Error),

    /// The peer closed the connection.
    #[error("connection closed by peer")]
    ConnectionClosed,

    /// An HTTP request failed or returned an error status.
    #[error("http: {0}")]
    Http(#[from] reqwest::Error),

    /// The CA certificate for HTTPS could not be loaded.
    #[error("ca certificate {path}: {reason}")]
    Certificate { path: String, reason: String },

    /// The peer sent bytes that break the protocol.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// An inbound seq skipped ahead.
    #[error("sequence gap: expected {expected}, got {got}")]
    SequenceGap { expected: u32, got: u32 },

    /// The transport task is gone.
    #[error("transport shut down")]
    Shutdown,
}
