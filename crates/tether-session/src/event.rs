//! Events delivered to the application on `update()`.

use tether_protocol::{MessageBody, SessionId};
use tether_transport::TransportProtocol;

use crate::ErrorCode;

/// Something happened to the logical session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    /// The server assigned a session id (or confirmed it).
    Opened,
    /// The server closed the session; the id has been cleared.
    Closed,
    /// The server switched the session to a new id.
    Changed,
    /// The server asked the client to move to another host.
    RedirectStarted,
    /// The new host accepted the redirect token.
    RedirectSucceeded,
    /// The new host rejected the redirect token.
    RedirectFailed(ErrorCode),
}

/// Something happened to one transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportEvent {
    Started,
    Stopped,
    ConnectionFailed,
    ConnectionTimedOut,
    Disconnected,
}

/// A message type whose receive timeout expired.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RecvTimeoutKey {
    Name(String),
    Int(i32),
}

/// One entry of the task queue, dispatched to the matching handlers.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Session {
        protocol: TransportProtocol,
        event: SessionEvent,
        session_id: SessionId,
    },
    Transport {
        protocol: TransportProtocol,
        event: TransportEvent,
    },
    /// An application message (any type without a built-in meaning).
    Message {
        protocol: TransportProtocol,
        body: MessageBody,
    },
    Maintenance {
        protocol: TransportProtocol,
        body: MessageBody,
    },
    RecvTimeout(RecvTimeoutKey),
}
