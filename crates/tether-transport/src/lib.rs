//! Transports for Tether sessions.
//!
//! A transport owns one connection to the server over TCP, UDP or HTTP. Each
//! one runs as a task on the session's network thread and is driven through
//! its [`TransportHandle`]:
//!
//! ```text
//!  application thread              network thread
//!  ------------------              --------------
//!  TransportHandle::send ──queue──→ transport task ──bytes──→ socket
//!                                        │
//!  controller ←──────── TransportNotice ─┘
//! ```
//!
//! The task reports everything that happens (started, stopped, connect
//! failures, received messages) as [`TransportNotice`]s on a channel. It never
//! calls back into the session layer directly.

mod actor;
mod error;
mod handle;
mod ledger;
mod link;
mod option;

pub use error::TransportError;
pub use handle::{spawn_transport, TransportHandle};
pub use ledger::{seq_less, Ledger, SeqVerdict};
pub use option::{HttpOption, TcpOption, TransportOption, UdpOption, DEFAULT_CONNECT_TIMEOUT};

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tether_protocol::{Encoding, HeaderFields, MessageBody, SessionId};

/// The session id, shared between the controller (which sets it) and every
/// transport (which stamps it on outgoing messages).
pub type SharedSessionId = Arc<parking_lot::Mutex<SessionId>>;

// ---------------------------------------------------------------------------
// TransportId
// ---------------------------------------------------------------------------

/// Counter for generating unique transport IDs.
static NEXT_TRANSPORT_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identifier of one transport instance.
///
/// A protocol slot can be refilled (after a redirect, for example), so the
/// protocol alone does not say which instance a notice came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransportId(u64);

impl TransportId {
    /// Allocates the next id.
    pub fn next() -> Self {
        Self(NEXT_TRANSPORT_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the underlying `u64` value.
    pub fn into_inner(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TransportId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "transport-{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// TransportProtocol / TransportState
// ---------------------------------------------------------------------------

/// The wire protocol of a transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TransportProtocol {
    Tcp,
    Udp,
    Http,
}

impl TransportProtocol {
    /// Every protocol, in the order transports are started.
    pub const ALL: [Self; 3] = [Self::Tcp, Self::Udp, Self::Http];

    /// Slot index in a per-protocol array.
    pub fn index(self) -> usize {
        match self {
            Self::Tcp => 0,
            Self::Udp => 1,
            Self::Http => 2,
        }
    }
}

impl fmt::Display for TransportProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp => f.write_str("tcp"),
            Self::Udp => f.write_str("udp"),
            Self::Http => f.write_str("http"),
        }
    }
}

/// Connection lifecycle of a transport.
///
/// ```text
/// Disconnected → Connecting → Connected → Disconnecting → Disconnected
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransportState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

// ---------------------------------------------------------------------------
// TransportConfig
// ---------------------------------------------------------------------------

/// Everything a transport needs to know to connect.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub host: String,
    pub port: u16,
    pub encoding: Encoding,
    pub option: TransportOption,
    /// Session-level reliability. Only TCP honors it.
    pub reliability: bool,
    /// Stamp the session id only on the first message after each connect.
    pub send_session_id_only_once: bool,
}

impl TransportConfig {
    pub fn protocol(&self) -> TransportProtocol {
        self.option.protocol()
    }

    /// Whether this transport keeps a replay buffer and processes acks.
    pub fn is_reliable(&self) -> bool {
        self.reliability && self.protocol() == TransportProtocol::Tcp
    }

    /// Whether outgoing messages with `use_seq` get a sequence number.
    pub fn stamps_seq(&self) -> bool {
        self.is_reliable() || self.option.sequence_validation()
    }
}

// ---------------------------------------------------------------------------
// Notices
// ---------------------------------------------------------------------------

/// What happened on a transport.
#[derive(Debug, Clone, PartialEq)]
pub enum NoticeKind {
    /// Connected and ready to send.
    Started,
    /// Fully shut down after a stop.
    Stopped,
    /// A connect attempt failed.
    ConnectFailed,
    /// A connect attempt timed out.
    ConnectTimedOut,
    /// The peer closed the connection or it broke. A `Stopped` follows.
    Disconnected,
    /// A message arrived. Reliability fields are already removed.
    Received {
        header: HeaderFields,
        body: MessageBody,
    },
}

/// A notice from one transport instance.
#[derive(Debug, Clone, PartialEq)]
pub struct TransportNotice {
    pub id: TransportId,
    pub protocol: TransportProtocol,
    pub kind: NoticeKind,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_id_is_unique() {
        let a = TransportId::next();
        let b = TransportId::next();
        assert_ne!(a, b);
        assert!(b.into_inner() > a.into_inner());
    }

    #[test]
    fn test_transport_id_display() {
        let id = TransportId(7);
        assert_eq!(id.to_string(), "transport-7");
    }

    #[test]
    fn test_protocol_order_matches_index() {
        for (i, p) in TransportProtocol::ALL.iter().enumerate() {
            assert_eq!(p.index(), i);
        }
    }

    #[test]
    fn test_reliability_applies_to_tcp_only() {
        let mut config = TransportConfig {
            host: "localhost".into(),
            port: 1,
            encoding: Encoding::Json,
            option: TransportOption::default_for(TransportProtocol::Udp),
            reliability: true,
            send_session_id_only_once: false,
        };
        assert!(!config.is_reliable());
        config.option = TransportOption::default_for(TransportProtocol::Tcp);
        assert!(config.is_reliable());
        assert!(config.stamps_seq());
    }
}
