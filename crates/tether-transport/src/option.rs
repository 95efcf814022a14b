//! Per-protocol transport options.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tether_protocol::EncryptionType;

use crate::TransportProtocol;

/// Default time allowed for a connection (or HTTP request) to open.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

// ---------------------------------------------------------------------------
// TcpOption
// ---------------------------------------------------------------------------

/// Options for a TCP transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TcpOption {
    /// Set `TCP_NODELAY` on the socket.
    pub disable_nagle: bool,

    /// Retry failed connects with exponential backoff.
    pub auto_reconnect: bool,

    /// Send client pings every 3 seconds and stop when the server goes
    /// quiet for 20 seconds.
    pub enable_ping: bool,

    /// Stamp sequence numbers even without session reliability.
    pub sequence_validation: bool,

    /// Time allowed for one connect attempt.
    pub connect_timeout: Duration,

    pub encryption: EncryptionType,

    /// Server public key, for ciphers that need one.
    pub public_key: String,
}

impl Default for TcpOption {
    fn default() -> Self {
        Self {
            disable_nagle: true,
            auto_reconnect: false,
            enable_ping: false,
            sequence_validation: false,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            encryption: EncryptionType::None,
            public_key: String::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// UdpOption
// ---------------------------------------------------------------------------

/// Options for a UDP transport.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UdpOption {
    pub encryption: EncryptionType,
}

// ---------------------------------------------------------------------------
// HttpOption
// ---------------------------------------------------------------------------

/// Options for an HTTP transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpOption {
    /// Stamp sequence numbers on outgoing messages.
    pub sequence_validation: bool,

    /// Time allowed for the TCP connect of each request.
    pub connect_timeout: Duration,

    /// Use `https://` instead of `http://`.
    pub use_https: bool,

    /// PEM file with an extra root certificate to trust.
    pub ca_cert_path: Option<PathBuf>,

    pub encryption: EncryptionType,
}

impl Default for HttpOption {
    fn default() -> Self {
        Self {
            sequence_validation: false,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            use_https: false,
            ca_cert_path: None,
            encryption: EncryptionType::None,
        }
    }
}

// ---------------------------------------------------------------------------
// TransportOption
// ---------------------------------------------------------------------------

/// Options for any transport. The variant decides the protocol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransportOption {
    Tcp(TcpOption),
    Udp(UdpOption),
    Http(HttpOption),
}

impl TransportOption {
    /// Default options for `protocol`.
    pub fn default_for(protocol: TransportProtocol) -> Self {
        match protocol {
            TransportProtocol::Tcp => Self::Tcp(TcpOption::default()),
            TransportProtocol::Udp => Self::Udp(UdpOption::default()),
            TransportProtocol::Http => Self::Http(HttpOption::default()),
        }
    }

    pub fn protocol(&self) -> TransportProtocol {
        match self {
            Self::Tcp(_) => TransportProtocol::Tcp,
            Self::Udp(_) => TransportProtocol::Udp,
            Self::Http(_) => TransportProtocol::Http,
        }
    }

    pub fn encryption(&self) -> EncryptionType {
        match self {
            Self::Tcp(o) => o.encryption,
            Self::Udp(o) => o.encryption,
            Self::Http(o) => o.encryption,
        }
    }

    /// Whether outgoing messages are stamped with a seq without reliability.
    pub fn sequence_validation(&self) -> bool {
        match self {
            Self::Tcp(o) => o.sequence_validation,
            Self::Udp(_) => false,
            Self::Http(o) => o.sequence_validation,
        }
    }

    /// The connect timeout. UDP has no connect handshake.
    pub fn connect_timeout(&self) -> Option<Duration> {
        match self {
            Self::Tcp(o) => Some(o.connect_timeout),
            Self::Udp(_) => None,
            Self::Http(o) => Some(o.connect_timeout),
        }
    }
}

impl From<TcpOption> for TransportOption {
    fn from(o: TcpOption) -> Self {
        Self::Tcp(o)
    }
}

impl From<UdpOption> for TransportOption {
    fn from(o: UdpOption) -> Self {
        Self::Udp(o)
    }
}

impl From<HttpOption> for TransportOption {
    fn from(o: HttpOption) -> Self {
        Self::Http(o)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tcp_option_defaults() {
        let o = TcpOption::default();
        assert!(o.disable_nagle);
        assert!(!o.auto_reconnect);
        assert!(!o.enable_ping);
        assert_eq!(o.connect_timeout, Duration::from_secs(10));
        assert_eq!(o.encryption, EncryptionType::None);
    }

    #[test]
    fn test_transport_option_reports_protocol() {
        let o: TransportOption = HttpOption {
            use_https: true,
            ..Default::default()
        }
        .into();
        assert_eq!(o.protocol(), TransportProtocol::Http);
        assert_eq!(o.connect_timeout(), Some(DEFAULT_CONNECT_TIMEOUT));
    }

    #[test]
    fn test_udp_never_sequence_validates() {
        assert!(!TransportOption::default_for(TransportProtocol::Udp).sequence_validation());
    }
}
