//! Session-wide options and the transport option resolver.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tether_transport::{TransportOption, TransportProtocol};

/// Options that apply to every transport of a session.
///
/// ```
/// use tether_session::SessionOption;
///
/// let option = SessionOption {
///     reliability: true,
///     ..Default::default()
/// };
/// assert!(!option.send_session_id_only_once);
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionOption {
    /// Sequence numbers, acks, and replay after reconnect. Takes effect on
    /// TCP transports only.
    pub reliability: bool,
    /// Stamp the session id only on the first message after each connect.
    pub send_session_id_only_once: bool,
}

/// Picks transport options for `(protocol, flavor)`.
///
/// Called for every `connect` that passes no options, with an empty
/// flavor, and for every port of a redirect, with the flavor the server
/// named. `None` falls back to the stored or default options.
pub type OptionResolver =
    Arc<dyn Fn(TransportProtocol, &str) -> Option<TransportOption> + Send + Sync>;
