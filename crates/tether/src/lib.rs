//! # Tether
//!
//! Client sessions for game and application backends, over TCP, UDP and
//! HTTP.
//!
//! A [`Session`](prelude::Session) keeps one logical session id across any
//! mix of transports. It frames and sequences messages, acknowledges and
//! replays them across reconnects when reliability is on, answers server
//! pings, and follows server-initiated redirects. All I/O runs on the
//! session's own network thread; callbacks run when the application calls
//! `update()`.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use tether::prelude::*;
//!
//! # fn main() -> Result<(), TetherError> {
//! tether::init_tracing("info")?;
//!
//! let mut session = Session::builder("127.0.0.1").build()?;
//! session.on_json_recv(|_, msg_type, body| println!("{msg_type}: {body:?}"));
//! session.connect(TransportProtocol::Tcp, 8012, Encoding::Json)?;
//! session.send_message("echo", r#"{"message":"hello world"}"#)?;
//!
//! loop {
//!     session.update();
//!     std::thread::sleep(std::time::Duration::from_millis(16));
//! #   break;
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Crates
//!
//! - `tether-protocol`: wire framing, message bodies, session id forms,
//!   the encryption hook.
//! - `tether-transport`: the TCP, UDP and HTTP transports.
//! - `tether-session`: the session controller and its events.
//! - `tether-tick`: timers, backoff, the task queue, the network thread.

mod error;
mod logging;

pub use error::TetherError;
pub use logging::init_tracing;

pub use tether_protocol as protocol;
pub use tether_session as session;
pub use tether_tick as tick;
pub use tether_transport as transport;

/// Everything an application needs to run a session.
pub mod prelude {
    pub use crate::TetherError;
    pub use tether_protocol::{
        EncryptionFactory, EncryptionHook, EncryptionType, Encoding, FunMessage, MessageBody,
        SessionId,
    };
    pub use tether_session::{
        ErrorCode, RecvTimeoutKey, Session, SessionBuilder, SessionError, SessionEvent,
        SessionOption, TransportEvent,
    };
    pub use tether_transport::{HttpOption, TcpOption, TransportOption, TransportProtocol, UdpOption};
}
