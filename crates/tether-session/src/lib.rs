//! Client sessions for Tether.
//!
//! This crate ties transports into one logical session:
//!
//! 1. **Session id**: adopted from the server, kept across reconnects,
//!    cleared when the server closes the session.
//! 2. **Routing**: built-in control messages (pings, redirects,
//!    maintenance) are handled here; everything else goes to the
//!    application's callbacks.
//! 3. **Redirects**: the server can move the client to another host; the
//!    session reconnects and presents the redirect token.
//!
//! # How it fits in the stack
//!
//! ```text
//! Application  ── connect / send / update() ──→  Session (this crate)
//!                                                   ↕ notices, handles
//! Transport Layer (below)  ← TCP/UDP/HTTP actors on the network thread
//!     ↕
//! Protocol Layer  ← framing, message bodies, session id forms
//! ```
//!
//! Callbacks never run on the network thread. Every event is queued and
//! delivered when the application calls [`Session::update`].

mod controller;
mod error;
mod event;
mod handlers;
mod option;
mod redirect;
mod session;
mod timeouts;

pub use error::{ErrorCode, SessionError};
pub use event::{Event, RecvTimeoutKey, SessionEvent, TransportEvent};
pub use handlers::Handlers;
pub use option::{OptionResolver, SessionOption};
pub use session::{Session, SessionBuilder};
