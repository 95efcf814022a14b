//! `Session` builder and the application-facing API.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, Value};
use tether_protocol::{
    pass_through_factory, Encoding, EncryptionFactory, FunMessage, MessageBody, SessionId,
};
use tether_tick::{NetworkThread, TaskQueue};
use tether_transport::{TransportOption, TransportProtocol};
use tokio::sync::mpsc;
use tracing::debug;

use crate::controller::Controller;
use crate::handlers::Handlers;
use crate::{OptionResolver, SessionError, SessionEvent, SessionOption, TransportEvent};

/// Builder for configuring a [`Session`].
///
/// # Example
///
/// ```rust,no_run
/// use tether_session::{Session, SessionOption};
/// use tether_transport::TransportProtocol;
/// use tether_protocol::Encoding;
///
/// let mut session = Session::builder("127.0.0.1")
///     .option(SessionOption { reliability: true, ..Default::default() })
///     .build()?;
/// session.on_json_recv(|protocol, msg_type, body| {
///     println!("{protocol} {msg_type}: {body:?}");
/// });
/// session.connect(TransportProtocol::Tcp, 8012, Encoding::Json)?;
/// loop {
///     session.update();
///     # break;
/// }
/// # Ok::<(), tether_session::SessionError>(())
/// ```
pub struct SessionBuilder {
    host: String,
    option: SessionOption,
    resolver: Option<OptionResolver>,
    encryption: EncryptionFactory,
    thread_name: String,
}

impl SessionBuilder {
    /// Creates a builder for a session to `host` with default settings.
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            option: SessionOption::default(),
            resolver: None,
            encryption: pass_through_factory(),
            thread_name: "tether-network".to_string(),
        }
    }

    /// Sets the session-wide options.
    pub fn option(mut self, option: SessionOption) -> Self {
        self.option = option;
        self
    }

    /// Sets the callback that picks transport options per protocol and
    /// server flavor.
    pub fn option_resolver<F>(mut self, resolver: F) -> Self
    where
        F: Fn(TransportProtocol, &str) -> Option<TransportOption> + Send + Sync + 'static,
    {
        self.resolver = Some(Arc::new(resolver));
        self
    }

    /// Sets the factory that builds an encryption hook for each transport.
    /// Defaults to the pass-through hook.
    pub fn encryption_factory(mut self, factory: EncryptionFactory) -> Self {
        self.encryption = factory;
        self
    }

    /// Names the network thread.
    pub fn thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = name.into();
        self
    }

    /// Spawns the network thread and its dispatcher and returns the session.
    ///
    /// # Errors
    /// [`SessionError::NetworkThread`] if the thread can't be created.
    pub fn build(self) -> Result<Session, SessionError> {
        let network = NetworkThread::spawn(self.thread_name).map_err(SessionError::NetworkThread)?;
        let tasks = Arc::new(TaskQueue::new());
        let (notices_tx, mut notices_rx) = mpsc::unbounded_channel();

        let controller = Controller::new(
            network.handle().clone(),
            self.host,
            self.option,
            self.resolver,
            self.encryption,
            Arc::clone(&tasks),
            notices_tx,
        );

        // The dispatcher only holds a weak reference, so dropping the session
        // frees the controller even though the notice channel stays open.
        let dispatcher = Arc::downgrade(&controller);
        network.spawn_task(async move {
            while let Some(notice) = notices_rx.recv().await {
                let Some(controller) = dispatcher.upgrade() else {
                    break;
                };
                controller.on_notice(notice);
            }
            debug!("session dispatcher finished");
        });

        Ok(Session {
            controller,
            tasks,
            handlers: Handlers::default(),
            network,
        })
    }
}

/// A client session: zero or more transports to one backend, one logical
/// session id, and the user's callbacks.
///
/// All I/O happens on the session's own network thread. Callbacks only run
/// inside [`update()`](Self::update), on whichever thread calls it.
pub struct Session {
    controller: Arc<Controller>,
    tasks: Arc<TaskQueue<Handlers>>,
    handlers: Handlers,
    network: NetworkThread,
}

impl Session {
    /// Creates a builder for a session to `host`.
    pub fn builder(host: impl Into<String>) -> SessionBuilder {
        SessionBuilder::new(host)
    }

    // -----------------------------------------------------------------------
    // Connection lifecycle
    // -----------------------------------------------------------------------

    /// Connects `protocol` on `port`, with options from the resolver or the
    /// protocol's defaults.
    ///
    /// If a transport for `protocol` is already attached it is restarted
    /// when not connected, and `port`/`encoding` are ignored.
    pub fn connect(&self, protocol: TransportProtocol, port: u16, encoding: Encoding) -> Result<(), SessionError> {
        self.controller.connect(protocol, port, encoding, None)
    }

    /// Connects with explicit transport options. The option's variant picks
    /// the protocol.
    pub fn connect_with(
        &self,
        option: impl Into<TransportOption>,
        port: u16,
        encoding: Encoding,
    ) -> Result<(), SessionError> {
        let option = option.into();
        self.controller.connect(option.protocol(), port, encoding, Some(option))
    }

    /// Flushes and stops every transport. A no-op unless started.
    pub fn close(&self) {
        self.controller.close();
    }

    /// Flushes and stops one transport. A no-op unless started.
    pub fn close_protocol(&self, protocol: TransportProtocol) {
        self.controller.close_protocol(protocol);
    }

    /// Runs pending work and delivers queued events to the callbacks.
    pub fn update(&mut self) {
        self.tasks.update(&mut self.handlers);
    }

    // -----------------------------------------------------------------------
    // Sending
    // -----------------------------------------------------------------------

    /// Sends a JSON object with `_msgtype` set to `msg_type` on the default
    /// protocol.
    ///
    /// # Errors
    /// [`SessionError::InvalidMessage`] if `json` is not a JSON object;
    /// [`SessionError::NoDefaultTransport`] before the first `connect`.
    pub fn send_message(&self, msg_type: &str, json: &str) -> Result<(), SessionError> {
        self.controller.send_json(msg_type, json, None)
    }

    /// Like [`send_message`](Self::send_message) on a specific protocol.
    pub fn send_message_on(
        &self,
        protocol: TransportProtocol,
        msg_type: &str,
        json: &str,
    ) -> Result<(), SessionError> {
        self.controller.send_json(msg_type, json, Some(protocol))
    }

    /// Sends a Protobuf message on the default protocol.
    pub fn send_protobuf(&self, message: FunMessage) -> Result<(), SessionError> {
        self.controller.send_protobuf(message, None)
    }

    pub fn send_protobuf_on(&self, protocol: TransportProtocol, message: FunMessage) -> Result<(), SessionError> {
        self.controller.send_protobuf(message, Some(protocol))
    }

    // -----------------------------------------------------------------------
    // Receive timeouts
    // -----------------------------------------------------------------------

    /// Expects a message of type `msg_type` within `timeout`. Fires the
    /// receive-timeout callbacks once if it doesn't arrive.
    pub fn set_recv_timeout(&self, msg_type: &str, timeout: Duration) {
        self.controller.set_recv_timeout(msg_type, timeout);
    }

    /// Same as [`set_recv_timeout`](Self::set_recv_timeout) for an integer
    /// message type.
    pub fn set_recv_timeout_int(&self, msg_type: i32, timeout: Duration) {
        self.controller.set_recv_timeout_int(msg_type, timeout);
    }

    pub fn clear_recv_timeout(&self, msg_type: &str) {
        self.controller.clear_recv_timeout(msg_type);
    }

    pub fn clear_recv_timeout_int(&self, msg_type: i32) {
        self.controller.clear_recv_timeout_int(msg_type);
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    pub fn is_connected(&self) -> bool {
        self.controller.is_connected()
    }

    pub fn is_connected_protocol(&self, protocol: TransportProtocol) -> bool {
        self.controller.is_connected_protocol(protocol)
    }

    /// Whether the session was started and not closed since.
    pub fn is_started(&self) -> bool {
        self.controller.is_started()
    }

    pub fn is_redirecting(&self) -> bool {
        self.controller.is_redirecting()
    }

    /// The current session id. Empty until the server assigns one.
    pub fn session_id(&self) -> SessionId {
        self.controller.session_id()
    }

    pub fn has_transport(&self, protocol: TransportProtocol) -> bool {
        self.controller.has_transport(protocol)
    }

    /// The protocol used when a send names none. The first protocol
    /// connected, unless changed.
    pub fn default_protocol(&self) -> Option<TransportProtocol> {
        self.controller.default_protocol()
    }

    pub fn set_default_protocol(&self, protocol: TransportProtocol) {
        self.controller.set_default_protocol(protocol);
    }

    /// The host transports connect to. Changes on redirect.
    pub fn host(&self) -> String {
        self.controller.host()
    }

    pub fn network_thread(&self) -> &NetworkThread {
        &self.network
    }

    // -----------------------------------------------------------------------
    // Callbacks
    // -----------------------------------------------------------------------

    pub fn on_session_event<F>(&mut self, handler: F)
    where
        F: FnMut(TransportProtocol, SessionEvent, &SessionId) + Send + 'static,
    {
        self.handlers.session.push(Box::new(handler));
    }

    pub fn on_transport_event<F>(&mut self, handler: F)
    where
        F: FnMut(TransportProtocol, TransportEvent) + Send + 'static,
    {
        self.handlers.transport.push(Box::new(handler));
    }

    /// Receives JSON messages that have no registered handler.
    pub fn on_json_recv<F>(&mut self, handler: F)
    where
        F: FnMut(TransportProtocol, &str, &Map<String, Value>) + Send + 'static,
    {
        self.handlers.json.push(Box::new(handler));
    }

    /// Receives Protobuf messages that have no registered handler.
    pub fn on_protobuf_recv<F>(&mut self, handler: F)
    where
        F: FnMut(TransportProtocol, &FunMessage) + Send + 'static,
    {
        self.handlers.protobuf.push(Box::new(handler));
    }

    /// Receives `_maintenance` notices.
    pub fn on_maintenance<F>(&mut self, handler: F)
    where
        F: FnMut(TransportProtocol, &MessageBody) + Send + 'static,
    {
        self.handlers.maintenance.push(Box::new(handler));
    }

    pub fn on_recv_timeout<F>(&mut self, handler: F)
    where
        F: FnMut(&str) + Send + 'static,
    {
        self.handlers.recv_timeout.push(Box::new(handler));
    }

    pub fn on_recv_timeout_int<F>(&mut self, handler: F)
    where
        F: FnMut(i32) + Send + 'static,
    {
        self.handlers.recv_timeout_int.push(Box::new(handler));
    }

    /// Routes every message of `msg_type` to `handler` instead of the JSON
    /// or Protobuf callbacks. Replaces an earlier handler for the same type.
    pub fn register_handler<F>(&mut self, msg_type: &str, handler: F)
    where
        F: FnMut(TransportProtocol, &MessageBody) + Send + 'static,
    {
        debug!(msg_type, "handler registered");
        self.handlers.by_type.insert(msg_type.to_owned(), Box::new(handler));
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        let transports = self.controller.detach_all();
        debug!(transports = transports.len(), "session dropped, draining transports");
        self.network.shutdown_after(transports);
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("host", &self.host())
            .field("session_id", &self.session_id())
            .field("started", &self.is_started())
            .field("handlers", &self.handlers)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> Session {
        Session::builder("127.0.0.1").build().unwrap()
    }

    #[test]
    fn test_send_before_connect_is_no_default_transport() {
        let session = session();
        assert!(matches!(
            session.send_message("echo", "{}"),
            Err(SessionError::NoDefaultTransport)
        ));
    }

    #[test]
    fn test_send_invalid_json_is_invalid_message() {
        let session = session();
        session.connect(TransportProtocol::Tcp, 1, Encoding::Json).unwrap();
        assert!(matches!(
            session.send_message("echo", "[1, 2]"),
            Err(SessionError::InvalidMessage(_))
        ));
        assert!(matches!(
            session.send_message("echo", "not json"),
            Err(SessionError::InvalidMessage(_))
        ));
    }

    #[test]
    fn test_send_on_unattached_protocol_is_no_transport() {
        let session = session();
        session.connect(TransportProtocol::Tcp, 1, Encoding::Json).unwrap();
        assert!(matches!(
            session.send_message_on(TransportProtocol::Udp, "echo", "{}"),
            Err(SessionError::NoTransport(TransportProtocol::Udp))
        ));
    }

    #[test]
    fn test_send_protobuf_on_json_transport_is_encoding_mismatch() {
        let session = session();
        session.connect(TransportProtocol::Tcp, 1, Encoding::Json).unwrap();
        assert!(matches!(
            session.send_protobuf(FunMessage::default()),
            Err(SessionError::EncodingMismatch { .. })
        ));
    }

    #[test]
    fn test_connect_with_mismatched_option_is_rejected() {
        let session = Session::builder("127.0.0.1")
            .option_resolver(|_, _| Some(tether_transport::UdpOption::default().into()))
            .build()
            .unwrap();
        assert!(matches!(
            session.connect(TransportProtocol::Tcp, 1, Encoding::Json),
            Err(SessionError::OptionMismatch { .. })
        ));
        assert!(!session.has_transport(TransportProtocol::Tcp));
    }

    #[test]
    fn test_first_connected_protocol_is_default() {
        let session = session();
        assert_eq!(session.default_protocol(), None);
        session.connect(TransportProtocol::Udp, 1, Encoding::Json).unwrap();
        session.connect(TransportProtocol::Tcp, 1, Encoding::Json).unwrap();
        assert_eq!(session.default_protocol(), Some(TransportProtocol::Udp));
        assert!(session.has_transport(TransportProtocol::Tcp));
        assert!(!session.has_transport(TransportProtocol::Http));
    }

    #[test]
    fn test_close_before_start_is_noop() {
        let session = session();
        session.connect(TransportProtocol::Tcp, 1, Encoding::Json).unwrap();
        assert!(!session.is_started());
        session.close();
        assert!(!session.is_started());
    }
}
