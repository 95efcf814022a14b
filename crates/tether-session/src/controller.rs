//! The session controller: transports, the session id, and message routing.
//!
//! The controller is shared between the application thread (connect, send,
//! close) and one dispatcher task on the network thread that consumes
//! [`TransportNotice`]s. Each piece of state has its own lock and no lock
//! is held across a call into another component, so the two sides never
//! wait on each other for long.
//!
//! Everything the application should see is pushed onto the task queue as
//! an [`Event`]; nothing here calls user code.

use std::sync::{Arc, Weak};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use tether_protocol::{
    control, msg_type, Encoding, EncryptionFactory, FunMessage, MessageBody, OutgoingMessage,
    SessionId,
};
use tether_tick::TaskQueue;
use tether_transport::{
    spawn_transport, NoticeKind, SharedSessionId, TransportConfig, TransportHandle, TransportId,
    TransportNotice, TransportOption, TransportProtocol, TransportState,
};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::event::{Event, SessionEvent, TransportEvent};
use crate::handlers::Handlers;
use crate::redirect::{self, RedirectTarget};
use crate::timeouts::RecvTimeouts;
use crate::{OptionResolver, SessionError, SessionOption};

type Slots = [Option<TransportHandle>; 3];

/// Lifecycle state that is not tied to one transport.
#[derive(Debug, Default)]
struct ControlState {
    host: String,
    started: bool,
    default_protocol: Option<TransportProtocol>,
    /// Protocols attached when the session last started without an id.
    /// The first one connects right away, the rest once the session opens.
    connect_order: Vec<TransportProtocol>,
    /// Last options used per protocol, reused on redirect.
    options: [Option<TransportOption>; 3],
    /// Set while a redirect is in progress.
    redirect_token: Option<String>,
    /// Whether "opened" has been delivered for the current id.
    announced: bool,
}

pub(crate) struct Controller {
    runtime: Handle,
    tasks: Arc<TaskQueue<Handlers>>,
    notices: mpsc::UnboundedSender<TransportNotice>,
    session_option: SessionOption,
    resolver: Option<OptionResolver>,
    encryption: EncryptionFactory,
    session_id: SharedSessionId,
    transports: Mutex<Slots>,
    state: Mutex<ControlState>,
    timeouts: Arc<Mutex<RecvTimeouts>>,
}

impl Controller {
    pub(crate) fn new(
        runtime: Handle,
        host: String,
        session_option: SessionOption,
        resolver: Option<OptionResolver>,
        encryption: EncryptionFactory,
        tasks: Arc<TaskQueue<Handlers>>,
        notices: mpsc::UnboundedSender<TransportNotice>,
    ) -> Arc<Self> {
        Arc::new(Self {
            runtime,
            tasks,
            notices,
            session_option,
            resolver,
            encryption,
            session_id: Arc::new(Mutex::new(SessionId::new())),
            transports: Mutex::new([None, None, None]),
            state: Mutex::new(ControlState {
                host,
                ..Default::default()
            }),
            timeouts: Arc::new(Mutex::new(RecvTimeouts::default())),
        })
    }

    // =======================================================================
    // Application side
    // =======================================================================

    /// Attaches a transport for `protocol`, or restarts the attached one if
    /// it is not connected.
    ///
    /// A new transport is started by the next `update()`, together with any
    /// others attached before it.
    pub(crate) fn connect(
        self: &Arc<Self>,
        protocol: TransportProtocol,
        port: u16,
        encoding: Encoding,
        option: Option<TransportOption>,
    ) -> Result<(), SessionError> {
        if self.has_transport(protocol) {
            if !self.is_connected_protocol(protocol) {
                self.state.lock().started = true;
                self.with_transport(protocol, TransportHandle::start);
            }
            return Ok(());
        }

        let option = match option {
            Some(option) => option,
            None => self.resolve_option(protocol),
        };
        if option.protocol() != protocol {
            return Err(SessionError::OptionMismatch {
                protocol,
                option: option.protocol(),
            });
        }

        self.attach(protocol, port, encoding, option);

        let weak = Arc::downgrade(self);
        self.tasks.set_persistent(move |_| {
            if let Some(controller) = Weak::upgrade(&weak) {
                controller.start();
            }
            true
        });
        Ok(())
    }

    fn resolve_option(&self, protocol: TransportProtocol) -> TransportOption {
        if !self.is_redirecting() {
            if let Some(option) = self.resolver.as_ref().and_then(|r| r(protocol, "")) {
                return option;
            }
        }
        TransportOption::default_for(protocol)
    }

    fn attach(&self, protocol: TransportProtocol, port: u16, encoding: Encoding, option: TransportOption) {
        let host = {
            let mut state = self.state.lock();
            state.options[protocol.index()] = Some(option.clone());
            state.host.clone()
        };
        let hook = (self.encryption)(option.encryption());
        let config = TransportConfig {
            host,
            port,
            encoding,
            option,
            reliability: self.session_option.reliability,
            send_session_id_only_once: self.session_option.send_session_id_only_once,
        };

        {
            let mut slots = self.transports.lock();
            let slot = &mut slots[protocol.index()];
            if slot.is_some() {
                warn!(%protocol, "transport already attached, ignoring");
                return;
            }
            let handle = spawn_transport(
                &self.runtime,
                config,
                Arc::clone(&self.session_id),
                hook,
                self.notices.clone(),
            );
            info!(%protocol, transport_id = %handle.id(), port, %encoding, "transport attached");
            *slot = Some(handle);
        }

        let mut state = self.state.lock();
        if state.default_protocol.is_none() {
            state.default_protocol = Some(protocol);
        }
    }

    /// Starts the session's transports.
    ///
    /// Without a session id only the first attached protocol connects; the
    /// others follow when the server opens the session. With an id every
    /// transport that is not up starts at once.
    pub(crate) fn start(&self) {
        self.tasks.clear_persistent();
        self.state.lock().started = true;

        if self.session_id.lock().is_empty() {
            let order: Vec<TransportProtocol> = TransportProtocol::ALL
                .into_iter()
                .filter(|p| self.has_transport(*p))
                .collect();
            let first = order.first().copied();
            self.state.lock().connect_order = order;
            if let Some(first) = first {
                self.with_transport(first, TransportHandle::start);
            }
        } else {
            for handle in self.transports.lock().iter().flatten() {
                if handle.state() == TransportState::Disconnected {
                    handle.start();
                }
            }
        }
    }

    /// Stops every transport. A no-op unless the session was started.
    pub(crate) fn close(&self) {
        {
            let mut state = self.state.lock();
            if !state.started {
                return;
            }
            state.started = false;
        }
        for handle in self.transports.lock().iter().flatten() {
            handle.stop();
        }
    }

    /// Detaches every transport and returns their tasks. Each one flushes
    /// its queue and closes once its handle is gone.
    pub(crate) fn detach_all(&self) -> Vec<JoinHandle<()>> {
        self.transports
            .lock()
            .iter_mut()
            .filter_map(Option::take)
            .map(TransportHandle::into_task)
            .collect()
    }

    pub(crate) fn close_protocol(&self, protocol: TransportProtocol) {
        if !self.state.lock().started {
            return;
        }
        self.with_transport(protocol, TransportHandle::stop);
    }

    /// Sends a JSON message with sequencing (and retention when reliable).
    pub(crate) fn send_json(
        &self,
        msg_type: &str,
        json: &str,
        protocol: Option<TransportProtocol>,
    ) -> Result<(), SessionError> {
        let mut body = MessageBody::from_json_str(json)?;
        if !msg_type.is_empty() {
            body.set_msg_type(msg_type);
        }
        self.send_body(body, protocol)
    }

    pub(crate) fn send_protobuf(
        &self,
        message: FunMessage,
        protocol: Option<TransportProtocol>,
    ) -> Result<(), SessionError> {
        self.send_body(MessageBody::Protobuf(message), protocol)
    }

    fn send_body(&self, body: MessageBody, protocol: Option<TransportProtocol>) -> Result<(), SessionError> {
        let protocol = match protocol {
            Some(protocol) => protocol,
            None => self.default_protocol().ok_or(SessionError::NoDefaultTransport)?,
        };
        let slots = self.transports.lock();
        let handle = slots[protocol.index()]
            .as_ref()
            .ok_or(SessionError::NoTransport(protocol))?;
        if handle.encoding() != body.encoding() {
            return Err(SessionError::EncodingMismatch {
                protocol,
                expected: handle.encoding(),
                actual: body.encoding(),
            });
        }
        handle.send(OutgoingMessage::sequenced(body, self.session_option.reliability));
        Ok(())
    }

    pub(crate) fn set_recv_timeout(&self, msg_type: &str, timeout: Duration) {
        self.timeouts.lock().set_name(msg_type, timeout);
    }

    pub(crate) fn set_recv_timeout_int(&self, msg_type: i32, timeout: Duration) {
        self.timeouts.lock().set_int(msg_type, timeout);
    }

    pub(crate) fn clear_recv_timeout(&self, msg_type: &str) {
        self.timeouts.lock().cancel_name(msg_type);
    }

    pub(crate) fn clear_recv_timeout_int(&self, msg_type: i32) {
        self.timeouts.lock().cancel_int(msg_type);
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    pub(crate) fn is_started(&self) -> bool {
        self.state.lock().started
    }

    pub(crate) fn is_redirecting(&self) -> bool {
        self.state.lock().redirect_token.is_some()
    }

    pub(crate) fn is_connected(&self) -> bool {
        self.transports
            .lock()
            .iter()
            .flatten()
            .any(TransportHandle::is_connected)
    }

    pub(crate) fn is_connected_protocol(&self, protocol: TransportProtocol) -> bool {
        self.transports.lock()[protocol.index()]
            .as_ref()
            .is_some_and(TransportHandle::is_connected)
    }

    pub(crate) fn has_transport(&self, protocol: TransportProtocol) -> bool {
        self.transports.lock()[protocol.index()].is_some()
    }

    pub(crate) fn default_protocol(&self) -> Option<TransportProtocol> {
        self.state.lock().default_protocol
    }

    pub(crate) fn set_default_protocol(&self, protocol: TransportProtocol) {
        self.state.lock().default_protocol = Some(protocol);
    }

    pub(crate) fn session_id(&self) -> SessionId {
        self.session_id.lock().clone()
    }

    pub(crate) fn host(&self) -> String {
        self.state.lock().host.clone()
    }

    fn with_transport<R>(&self, protocol: TransportProtocol, f: impl FnOnce(&TransportHandle) -> R) -> Option<R> {
        self.transports.lock()[protocol.index()].as_ref().map(f)
    }

    // =======================================================================
    // Network side
    // =======================================================================

    /// Handles one notice from a transport. Runs on the dispatcher task.
    pub(crate) fn on_notice(self: &Arc<Self>, notice: TransportNotice) {
        let TransportNotice { id, protocol, kind } = notice;
        if !self.is_attached(id, protocol) {
            debug!(%protocol, transport_id = %id, "notice from a detached transport");
            return;
        }

        match kind {
            NoticeKind::Started => self.on_transport_started(protocol),
            NoticeKind::Stopped => self.on_transport_stopped(protocol),
            NoticeKind::ConnectFailed => self.transport_event(protocol, TransportEvent::ConnectionFailed),
            NoticeKind::ConnectTimedOut => self.transport_event(protocol, TransportEvent::ConnectionTimedOut),
            NoticeKind::Disconnected => self.transport_event(protocol, TransportEvent::Disconnected),
            NoticeKind::Received { body, .. } => self.on_received(protocol, body),
        }
    }

    fn is_attached(&self, id: TransportId, protocol: TransportProtocol) -> bool {
        self.transports.lock()[protocol.index()]
            .as_ref()
            .is_some_and(|handle| handle.id() == id)
    }

    fn on_transport_started(&self, protocol: TransportProtocol) {
        let Some((encoding, needs_handshake)) =
            self.with_transport(protocol, |h| (h.encoding(), h.needs_handshake()))
        else {
            return;
        };

        if needs_handshake || self.session_id.lock().is_empty() {
            self.send_control(protocol, MessageBody::empty(encoding));
        }

        self.transport_event(protocol, TransportEvent::Started);

        let timeouts = Arc::clone(&self.timeouts);
        self.tasks.set_persistent(move |handlers: &mut Handlers| {
            let expired = timeouts.lock().take_expired();
            for key in expired {
                handlers.dispatch(Event::RecvTimeout(key));
            }
            true
        });
    }

    fn on_transport_stopped(&self, protocol: TransportProtocol) {
        if !self.is_redirecting() {
            self.tasks.clear_persistent();
        }
        self.transport_event(protocol, TransportEvent::Stopped);
    }

    fn on_received(self: &Arc<Self>, protocol: TransportProtocol, body: MessageBody) {
        if let Some(id) = body.session_id() {
            self.adopt_session_id(protocol, id, body.encoding());
        }

        let kind = body.msg_type().map(str::to_owned);
        let kind_int = body.msg_type_int().filter(|t| *t != 0);

        if self.session_option.reliability && kind.is_none() && kind_int.is_none() {
            return;
        }

        {
            let mut timeouts = self.timeouts.lock();
            if let Some(name) = &kind {
                timeouts.cancel_name(name);
            } else if let Some(n) = kind_int {
                timeouts.cancel_int(n);
            }
        }

        match kind.as_deref() {
            Some(msg_type::SESSION_OPENED) => self.on_session_opened(protocol),
            Some(msg_type::SESSION_CLOSED) => self.on_session_closed(protocol),
            Some(msg_type::SERVER_PING) => self.send_control(protocol, body),
            Some(msg_type::CLIENT_PING) => {
                if let Some(sent) = control::ping_timestamp(&body) {
                    debug!(%protocol, rtt_ms = now_millis().saturating_sub(sent), "ping reply");
                }
            }
            Some(msg_type::MAINTENANCE) => self.push(Event::Maintenance { protocol, body }),
            Some(msg_type::REDIRECT) => self.on_redirect(protocol, &body),
            Some(msg_type::REDIRECT_CONNECT) => self.on_redirect_connect(protocol, &body),
            _ => self.push(Event::Message { protocol, body }),
        }
    }

    fn adopt_session_id(&self, protocol: TransportProtocol, id: SessionId, encoding: Encoding) {
        let mut current = self.session_id.lock();
        if current.is_empty() {
            info!(session_id = %id, "new session id");
            *current = id;
            drop(current);
            self.announce_opened(protocol);
        } else if current.differs_from(&id, encoding) {
            info!(old = %current, new = %id, "session id changed");
            *current = id;
            drop(current);
            self.state.lock().announced = false;
            self.session_event(protocol, SessionEvent::Changed);
            self.announce_opened(protocol);
        } else if *current != id {
            *current = id;
        }
    }

    fn announce_opened(&self, protocol: TransportProtocol) {
        {
            let mut state = self.state.lock();
            if state.announced {
                return;
            }
            state.announced = true;
        }
        self.session_event(protocol, SessionEvent::Opened);
    }

    fn on_session_opened(&self, protocol: TransportProtocol) {
        self.announce_opened(protocol);

        let rest: Vec<TransportProtocol> = self.state.lock().connect_order.iter().skip(1).copied().collect();
        for other in rest {
            self.with_transport(other, TransportHandle::start);
        }
    }

    fn on_session_closed(&self, protocol: TransportProtocol) {
        info!("session closed by server, clearing session id");
        self.session_event(protocol, SessionEvent::Closed);
        self.session_id.lock().clear();
        self.state.lock().announced = false;
        self.close();
    }

    fn on_redirect(self: &Arc<Self>, protocol: TransportProtocol, body: &MessageBody) {
        let target = match redirect::parse_redirect(body) {
            Ok(target) => target,
            Err(e) => {
                warn!(%protocol, error = %e, "ignoring malformed redirect");
                return;
            }
        };
        let RedirectTarget {
            token,
            host,
            flavor,
            ports,
        } = target;
        info!(%host, %flavor, ports = ports.len(), "redirect requested");

        let stored = {
            let mut state = self.state.lock();
            state.redirect_token = Some(token.clone());
            state.announced = false;
            state.default_protocol = None;
            state.host = host;
            state.options.clone()
        };

        let detached: Vec<TransportHandle> = self.transports.lock().iter_mut().filter_map(Option::take).collect();
        for handle in &detached {
            handle.stop();
        }
        drop(detached);
        self.session_id.lock().clear();

        for port in ports {
            let option = self
                .resolver
                .as_ref()
                .and_then(|r| r(port.protocol, &flavor))
                .or_else(|| stored[port.protocol.index()].clone())
                .unwrap_or_else(|| TransportOption::default_for(port.protocol));
            if let Err(e) = self.connect(port.protocol, port.port, port.encoding, Some(option)) {
                warn!(protocol = %port.protocol, error = %e, "skipping redirect port");
            }
        }

        self.present_redirect_token(&token);
        self.session_event(protocol, SessionEvent::RedirectStarted);
    }

    /// Queues the redirect token on the high-priority path of the transport
    /// that connects first. It goes out as soon as that transport starts,
    /// ahead of anything the application has queued.
    fn present_redirect_token(&self, token: &str) {
        let slots = self.transports.lock();
        let first = TransportProtocol::ALL
            .into_iter()
            .find_map(|p| slots[p.index()].as_ref());
        match first {
            Some(handle) => {
                info!(protocol = %handle.protocol(), "presenting redirect token");
                let body = control::redirect_connect(handle.encoding(), token);
                handle.send_priority(OutgoingMessage::new(body));
            }
            None => warn!("redirect left no transport to present the token on"),
        }
    }

    fn on_redirect_connect(&self, protocol: TransportProtocol, body: &MessageBody) {
        if self.state.lock().redirect_token.take().is_none() {
            debug!(%protocol, "redirect reply without a pending redirect");
        }
        match redirect::connect_result(body) {
            Ok(()) => {
                info!(%protocol, "redirect succeeded");
                self.session_event(protocol, SessionEvent::RedirectSucceeded);
            }
            Err(code) => {
                warn!(%protocol, error = %code, "redirect failed");
                self.session_event(protocol, SessionEvent::RedirectFailed(code));
            }
        }
    }

    /// Queues a control message: no sequence number, never retained.
    fn send_control(&self, protocol: TransportProtocol, body: MessageBody) {
        self.with_transport(protocol, |h| h.send(OutgoingMessage::new(body)));
    }

    // -----------------------------------------------------------------------
    // Event delivery
    // -----------------------------------------------------------------------

    fn push(&self, event: Event) {
        self.tasks.push(move |handlers: &mut Handlers| {
            handlers.dispatch(event);
            true
        });
    }

    /// Redirect progress is always delivered; other session events are held
    /// back while a redirect is in progress.
    fn session_event(&self, protocol: TransportProtocol, event: SessionEvent) {
        let redirect_event = matches!(
            event,
            SessionEvent::RedirectStarted | SessionEvent::RedirectSucceeded | SessionEvent::RedirectFailed(_)
        );
        if !redirect_event && self.is_redirecting() {
            debug!(%protocol, ?event, "session event suppressed during redirect");
            return;
        }
        let session_id = self.session_id();
        self.push(Event::Session {
            protocol,
            event,
            session_id,
        });
    }

    /// While redirecting only connect failures get through.
    fn transport_event(&self, protocol: TransportProtocol, event: TransportEvent) {
        let failure = matches!(event, TransportEvent::ConnectionFailed | TransportEvent::ConnectionTimedOut);
        if !failure && self.is_redirecting() {
            debug!(%protocol, ?event, "transport event suppressed during redirect");
            return;
        }
        self.push(Event::Transport { protocol, event });
    }
}

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
}
