//! The transport task.
//!
//! One task per transport, running on the network thread. It owns the link,
//! the frame decoder, the ledger and the timers, and reacts to whichever of
//! these is ready first:
//!
//! - a [`Command`] from the handle (start, stop, flush),
//! - inbound bytes on the link,
//! - the HTTP request in flight completing,
//! - the reconnect wait, ping or keep-alive timer expiring.
//!
//! ```text
//!                start                ok
//! Disconnected ──────→ Connecting ─────────→ Connected
//!      ↑                  │ fail                 │ stop / eof / error
//!      │                  ↓                      ↓
//!      └────────── (retry wait) ←──── Disconnecting
//! ```

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinHandle};
use tether_protocol::{
    control, decode_frames, encode_frame, EncryptionHook, Frame, FrameDecoder, HeaderFields,
    MessageBody, OutgoingMessage, ProtocolError,
};
use tether_tick::{BackoffStep, ReconnectBackoff, Timer};
use tracing::{debug, info, trace, warn};

use crate::handle::{Command, Shared};
use crate::link::{self, HttpLink, HttpResponse, Link, READ_BUFFER_SIZE};
use crate::{
    Ledger, NoticeKind, SeqVerdict, SharedSessionId, TcpOption, TransportConfig, TransportError,
    TransportId, TransportNotice, TransportOption, TransportProtocol, TransportState,
};

/// Time between client pings.
const PING_INTERVAL: Duration = Duration::from_secs(3);
/// Silence tolerated before the connection is considered dead.
const PING_TIMEOUT: Duration = Duration::from_secs(20);
/// Messages taken from the normal queue per flush, unless stopping.
const MAX_SEND_PER_FLUSH: usize = 32;

type RequestHandle = JoinHandle<Result<HttpResponse, TransportError>>;

pub(crate) struct TransportActor {
    id: TransportId,
    protocol: TransportProtocol,
    config: TransportConfig,
    shared: Arc<Shared>,
    session_id: SharedSessionId,
    hook: Box<dyn EncryptionHook>,
    commands: mpsc::UnboundedReceiver<Command>,
    notices: mpsc::UnboundedSender<TransportNotice>,
    /// Set once the handle is dropped; the task exits after stopping.
    closed: bool,

    link: Option<Link>,
    read_buf: Vec<u8>,
    decoder: FrameDecoder,
    ledger: Ledger,
    http_request: Option<RequestHandle>,

    /// The next frame written is the first on this connection.
    first_frame: bool,
    /// The session id still has to be stamped on this connection.
    session_id_pending: bool,

    addrs: Vec<SocketAddr>,
    addr_index: usize,
    backoff: ReconnectBackoff,
    reconnect_timer: Timer,
    ping_timer: Timer,
    keep_alive: Timer,
}

impl TransportActor {
    pub(crate) fn new(
        id: TransportId,
        config: TransportConfig,
        shared: Arc<Shared>,
        session_id: SharedSessionId,
        hook: Box<dyn EncryptionHook>,
        commands: mpsc::UnboundedReceiver<Command>,
        notices: mpsc::UnboundedSender<TransportNotice>,
    ) -> Self {
        Self {
            id,
            protocol: config.protocol(),
            config,
            shared,
            session_id,
            hook,
            commands,
            notices,
            closed: false,
            link: None,
            read_buf: vec![0; READ_BUFFER_SIZE],
            decoder: FrameDecoder::new(),
            ledger: Ledger::new(),
            http_request: None,
            first_frame: true,
            session_id_pending: false,
            addrs: Vec::new(),
            addr_index: 0,
            backoff: ReconnectBackoff::default(),
            reconnect_timer: Timer::new(),
            ping_timer: Timer::new(),
            keep_alive: Timer::new(),
        }
    }

    // -----------------------------------------------------------------------
    // Main loop
    // -----------------------------------------------------------------------

    pub(crate) async fn run(mut self) {
        debug!(id = %self.id, protocol = %self.protocol, "transport task running");

        while !self.closed {
            let readable = self.link.as_ref().is_some_and(Link::is_readable);

            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => self.on_command(command).await,
                    None => self.closed = true,
                },
                result = link::read_link(&mut self.link, &mut self.read_buf), if readable => {
                    self.on_read(result).await;
                }
                result = link::poll_request(&mut self.http_request), if self.http_request.is_some() => {
                    self.on_http_response(result).await;
                }
                () = self.reconnect_timer.expired() => {
                    self.reconnect_timer.clear();
                    self.set_state(TransportState::Connecting);
                    self.connect().await;
                }
                () = self.ping_timer.expired() => {
                    self.on_ping_timer().await;
                }
                () = self.keep_alive.expired() => {
                    warn!(id = %self.id, protocol = %self.protocol, "network seems down, stopping transport");
                    self.stop().await;
                }
            }
        }

        self.stop().await;
        debug!(id = %self.id, protocol = %self.protocol, "transport task finished");
    }

    async fn on_command(&mut self, command: Command) {
        match command {
            Command::Start => {
                if self.state() == TransportState::Connecting && self.link.is_none() {
                    self.reconnect_timer.clear();
                    self.backoff.reset();
                    self.connect().await;
                }
            }
            Command::Stop => self.stop().await,
            Command::Flush => {
                if self.state() == TransportState::Connected {
                    self.flush_or_stop().await;
                }
            }
        }
    }

    // -----------------------------------------------------------------------
    // Connecting
    // -----------------------------------------------------------------------

    async fn connect(&mut self) {
        info!(
            id = %self.id,
            protocol = %self.protocol,
            host = %self.config.host,
            port = self.config.port,
            "connecting"
        );

        match self.config.option.clone() {
            TransportOption::Tcp(option) => self.connect_tcp(option).await,
            TransportOption::Udp(_) => self.connect_udp().await,
            TransportOption::Http(option) => {
                match HttpLink::new(&self.config.host, self.config.port, &option) {
                    Ok(http) => {
                        debug!(id = %self.id, url = http.url(), "http client ready");
                        self.on_connected(Link::Http(http)).await;
                    }
                    Err(e) => {
                        warn!(id = %self.id, error = %e, "http client setup failed");
                        self.fail(NoticeKind::ConnectFailed);
                    }
                }
            }
        }
    }

    /// Resolves the host. `None` means the attempt is over: either a stop
    /// arrived (already handled) or resolution failed (already reported).
    async fn resolve(&mut self) -> Option<Vec<SocketAddr>> {
        let host = self.config.host.clone();
        let port = self.config.port;
        let lookup = tokio::net::lookup_host((host.clone(), port));

        let Some(result) = self.unless_stopped(lookup).await else {
            self.stop().await;
            return None;
        };

        let error = match result {
            Ok(addrs) => {
                let addrs: Vec<_> = addrs.collect();
                if !addrs.is_empty() {
                    return Some(addrs);
                }
                TransportError::NoAddresses(host)
            }
            Err(source) => TransportError::Resolve { host, source },
        };

        warn!(id = %self.id, protocol = %self.protocol, error = %error, "cannot connect");
        self.fail(NoticeKind::ConnectFailed);
        None
    }

    async fn connect_tcp(&mut self, option: TcpOption) {
        if self.addrs.is_empty() {
            let Some(addrs) = self.resolve().await else {
                return;
            };
            self.addrs = addrs;
            self.addr_index = 0;
        }

        loop {
            let addr = self.addrs[self.addr_index % self.addrs.len()];
            debug!(id = %self.id, %addr, "tcp connect attempt");

            let attempt = tokio::time::timeout(option.connect_timeout, TcpStream::connect(addr));
            let Some(outcome) = self.unless_stopped(attempt).await else {
                self.stop().await;
                return;
            };

            let failure = match outcome {
                Ok(Ok(stream)) => {
                    if option.disable_nagle {
                        if let Err(e) = stream.set_nodelay(true) {
                            debug!(id = %self.id, error = %e, "set_nodelay failed");
                        }
                    }
                    self.on_connected(Link::Tcp(stream)).await;
                    return;
                }
                Ok(Err(e)) => {
                    info!(id = %self.id, %addr, error = %TransportError::ConnectFailed(e), "tcp connect failed");
                    NoticeKind::ConnectFailed
                }
                Err(_) => {
                    info!(id = %self.id, %addr, error = %TransportError::ConnectTimedOut, "tcp connect failed");
                    NoticeKind::ConnectTimedOut
                }
            };

            if option.auto_reconnect {
                self.set_state(TransportState::Disconnected);
                self.notify(failure);
                match self.backoff.on_failure() {
                    BackoffStep::Wait(wait) => {
                        info!(id = %self.id, wait_secs = wait.as_secs(), "waiting before reconnect");
                        self.reconnect_timer.set(wait);
                        return;
                    }
                    BackoffStep::NextAddress => {
                        self.addr_index = (self.addr_index + 1) % self.addrs.len();
                        self.set_state(TransportState::Connecting);
                        continue;
                    }
                }
            }

            self.addr_index += 1;
            if self.addr_index < self.addrs.len() {
                continue;
            }
            self.fail(failure);
            return;
        }
    }

    async fn connect_udp(&mut self) {
        let Some(addrs) = self.resolve().await else {
            return;
        };
        let addr = addrs[0];

        let Some(result) = self.unless_stopped(link::open_udp(addr)).await else {
            self.stop().await;
            return;
        };
        match result {
            Ok(socket) => self.on_connected(Link::Udp(socket)).await,
            Err(e) => {
                warn!(id = %self.id, %addr, error = %e, "udp socket setup failed");
                self.fail(NoticeKind::ConnectFailed);
            }
        }
    }

    /// Drives `fut` to completion unless a stop arrives first.
    ///
    /// Starts and flushes arriving meanwhile are absorbed: the connect in
    /// progress already covers the start, and queued messages go out once
    /// it succeeds.
    async fn unless_stopped<F: Future>(&mut self, fut: F) -> Option<F::Output> {
        tokio::pin!(fut);
        loop {
            tokio::select! {
                out = &mut fut => return Some(out),
                command = self.commands.recv() => match command {
                    Some(Command::Stop) => return None,
                    Some(Command::Start | Command::Flush) => {}
                    None => {
                        self.closed = true;
                        return None;
                    }
                },
            }
        }
    }

    async fn on_connected(&mut self, link: Link) {
        self.link = Some(link);
        self.addrs.clear();
        self.addr_index = 0;
        self.backoff.reset();
        self.first_frame = true;
        // UDP stamps the id once per start, even if it only arrives later.
        self.session_id_pending = matches!(self.link, Some(Link::Udp(_))) || !self.session_id.lock().is_empty();

        if let TransportOption::Tcp(TcpOption { enable_ping: true, .. }) = self.config.option {
            self.keep_alive.set(PING_INTERVAL + PING_TIMEOUT);
            self.ping_timer.set(PING_INTERVAL);
        }

        self.set_state(TransportState::Connected);
        info!(id = %self.id, protocol = %self.protocol, "transport connected");

        if self.config.is_reliable() {
            if let Some(ack) = self.ledger.resume_ack() {
                debug!(id = %self.id, ack, "resuming with ack");
                self.queue_ack(ack);
            }
        }

        self.notify(NoticeKind::Started);
        self.flush_or_stop().await;
    }

    /// Reports a failed connect and returns to `Disconnected`.
    fn fail(&mut self, kind: NoticeKind) {
        self.addrs.clear();
        self.addr_index = 0;
        self.set_state(TransportState::Disconnected);
        self.notify(kind);
    }

    // -----------------------------------------------------------------------
    // Stopping
    // -----------------------------------------------------------------------

    /// Flushes everything, closes the link and reports `Stopped`.
    /// A no-op apart from cancelling a reconnect wait when already stopped.
    async fn stop(&mut self) {
        self.reconnect_timer.clear();

        let state = self.state();
        if matches!(state, TransportState::Disconnected | TransportState::Disconnecting) {
            return;
        }

        self.set_state(TransportState::Disconnecting);

        if state == TransportState::Connected && self.protocol != TransportProtocol::Http {
            if let Err(e) = self.flush(true).await {
                debug!(id = %self.id, error = %e, "final flush failed");
            }
        }

        self.link = None;
        if let Some(request) = self.http_request.take() {
            request.abort();
        }
        self.ping_timer.clear();
        self.keep_alive.clear();
        self.addrs.clear();
        self.addr_index = 0;
        self.ledger.mark_reconnect();
        self.decoder.reset();

        self.set_state(TransportState::Disconnected);
        info!(id = %self.id, protocol = %self.protocol, "transport stopped");
        self.notify(NoticeKind::Stopped);
    }

    // -----------------------------------------------------------------------
    // Sending
    // -----------------------------------------------------------------------

    async fn flush_or_stop(&mut self) {
        if let Err(e) = self.flush(false).await {
            warn!(id = %self.id, protocol = %self.protocol, error = %e, "send failed");
            self.stop().await;
        }
    }

    /// Encodes and writes queued messages: the priority queue in full, then
    /// up to [`MAX_SEND_PER_FLUSH`] from the normal queue (all of it when
    /// `send_all`). HTTP sends a single message per request instead.
    async fn flush(&mut self, send_all: bool) -> Result<(), TransportError> {
        match &self.link {
            None => return Ok(()),
            Some(Link::Http(_)) => {
                self.flush_http();
                return Ok(());
            }
            Some(_) => {}
        }

        let mut frames = Vec::new();
        let mut failed = false;

        loop {
            let next = self.shared.priority_queue.lock().pop_front();
            let Some(mut msg) = next else {
                break;
            };
            match self.encode(&mut msg) {
                Ok((header, body)) => frames.push(encode_frame(&header, &body)),
                Err(e) => {
                    warn!(id = %self.id, error = %e, "cannot encode control message");
                    self.shared.priority_queue.lock().push_front(msg);
                    failed = true;
                    break;
                }
            }
        }

        if !failed && !self.ledger.is_awaiting_first_ack() {
            let mut sent = 0;
            while send_all || sent < MAX_SEND_PER_FLUSH {
                let next = self.shared.send_queue.lock().pop_front();
                let Some(mut msg) = next else {
                    break;
                };
                match self.encode(&mut msg) {
                    Ok((header, body)) => {
                        frames.push(encode_frame(&header, &body));
                        if msg.retain && self.config.is_reliable() {
                            self.ledger.retain(msg);
                        }
                        sent += 1;
                    }
                    Err(e) => {
                        warn!(id = %self.id, error = %e, "cannot encode message");
                        self.shared.send_queue.lock().push_front(msg);
                        break;
                    }
                }
            }
        }

        if frames.is_empty() {
            return Ok(());
        }

        trace!(id = %self.id, frames = frames.len(), "writing frames");
        match self.link.as_mut() {
            Some(link) => link.write_frames(&frames).await.map_err(TransportError::SendFailed),
            None => Ok(()),
        }
    }

    /// Sends the next message as an HTTP request, if none is in flight.
    fn flush_http(&mut self) {
        if self.http_request.is_some() {
            return;
        }

        let next = self.shared.priority_queue.lock().pop_front();
        let next = next.or_else(|| self.shared.send_queue.lock().pop_front());
        let Some(mut msg) = next else {
            return;
        };

        let (header, body) = match self.encode(&mut msg) {
            Ok(encoded) => encoded,
            Err(e) => {
                warn!(id = %self.id, error = %e, "cannot encode message");
                self.shared.send_queue.lock().push_front(msg);
                return;
            }
        };

        if let Some(Link::Http(http)) = &self.link {
            trace!(id = %self.id, bytes = body.len(), "http request");
            self.http_request = Some(http.post(&header, body));
        }
    }

    /// Stamps the session id and seq, serializes and encrypts the body.
    fn encode(&mut self, msg: &mut OutgoingMessage) -> Result<(HeaderFields, Vec<u8>), ProtocolError> {
        self.stamp_session_id(&mut msg.body);
        if msg.use_seq && self.config.stamps_seq() {
            let seq = self.ledger.assign_seq(msg);
            trace!(id = %self.id, seq, "stamped seq");
        }

        let body = msg.body.to_bytes()?;
        let mut header = HeaderFields::for_body(body.len(), self.first_frame);
        let body = self.hook.encrypt(&mut header, body)?;
        self.first_frame = false;
        Ok((header, body))
    }

    fn stamp_session_id(&mut self, body: &mut MessageBody) {
        if self.config.send_session_id_only_once && !self.session_id_pending {
            return;
        }
        let session_id = self.session_id.lock().clone();
        if session_id.is_empty() {
            return;
        }
        body.set_session_id(&session_id);
        self.session_id_pending = false;
    }

    fn queue_ack(&mut self, ack: u32) {
        let body = control::ack(self.config.encoding, ack);
        self.shared
            .priority_queue
            .lock()
            .push_back(OutgoingMessage::new(body));
    }

    async fn on_ping_timer(&mut self) {
        self.ping_timer.set(PING_INTERVAL);
        if self.session_id.lock().is_empty() {
            return;
        }

        let body = control::client_ping(self.config.encoding, now_millis());
        self.shared
            .send_queue
            .lock()
            .push_back(OutgoingMessage::new(body));
        self.flush_or_stop().await;
    }

    // -----------------------------------------------------------------------
    // Receiving
    // -----------------------------------------------------------------------

    async fn on_read(&mut self, result: std::io::Result<usize>) {
        let n = match result {
            Ok(0) if self.protocol == TransportProtocol::Tcp => {
                info!(id = %self.id, error = %TransportError::ConnectionClosed, "transport disconnected");
                self.notify(NoticeKind::Disconnected);
                self.stop().await;
                return;
            }
            Ok(n) => n,
            Err(e) => {
                warn!(id = %self.id, protocol = %self.protocol, error = %TransportError::ReceiveFailed(e), "transport disconnected");
                self.notify(NoticeKind::Disconnected);
                self.stop().await;
                return;
            }
        };
        trace!(id = %self.id, bytes = n, "read");

        if let Err(e) = self.decode_received(n) {
            warn!(id = %self.id, protocol = %self.protocol, error = %e, "protocol violation, stopping transport");
            self.stop().await;
            return;
        }

        // Acks queued while decoding go out right away.
        self.flush_or_stop().await;
    }

    fn decode_received(&mut self, n: usize) -> Result<(), TransportError> {
        if self.protocol == TransportProtocol::Udp {
            for frame in decode_frames(&self.read_buf[..n])? {
                self.on_frame(frame)?;
            }
            return Ok(());
        }

        self.decoder.extend(&self.read_buf[..n]);
        while let Some(frame) = self.decoder.decode()? {
            self.on_frame(frame)?;
        }
        Ok(())
    }

    async fn on_http_response(&mut self, result: Result<Result<HttpResponse, TransportError>, JoinError>) {
        self.http_request = None;

        let response = match result {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                self.on_http_error(e.to_string()).await;
                return;
            }
            Err(e) => {
                self.on_http_error(e.to_string()).await;
                return;
            }
        };

        if let (Some(cookie), Some(Link::Http(http))) = (response.cookie, self.link.as_mut()) {
            http.set_cookie(cookie);
        }

        let frame = Frame {
            header: response.header,
            body: response.body,
        };
        if let Err(e) = self.on_frame(frame) {
            warn!(id = %self.id, error = %e, "protocol violation, stopping transport");
            self.stop().await;
            return;
        }

        self.flush_http();
    }

    async fn on_http_error(&mut self, error: String) {
        if self.session_id.lock().is_empty() {
            warn!(id = %self.id, %error, "http request failed before a session exists, stopping");
            self.shared.send_queue.lock().clear();
            self.stop().await;
            return;
        }
        warn!(id = %self.id, %error, "http request failed, message dropped");
        self.flush_http();
    }

    /// Handles one decoded frame. An `Err` is a protocol violation.
    fn on_frame(&mut self, frame: Frame) -> Result<(), TransportError> {
        if self.state() != TransportState::Connected {
            trace!(id = %self.id, "dropping frame received while not connected");
            return Ok(());
        }

        if self.keep_alive.is_set() {
            self.keep_alive.set(PING_TIMEOUT);
        }

        if frame.body.is_empty() {
            self.hook.on_handshake(&frame.header)?;
            return Ok(());
        }

        let body = self.hook.decrypt(&frame.header, frame.body)?;
        let mut msg = MessageBody::decode(self.config.encoding, &body)?;
        let sequencing = msg.take_sequencing()?;

        if self.config.is_reliable() {
            if let Some(ack) = sequencing.ack {
                trace!(id = %self.id, ack, "ack received");
                let replay = self.ledger.on_ack(ack);
                if !replay.is_empty() {
                    debug!(id = %self.id, count = replay.len(), "resending unacknowledged messages");
                    let mut queue = self.shared.send_queue.lock();
                    for msg in replay.into_iter().rev() {
                        queue.push_front(msg);
                    }
                }
                return Ok(());
            }

            if let Some(seq) = sequencing.seq {
                match self.ledger.on_seq(seq) {
                    SeqVerdict::Accept { ack } => self.queue_ack(ack),
                    SeqVerdict::Skip => {
                        debug!(id = %self.id, seq, "skipping already received message");
                        return Ok(());
                    }
                    SeqVerdict::Violation { expected } => {
                        return Err(TransportError::SequenceGap { expected, got: seq });
                    }
                }
            }
        }

        self.notify(NoticeKind::Received {
            header: frame.header,
            body: msg,
        });
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    fn state(&self) -> TransportState {
        self.shared.state()
    }

    fn set_state(&self, state: TransportState) {
        self.shared.set_state(state);
    }

    fn notify(&self, kind: NoticeKind) {
        let notice = TransportNotice {
            id: self.id,
            protocol: self.protocol,
            kind,
        };
        if self.notices.send(notice).is_err() {
            trace!(id = %self.id, "notice receiver is gone");
        }
    }
}

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}
