//! The application-side handle to a transport task.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tether_protocol::{Encoding, EncryptionHook, OutgoingMessage};
use tracing::debug;

use crate::actor::TransportActor;
use crate::{
    SharedSessionId, TransportConfig, TransportId, TransportNotice, TransportProtocol,
    TransportState,
};

/// Requests from the handle to the task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Command {
    Start,
    Stop,
    /// New messages were queued.
    Flush,
}

/// State shared between a handle and its task. Each field has its own lock
/// so that queueing a message never waits on the state or the other queue.
#[derive(Debug, Default)]
pub(crate) struct Shared {
    pub(crate) state: Mutex<TransportState>,
    pub(crate) send_queue: Mutex<VecDeque<OutgoingMessage>>,
    pub(crate) priority_queue: Mutex<VecDeque<OutgoingMessage>>,
}

impl Shared {
    pub(crate) fn state(&self) -> TransportState {
        *self.state.lock()
    }

    pub(crate) fn set_state(&self, state: TransportState) {
        *self.state.lock() = state;
    }
}

/// Starts a transport task on `runtime` and returns its handle.
///
/// The task lives until the handle is dropped; dropping it stops the
/// connection first if it is still up. [`TransportHandle::into_task`] gives
/// the caller the task to wait on.
pub fn spawn_transport(
    runtime: &Handle,
    config: TransportConfig,
    session_id: SharedSessionId,
    hook: Box<dyn EncryptionHook>,
    notices: mpsc::UnboundedSender<TransportNotice>,
) -> TransportHandle {
    let id = TransportId::next();
    let protocol = config.protocol();
    let encoding = config.encoding;
    let needs_handshake = hook.needs_handshake();
    let shared = Arc::new(Shared::default());
    let (commands_tx, commands_rx) = mpsc::unbounded_channel();

    let actor = TransportActor::new(
        id,
        config,
        Arc::clone(&shared),
        session_id,
        hook,
        commands_rx,
        notices,
    );
    let task = runtime.spawn(actor.run());
    debug!(%id, %protocol, "transport spawned");

    TransportHandle {
        id,
        protocol,
        encoding,
        needs_handshake,
        shared,
        commands: commands_tx,
        task,
    }
}

/// Control surface of one transport.
///
/// All methods return immediately; the work happens on the network thread
/// and its outcome arrives as a [`TransportNotice`].
pub struct TransportHandle {
    id: TransportId,
    protocol: TransportProtocol,
    encoding: Encoding,
    needs_handshake: bool,
    shared: Arc<Shared>,
    commands: mpsc::UnboundedSender<Command>,
    task: JoinHandle<()>,
}

impl TransportHandle {
    pub fn id(&self) -> TransportId {
        self.id
    }

    pub fn protocol(&self) -> TransportProtocol {
        self.protocol
    }

    pub fn encoding(&self) -> Encoding {
        self.encoding
    }

    /// Whether the encryption hook expects a handshake after connecting.
    pub fn needs_handshake(&self) -> bool {
        self.needs_handshake
    }

    pub fn state(&self) -> TransportState {
        self.shared.state()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == TransportState::Connected
    }

    /// Begins connecting. A no-op unless the transport is disconnected.
    pub fn start(&self) {
        {
            let mut state = self.shared.state.lock();
            if *state != TransportState::Disconnected {
                return;
            }
            *state = TransportState::Connecting;
        }
        self.command(Command::Start);
    }

    /// Flushes pending messages and closes the connection.
    ///
    /// A stopped transport only cancels a pending reconnect wait.
    pub fn stop(&self) {
        self.command(Command::Stop);
    }

    /// Queues a message behind everything already queued.
    pub fn send(&self, msg: OutgoingMessage) {
        self.shared.send_queue.lock().push_back(msg);
        self.command(Command::Flush);
    }

    /// Queues a message ahead of the normal queue (acks, pongs).
    pub fn send_priority(&self, msg: OutgoingMessage) {
        self.shared.priority_queue.lock().push_back(msg);
        self.command(Command::Flush);
    }

    /// Messages waiting in the normal queue.
    pub fn queued(&self) -> usize {
        self.shared.send_queue.lock().len()
    }

    /// Releases the handle and returns the transport task, which stops
    /// (flushing what is queued) and then finishes.
    pub fn into_task(self) -> JoinHandle<()> {
        self.task
    }

    fn command(&self, command: Command) {
        if self.commands.send(command).is_err() {
            debug!(id = %self.id, ?command, "transport task is gone");
        }
    }
}

impl fmt::Debug for TransportHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportHandle")
            .field("id", &self.id)
            .field("protocol", &self.protocol)
            .field("encoding", &self.encoding)
            .field("state", &self.state())
            .finish()
    }
}
