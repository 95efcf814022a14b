//! The dedicated network thread.
//!
//! All socket and HTTP I/O for a session runs on one OS thread that hosts a
//! single-threaded Tokio runtime. The application creates the thread
//! explicitly (one per session) and owns it; dropping the [`NetworkThread`]
//! shuts the runtime down and joins the thread. Tasks that must finish
//! first (a final flush, say) are handed to [`NetworkThread::shutdown_after`].

use std::future::Future;
use std::io;
use std::thread;
use std::time::Duration;

use tokio::runtime::{Builder, Handle};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// How long shutdown waits for blocking work (DNS lookups) to wind down.
const SHUTDOWN_GRACE: Duration = Duration::from_millis(200);
/// How long shutdown waits for the tasks passed to `shutdown_after`.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

type Drain = Vec<JoinHandle<()>>;

/// Owner of the network thread and its runtime.
pub struct NetworkThread {
    name: String,
    handle: Handle,
    shutdown: Option<oneshot::Sender<Drain>>,
    thread: Option<thread::JoinHandle<()>>,
}

impl NetworkThread {
    /// Spawns a new network thread with the given name.
    ///
    /// # Errors
    /// Returns the I/O error if the runtime or the OS thread cannot be created.
    pub fn spawn(name: impl Into<String>) -> io::Result<Self> {
        let name = name.into();
        let runtime = Builder::new_current_thread().enable_all().build()?;
        let handle = runtime.handle().clone();
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<Drain>();

        let thread_name = name.clone();
        let thread = thread::Builder::new().name(name.clone()).spawn(move || {
            debug!(thread = %thread_name, "network thread started");
            // Spawned transport tasks make progress while this future pends.
            runtime.block_on(async {
                let drain = shutdown_rx.await.unwrap_or_default();
                let finished = tokio::time::timeout(DRAIN_TIMEOUT, async {
                    for task in drain {
                        let _ = task.await;
                    }
                });
                if finished.await.is_err() {
                    warn!(thread = %thread_name, "tasks still running at shutdown, cancelling");
                }
            });
            runtime.shutdown_timeout(SHUTDOWN_GRACE);
            debug!(thread = %thread_name, "network thread stopped");
        })?;

        Ok(Self {
            name,
            handle,
            shutdown: Some(shutdown_tx),
            thread: Some(thread),
        })
    }

    /// The thread name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Handle to the runtime, for spawning from other threads.
    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    /// Spawns a task onto the network thread.
    pub fn spawn_task<F>(&self, future: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.handle.spawn(future)
    }

    /// Whether [`shutdown`](Self::shutdown) has already run.
    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_none()
    }

    /// Stops the runtime and joins the thread. Idempotent.
    ///
    /// Tasks still running on the thread are cancelled at their next await
    /// point. Calling this from the network thread itself only signals the
    /// shutdown; the join is skipped.
    pub fn shutdown(&mut self) {
        self.shutdown_after(Vec::new());
    }

    /// Like [`shutdown`](Self::shutdown), but lets `tasks` run to completion
    /// first (bounded by a two second timeout).
    pub fn shutdown_after(&mut self, tasks: Vec<JoinHandle<()>>) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(tasks);
        }

        let Some(thread) = self.thread.take() else {
            return;
        };
        if thread.thread().id() == thread::current().id() {
            return;
        }
        if thread.join().is_err() {
            warn!(thread = %self.name, "network thread panicked");
        }
    }
}

impl Drop for NetworkThread {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for NetworkThread {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetworkThread")
            .field("name", &self.name)
            .field("shut_down", &self.is_shut_down())
            .finish()
    }
}
