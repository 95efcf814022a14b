//! Timing and scheduling primitives for Tether.
//!
//! Everything here is about *when* work happens, never *what* the work is:
//!
//! - [`Timer`]: single-shot countdown (ping interval, keep-alive, backoff wait).
//! - [`ReconnectBackoff`]: doubling wait with a cap and a per-address retry budget.
//! - [`TaskQueue`]: deferred work drained by the application's `update()`.
//! - [`NetworkThread`]: the dedicated thread that owns all socket I/O.
//!
//! # How it fits in the stack
//!
//! ```text
//! Application thread ── update() ──→ TaskQueue ←── push ── NetworkThread (transports)
//! ```
//!
//! Timers are built on `tokio::time::Instant`, so tests can run them under
//! `#[tokio::test(start_paused = true)]` and advance the clock by hand.

// ---------------------------------------------------------------------------
// Module declarations
// ---------------------------------------------------------------------------

mod backoff;
mod network_thread;
mod tasks;
mod timer;

// ---------------------------------------------------------------------------
// Re-exports
// ---------------------------------------------------------------------------

pub use backoff::{BackoffStep, ReconnectBackoff};
pub use network_thread::NetworkThread;
pub use tasks::{PersistentTask, Task, TaskQueue};
pub use timer::Timer;
