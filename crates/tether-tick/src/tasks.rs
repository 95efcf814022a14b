//! The task queue drained by the application's `update()` call.
//!
//! The network thread never runs user code. It pushes a [`Task`] here
//! instead, and the application runs all pending tasks on its own thread when
//! it calls [`TaskQueue::update`]. Each task receives the caller's context
//! (for a session, the table of user handlers) by `&mut`, so user handlers
//! need no locking and never run concurrently with each other.
//!
//! Besides the FIFO there is one optional *persistent* task. It runs at the
//! start of every `update()` until it is replaced or cleared, which is how the
//! session polls receive timeouts and defers its first `start()`.

use std::collections::VecDeque;

use parking_lot::Mutex;

/// A one-shot task. Returning `false` stops the current drain; the tasks
/// behind it stay queued for the next `update()`.
pub type Task<C> = Box<dyn FnOnce(&mut C) -> bool + Send>;

/// The persistent task run at the start of every `update()`.
pub type PersistentTask<C> = Box<dyn FnMut(&mut C) -> bool + Send>;

/// Slot for the persistent task.
///
/// `generation` is bumped on every replace/clear so that a task which
/// replaces itself while running is not restored afterwards.
struct Persistent<C> {
    generation: u64,
    task: Option<PersistentTask<C>>,
}

/// FIFO of deferred tasks plus one optional persistent task.
///
/// `push`, `set_persistent` and `clear_persistent` may be called from any
/// thread. `update` is meant to be called from exactly one thread.
pub struct TaskQueue<C> {
    queue: Mutex<VecDeque<Task<C>>>,
    persistent: Mutex<Persistent<C>>,
}

impl<C> Default for TaskQueue<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> TaskQueue<C> {
    /// Creates an empty queue with no persistent task.
    pub fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            persistent: Mutex::new(Persistent {
                generation: 0,
                task: None,
            }),
        }
    }

    /// Appends a one-shot task.
    pub fn push<F>(&self, task: F)
    where
        F: FnOnce(&mut C) -> bool + Send + 'static,
    {
        self.queue.lock().push_back(Box::new(task));
    }

    /// Installs (or replaces) the persistent task.
    pub fn set_persistent<F>(&self, task: F)
    where
        F: FnMut(&mut C) -> bool + Send + 'static,
    {
        let mut slot = self.persistent.lock();
        slot.generation += 1;
        slot.task = Some(Box::new(task));
    }

    /// Removes the persistent task, if any.
    pub fn clear_persistent(&self) {
        let mut slot = self.persistent.lock();
        slot.generation += 1;
        slot.task = None;
    }

    /// Whether a persistent task is installed.
    pub fn has_persistent(&self) -> bool {
        self.persistent.lock().task.is_some()
    }

    /// Number of queued one-shot tasks.
    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    /// Whether no one-shot tasks are queued.
    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }

    /// Runs the persistent task, then drains queued tasks in FIFO order.
    /// If the persistent task returns `false` the queue is left untouched
    /// until the next call.
    ///
    /// No lock is held while a task runs, so tasks may push more tasks or
    /// swap the persistent task. Tasks pushed during the drain run in the
    /// same call, after everything queued before them.
    pub fn update(&self, ctx: &mut C) {
        if !self.run_persistent(ctx) {
            return;
        }

        loop {
            let Some(task) = self.queue.lock().pop_front() else {
                break;
            };
            if !task(ctx) {
                break;
            }
        }
    }

    /// Returns whether the drain should go on. `true` without a task.
    fn run_persistent(&self, ctx: &mut C) -> bool {
        let (generation, mut task) = {
            let mut slot = self.persistent.lock();
            match slot.task.take() {
                Some(task) => (slot.generation, task),
                None => return true,
            }
        };

        let proceed = task(ctx);

        let mut slot = self.persistent.lock();
        if slot.generation == generation {
            slot.task = Some(task);
        }
        proceed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_runs_tasks_in_fifo_order() {
        let queue = TaskQueue::<Vec<u32>>::new();
        for i in 0..3 {
            queue.push(move |out: &mut Vec<u32>| {
                out.push(i);
                true
            });
        }

        let mut out = Vec::new();
        queue.update(&mut out);
        assert_eq!(out, vec![0, 1, 2]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_update_false_stops_drain_and_keeps_rest() {
        let queue = TaskQueue::<Vec<u32>>::new();
        queue.push(|out: &mut Vec<u32>| {
            out.push(1);
            false
        });
        queue.push(|out: &mut Vec<u32>| {
            out.push(2);
            true
        });

        let mut out = Vec::new();
        queue.update(&mut out);
        assert_eq!(out, vec![1]);
        assert_eq!(queue.len(), 1);

        queue.update(&mut out);
        assert_eq!(out, vec![1, 2]);
    }

    #[test]
    fn test_persistent_false_skips_drain_until_next_update() {
        let queue = TaskQueue::<Vec<&'static str>>::new();
        let mut hold = true;
        queue.set_persistent(move |out: &mut Vec<&'static str>| {
            out.push("persistent");
            !std::mem::replace(&mut hold, false)
        });
        queue.push(|out: &mut Vec<&'static str>| {
            out.push("queued");
            true
        });

        let mut out = Vec::new();
        queue.update(&mut out);
        assert_eq!(out, vec!["persistent"]);
        assert_eq!(queue.len(), 1);
        assert!(queue.has_persistent());

        queue.update(&mut out);
        assert_eq!(out, vec!["persistent", "persistent", "queued"]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_persistent_task_runs_first_every_update() {
        let queue = TaskQueue::<Vec<&'static str>>::new();
        queue.set_persistent(|out: &mut Vec<&'static str>| {
            out.push("persistent");
            true
        });
        queue.push(|out: &mut Vec<&'static str>| {
            out.push("once");
            true
        });

        let mut out = Vec::new();
        queue.update(&mut out);
        queue.update(&mut out);
        assert_eq!(out, vec!["persistent", "once", "persistent"]);
    }

    #[test]
    fn test_clear_persistent_stops_it() {
        let queue = TaskQueue::<u32>::new();
        queue.set_persistent(|n: &mut u32| {
            *n += 1;
            true
        });

        let mut n = 0;
        queue.update(&mut n);
        queue.clear_persistent();
        queue.update(&mut n);
        assert_eq!(n, 1);
        assert!(!queue.has_persistent());
    }
}
