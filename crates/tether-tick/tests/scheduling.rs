//! Integration tests for the network thread and the task queue working
//! together: work spawned on the network thread hands results back to the
//! calling thread only through the queue.

use std::sync::Arc;
use std::sync::mpsc;
use std::time::Duration;

use tether_tick::{NetworkThread, TaskQueue, Timer};

// =========================================================================
// NetworkThread
// =========================================================================

#[test]
fn test_network_thread_runs_spawned_task() {
    let thread = NetworkThread::spawn("test-net").unwrap();
    let (tx, rx) = mpsc::channel();

    thread.spawn_task(async move {
        tx.send(std::thread::current().name().map(str::to_owned)).unwrap();
    });

    let name = rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(name.as_deref(), Some("test-net"));
}

#[test]
fn test_network_thread_shutdown_is_idempotent() {
    let mut thread = NetworkThread::spawn("test-net-shutdown").unwrap();
    assert!(!thread.is_shut_down());

    thread.shutdown();
    thread.shutdown();
    assert!(thread.is_shut_down());
}

#[test]
fn test_network_thread_drop_cancels_pending_task() {
    let (tx, rx) = mpsc::channel::<()>();
    {
        let thread = NetworkThread::spawn("test-net-drop").unwrap();
        thread.spawn_task(async move {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            let _ = tx.send(());
        });
    }
    // The task was dropped with the runtime, so its sender is gone.
    assert!(rx.recv_timeout(Duration::from_secs(5)).is_err());
}

#[test]
fn test_network_thread_shutdown_after_lets_tasks_finish() {
    let (tx, rx) = mpsc::channel::<&'static str>();
    let mut thread = NetworkThread::spawn("test-net-drain").unwrap();
    let task = thread.spawn_task(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        tx.send("flushed").unwrap();
    });

    thread.shutdown_after(vec![task]);
    assert!(thread.is_shut_down());
    assert_eq!(rx.try_recv(), Ok("flushed"));
}

#[test]
fn test_network_thread_timer_works_on_runtime() {
    let thread = NetworkThread::spawn("test-net-timer").unwrap();
    let (tx, rx) = mpsc::channel();

    thread.spawn_task(async move {
        let timer = Timer::after(Duration::from_millis(20));
        timer.expired().await;
        tx.send(timer.is_expired()).unwrap();
    });

    assert!(rx.recv_timeout(Duration::from_secs(5)).unwrap());
}

// =========================================================================
// TaskQueue across threads
// =========================================================================

#[test]
fn test_tasks_pushed_from_network_thread_run_on_update() {
    let thread = NetworkThread::spawn("test-net-queue").unwrap();
    let queue = Arc::new(TaskQueue::<Vec<String>>::new());
    let (done_tx, done_rx) = mpsc::channel();

    let producer = Arc::clone(&queue);
    thread.spawn_task(async move {
        for i in 0..3 {
            producer.push(move |out: &mut Vec<String>| {
                out.push(format!("event-{i}"));
                true
            });
        }
        done_tx.send(()).unwrap();
    });
    done_rx.recv_timeout(Duration::from_secs(5)).unwrap();

    let mut out = Vec::new();
    queue.update(&mut out);
    assert_eq!(out, vec!["event-0", "event-1", "event-2"]);
}

#[test]
fn test_persistent_task_can_clear_itself() {
    let queue = Arc::new(TaskQueue::<u32>::new());
    let inner = Arc::clone(&queue);
    queue.set_persistent(move |n: &mut u32| {
        *n += 1;
        inner.clear_persistent();
        true
    });

    let mut n = 0;
    queue.update(&mut n);
    queue.update(&mut n);
    assert_eq!(n, 1);
}

#[test]
fn test_persistent_task_can_replace_itself() {
    let queue = Arc::new(TaskQueue::<Vec<&'static str>>::new());
    let inner = Arc::clone(&queue);
    queue.set_persistent(move |out: &mut Vec<&'static str>| {
        out.push("first");
        inner.set_persistent(|out: &mut Vec<&'static str>| {
            out.push("second");
            true
        });
        true
    });

    let mut out = Vec::new();
    queue.update(&mut out);
    queue.update(&mut out);
    queue.update(&mut out);
    assert_eq!(out, vec!["first", "second", "second"]);
}
