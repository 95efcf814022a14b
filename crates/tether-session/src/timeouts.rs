//! Per-message-type receive timeouts.

use std::collections::HashMap;
use std::time::Duration;

use tether_tick::Timer;

use crate::event::RecvTimeoutKey;

/// Deadlines for "expect a message of this type within N seconds".
///
/// Receiving the type cancels its deadline. Expired deadlines are taken
/// out exactly once by [`take_expired`](Self::take_expired).
#[derive(Debug, Default)]
pub(crate) struct RecvTimeouts {
    by_name: HashMap<String, Timer>,
    by_int: HashMap<i32, Timer>,
}

impl RecvTimeouts {
    pub(crate) fn set_name(&mut self, msg_type: &str, timeout: Duration) {
        self.by_name.insert(msg_type.to_owned(), Timer::after(timeout));
    }

    pub(crate) fn set_int(&mut self, msg_type: i32, timeout: Duration) {
        self.by_int.insert(msg_type, Timer::after(timeout));
    }

    pub(crate) fn cancel_name(&mut self, msg_type: &str) -> bool {
        self.by_name.remove(msg_type).is_some()
    }

    pub(crate) fn cancel_int(&mut self, msg_type: i32) -> bool {
        self.by_int.remove(&msg_type).is_some()
    }

    pub(crate) fn len(&self) -> usize {
        self.by_name.len() + self.by_int.len()
    }

    /// Removes and returns every expired deadline, names first, each group
    /// sorted.
    pub(crate) fn take_expired(&mut self) -> Vec<RecvTimeoutKey> {
        let mut names: Vec<String> = self
            .by_name
            .iter()
            .filter(|(_, timer)| timer.is_expired())
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        for name in &names {
            self.by_name.remove(name);
        }

        let mut ints: Vec<i32> = self
            .by_int
            .iter()
            .filter(|(_, timer)| timer.is_expired())
            .map(|(n, _)| *n)
            .collect();
        ints.sort_unstable();
        for n in &ints {
            self.by_int.remove(n);
        }

        names
            .into_iter()
            .map(RecvTimeoutKey::Name)
            .chain(ints.into_iter().map(RecvTimeoutKey::Int))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use tokio::time;

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_recv_timeouts_expire_once() {
        let mut timeouts = RecvTimeouts::default();
        timeouts.set_name("login", Duration::from_secs(2));
        timeouts.set_int(7, Duration::from_secs(2));
        timeouts.set_name("later", Duration::from_secs(10));

        assert!(timeouts.take_expired().is_empty());

        time::advance(Duration::from_secs(3)).await;
        assert_eq!(
            timeouts.take_expired(),
            vec![RecvTimeoutKey::Name("login".into()), RecvTimeoutKey::Int(7)]
        );
        assert!(timeouts.take_expired().is_empty());
        assert_eq!(timeouts.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recv_timeouts_cancel_prevents_expiry() {
        let mut timeouts = RecvTimeouts::default();
        timeouts.set_name("login", Duration::from_secs(1));
        timeouts.set_int(3, Duration::from_secs(1));

        assert!(timeouts.cancel_name("login"));
        assert!(timeouts.cancel_int(3));
        assert!(!timeouts.cancel_name("login"));

        time::advance(Duration::from_secs(2)).await;
        assert!(timeouts.take_expired().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_recv_timeouts_set_again_restarts_deadline() {
        let mut timeouts = RecvTimeouts::default();
        timeouts.set_name("login", Duration::from_secs(2));
        time::advance(Duration::from_secs(1)).await;
        timeouts.set_name("login", Duration::from_secs(2));
        time::advance(Duration::from_secs(1)).await;
        assert!(timeouts.take_expired().is_empty());
    }
}
