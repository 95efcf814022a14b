//! Single-shot countdown timer.

use std::time::Duration;

use tokio::time::{self, Instant};

/// A one-shot deadline that can be armed, re-armed, and cleared.
///
/// An unarmed timer never expires. [`Timer::expired`] is safe to use as a
/// `tokio::select!` branch: it pends forever while the timer is unarmed, the
/// same way an event-driven tick loop would.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Timer {
    deadline: Option<Instant>,
}

impl Timer {
    /// Creates an unarmed timer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a timer that expires `duration` from now.
    pub fn after(duration: Duration) -> Self {
        let mut timer = Self::new();
        timer.set(duration);
        timer
    }

    /// Arms (or re-arms) the timer to expire `duration` from now.
    pub fn set(&mut self, duration: Duration) {
        self.deadline = Some(Instant::now() + duration);
    }

    /// Disarms the timer.
    pub fn clear(&mut self) {
        self.deadline = None;
    }

    /// Whether the timer is armed.
    pub fn is_set(&self) -> bool {
        self.deadline.is_some()
    }

    /// Whether the timer is armed and its deadline has passed.
    pub fn is_expired(&self) -> bool {
        self.deadline.is_some_and(|deadline| Instant::now() >= deadline)
    }

    /// Time left before expiry. `None` when unarmed, zero once expired.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    /// Resolves once the deadline passes. Pends forever while unarmed.
    ///
    /// The timer is not cleared on resolution; callers re-arm or clear it
    /// when they handle the expiry.
    pub async fn expired(&self) {
        match self.deadline {
            Some(deadline) => time::sleep_until(deadline).await,
            None => std::future::pending::<()>().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timer_new_is_unarmed() {
        let timer = Timer::new();
        assert!(!timer.is_set());
        assert!(!timer.is_expired());
        assert_eq!(timer.remaining(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_expires_after_duration() {
        let timer = Timer::after(Duration::from_secs(3));
        assert!(!timer.is_expired());

        time::advance(Duration::from_secs(3)).await;
        assert!(timer.is_expired());
        assert_eq!(timer.remaining(), Some(Duration::ZERO));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_clear_disarms() {
        let mut timer = Timer::after(Duration::from_secs(1));
        timer.clear();
        time::advance(Duration::from_secs(2)).await;
        assert!(!timer.is_expired());
    }
}
