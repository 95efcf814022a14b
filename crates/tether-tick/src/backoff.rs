//! Reconnect backoff for transports with auto-reconnect enabled.
//!
//! The wait starts at one second and doubles after every failed attempt,
//! capped at [`ReconnectBackoff::DEFAULT_MAX_WAIT`]. Once one address has
//! failed more than [`ReconnectBackoff::DEFAULT_MAX_ATTEMPTS`] times the caller
//! is told to move on to the next resolved address, and the backoff starts over.

use std::time::Duration;

/// What the transport should do after a failed connect attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffStep {
    /// Wait this long, then retry the same address.
    Wait(Duration),
    /// The retry budget for this address is spent; try the next one now.
    NextAddress,
}

/// Tracks failed attempts against the current address.
#[derive(Debug, Clone)]
pub struct ReconnectBackoff {
    initial_wait: Duration,
    max_wait: Duration,
    max_attempts: u32,
    attempts: u32,
    wait: Duration,
}

impl Default for ReconnectBackoff {
    fn default() -> Self {
        Self::new(
            Self::DEFAULT_INITIAL_WAIT,
            Self::DEFAULT_MAX_WAIT,
            Self::DEFAULT_MAX_ATTEMPTS,
        )
    }
}

impl ReconnectBackoff {
    /// First wait after a failure.
    pub const DEFAULT_INITIAL_WAIT: Duration = Duration::from_secs(1);
    /// Upper bound on a single wait.
    pub const DEFAULT_MAX_WAIT: Duration = Duration::from_secs(10);
    /// Failures tolerated on one address before moving on.
    pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

    /// Creates a backoff with explicit limits.
    pub fn new(initial_wait: Duration, max_wait: Duration, max_attempts: u32) -> Self {
        Self {
            initial_wait,
            max_wait,
            max_attempts,
            attempts: 0,
            wait: initial_wait,
        }
    }

    /// Records a failed attempt and returns the next step.
    pub fn on_failure(&mut self) -> BackoffStep {
        self.attempts += 1;

        if self.attempts > self.max_attempts {
            self.reset();
            return BackoffStep::NextAddress;
        }

        let wait = self.wait;
        self.wait = (self.wait * 2).min(self.max_wait);
        BackoffStep::Wait(wait)
    }

    /// Starts over (new `start()`, new address, or successful connect).
    pub fn reset(&mut self) {
        self.attempts = 0;
        self.wait = self.initial_wait;
    }

    /// Failed attempts recorded against the current address.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_waits_double_then_advance() {
        let mut backoff = ReconnectBackoff::default();
        assert_eq!(backoff.on_failure(), BackoffStep::Wait(Duration::from_secs(1)));
        assert_eq!(backoff.on_failure(), BackoffStep::Wait(Duration::from_secs(2)));
        assert_eq!(backoff.on_failure(), BackoffStep::Wait(Duration::from_secs(4)));
        assert_eq!(backoff.on_failure(), BackoffStep::NextAddress);
        assert_eq!(backoff.attempts(), 0);
        assert_eq!(backoff.on_failure(), BackoffStep::Wait(Duration::from_secs(1)));
    }

    #[test]
    fn test_backoff_wait_is_capped() {
        let mut backoff =
            ReconnectBackoff::new(Duration::from_secs(4), Duration::from_secs(10), 10);
        let waits: Vec<_> = (0..4).map(|_| backoff.on_failure()).collect();
        assert_eq!(
            waits,
            vec![
                BackoffStep::Wait(Duration::from_secs(4)),
                BackoffStep::Wait(Duration::from_secs(8)),
                BackoffStep::Wait(Duration::from_secs(10)),
                BackoffStep::Wait(Duration::from_secs(10)),
            ]
        );
    }

    #[test]
    fn test_backoff_reset_restarts_sequence() {
        let mut backoff = ReconnectBackoff::default();
        backoff.on_failure();
        backoff.on_failure();
        backoff.reset();
        assert_eq!(backoff.on_failure(), BackoffStep::Wait(Duration::from_secs(1)));
    }
}
