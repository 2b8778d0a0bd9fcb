//! Reconnection policy.

use std::time::Duration;

use devbox_core::Timings;

/// Fixed-delay reconnection with a bounded number of consecutive attempts.
///
/// Every unsolicited close consumes one attempt; a successful connection
/// gives the whole budget back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    delay: Duration,
    max_attempts: u32,
    attempt: u32,
}

impl ReconnectPolicy {
    #[must_use]
    pub const fn new(delay: Duration, max_attempts: u32) -> Self {
        Self {
            delay,
            max_attempts,
            attempt: 0,
        }
    }

    #[must_use]
    pub const fn from_timings(timings: &Timings) -> Self {
        Self::new(timings.reconnect_delay(), timings.max_reconnect_attempts)
    }

    /// Consecutive attempts since the last successful connection.
    #[must_use]
    pub const fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Whether the budget is used up.
    #[must_use]
    pub const fn is_exhausted(&self) -> bool {
        self.attempt >= self.max_attempts
    }

    /// The connection came up.
    pub const fn on_connected(&mut self) {
        self.attempt = 0;
    }

    /// The connection went away without being asked to.
    ///
    /// Returns how long to wait before the next attempt, or `None` once the
    /// budget is exhausted.
    pub const fn on_close(&mut self) -> Option<Duration> {
        if self.is_exhausted() {
            return None;
        }
        self.attempt += 1;
        Some(self.delay)
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::from_timings(&Timings::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let mut policy = ReconnectPolicy::default();
        assert_eq!(policy.attempt(), 0);
        assert_eq!(policy.on_close(), Some(Duration::from_millis(3000)));
        assert_eq!(policy.attempt(), 1);
    }

    #[test]
    fn test_budget_is_bounded() {
        let mut policy = ReconnectPolicy::new(Duration::from_secs(3), 10);
        for expected in 1..=10 {
            assert!(policy.on_close().is_some());
            assert_eq!(policy.attempt(), expected);
        }
        assert!(policy.is_exhausted());
        assert_eq!(policy.on_close(), None);
        assert_eq!(policy.attempt(), 10);
    }

    #[test]
    fn test_connect_resets() {
        let mut policy = ReconnectPolicy::new(Duration::from_secs(3), 10);
        let _ = policy.on_close();
        let _ = policy.on_close();
        let _ = policy.on_close();
        assert_eq!(policy.attempt(), 3);

        policy.on_connected();
        assert_eq!(policy.attempt(), 0);
        assert!(!policy.is_exhausted());
    }

    #[test]
    fn test_zero_budget_never_retries() {
        let mut policy = ReconnectPolicy::new(Duration::from_secs(3), 0);
        assert_eq!(policy.on_close(), None);
    }
}
