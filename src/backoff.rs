//! Exponential backoff state, shared by the subscriber's reconnect loop and
//! the dispatcher's sink retries.
//!
//! Each connection or retry scope owns its own [`Backoff`] instance, so
//! tests can run several independently.

use std::time::Duration;

/// Doubling backoff with a cap.
///
/// [`Backoff::next_delay`] returns the delay to wait before the next
/// attempt; [`Backoff::reset`] restores the initial delay after a success.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
    attempt: u32,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            current: initial,
            attempt: 0,
        }
    }

    /// The delay before the next attempt. Doubles on each call, capped at
    /// the maximum.
    pub fn next_delay(&mut self) -> Duration {
        self.attempt += 1;
        let delay = self.current;
        self.current = (self.current * 2).min(self.max);
        delay
    }

    /// Restore the initial delay after a successful attempt.
    pub fn reset(&mut self) {
        self.attempt = 0;
        self.current = self.initial;
    }

    /// Number of delays handed out since the last reset.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_doubling() {
        let mut backoff = Backoff::new(Duration::from_millis(100), Duration::from_secs(30));

        assert_eq!(backoff.next_delay(), Duration::from_millis(100));
        assert_eq!(backoff.next_delay(), Duration::from_millis(200));
        assert_eq!(backoff.next_delay(), Duration::from_millis(400));
        assert_eq!(backoff.attempt(), 3);
    }

    #[test]
    fn test_cap() {
        let mut backoff = Backoff::new(Duration::from_secs(20), Duration::from_secs(30));

        assert_eq!(backoff.next_delay(), Duration::from_secs(20));
        // Would be 40s, capped at 30s.
        assert_eq!(backoff.next_delay(), Duration::from_secs(30));
        assert_eq!(backoff.next_delay(), Duration::from_secs(30));
    }

    #[test]
    fn test_reset() {
        let mut backoff = Backoff::new(Duration::from_millis(100), Duration::from_secs(30));

        backoff.next_delay();
        backoff.next_delay();
        assert_eq!(backoff.attempt(), 2);

        backoff.reset();
        assert_eq!(backoff.attempt(), 0);
        assert_eq!(backoff.next_delay(), Duration::from_millis(100));
    }
}
