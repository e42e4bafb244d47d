//! Exponential reconnect backoff.

use std::time::Duration;

/// Doubling delay schedule with a hard cap. The attempt counter resets on
/// every successful open, so a flaky link starts over from the base delay.
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    cap: Duration,
    attempt: u32,
}

impl Backoff {
    pub fn new(base: Duration, cap: Duration) -> Self {
        Self {
            base,
            cap,
            attempt: 0,
        }
    }

    /// Delay for a given 1-based attempt number.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return self.base;
        }
        let doubled = self
            .base
            .checked_mul(1u32 << (attempt - 1).min(31))
            .unwrap_or(self.cap);
        doubled.min(self.cap)
    }

    /// Record a failed attempt and return how long to wait before retrying.
    pub fn next_delay(&mut self) -> Duration {
        self.attempt = self.attempt.saturating_add(1);
        self.delay_for(self.attempt)
    }

    /// Called on a successful open.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doubles_from_base_until_cap() {
        let mut backoff = Backoff::new(Duration::from_millis(1000), Duration::from_millis(30000));
        let delays: Vec<u64> = (0..5).map(|_| backoff.next_delay().as_millis() as u64).collect();
        assert_eq!(delays, vec![1000, 2000, 4000, 8000, 16000]);
    }

    #[test]
    fn caps_and_stays_capped() {
        let mut backoff = Backoff::new(Duration::from_millis(1000), Duration::from_millis(30000));
        let mut last = Duration::ZERO;
        for _ in 0..20 {
            let delay = backoff.next_delay();
            assert!(delay >= last, "backoff must be monotonically non-decreasing");
            assert!(delay <= Duration::from_millis(30000));
            last = delay;
        }
        assert_eq!(last, Duration::from_millis(30000));
    }

    #[test]
    fn reset_returns_to_base() {
        let mut backoff = Backoff::new(Duration::from_millis(1000), Duration::from_millis(30000));
        for _ in 0..6 {
            backoff.next_delay();
        }
        backoff.reset();
        assert_eq!(backoff.attempt(), 0);
        assert_eq!(backoff.next_delay(), Duration::from_millis(1000));
    }
}
