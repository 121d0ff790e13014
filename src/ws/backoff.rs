//! Exponential reconnect backoff.

use std::time::Duration;

/// Attempt counter with a doubling delay and a fixed ceiling.
///
/// The first connection attempt is not counted. Each automatic retry calls
/// [`next_delay`](Self::next_delay), which yields `base * 2^(k-1)` for retry
/// `k` until `k` would exceed the ceiling. A successful open, or a manual
/// reconnect, calls [`reset`](Self::reset).
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    max_attempts: u32,
    attempt: u32,
}

impl Backoff {
    pub fn new(base: Duration, max_attempts: u32) -> Self {
        Self {
            base,
            max_attempts,
            attempt: 0,
        }
    }

    /// Delay before retry `attempt` (1-based).
    pub fn delay_for(base: Duration, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
        base.saturating_mul(factor)
    }

    /// Advance to the next retry, or `None` once the ceiling is reached.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.attempt >= self.max_attempts {
            return None;
        }
        self.attempt += 1;
        Some(Self::delay_for(self.base, self.attempt))
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    /// Retries consumed since the last reset.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn is_exhausted(&self) -> bool {
        self.attempt >= self.max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delays_double_from_base() {
        let mut backoff = Backoff::new(Duration::from_millis(1000), 5);
        let delays: Vec<u128> = std::iter::from_fn(|| backoff.next_delay())
            .map(|d| d.as_millis())
            .collect();
        assert_eq!(delays, vec![1000, 2000, 4000, 8000, 16000]);
        assert!(backoff.is_exhausted());
        assert_eq!(backoff.next_delay(), None);
    }

    #[test]
    fn reset_starts_over() {
        let mut backoff = Backoff::new(Duration::from_millis(500), 3);
        backoff.next_delay();
        backoff.next_delay();
        assert_eq!(backoff.attempt(), 2);
        backoff.reset();
        assert_eq!(backoff.attempt(), 0);
        assert_eq!(backoff.next_delay(), Some(Duration::from_millis(500)));
    }

    #[test]
    fn zero_ceiling_never_retries() {
        let mut backoff = Backoff::new(Duration::from_secs(1), 0);
        assert_eq!(backoff.next_delay(), None);
    }

    #[test]
    fn huge_attempt_saturates() {
        assert_eq!(
            Backoff::delay_for(Duration::from_secs(1), 64),
            Duration::from_secs(u32::MAX as u64)
        );
    }
}
