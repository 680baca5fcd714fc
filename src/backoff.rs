use std::time::Duration;

pub const DEFAULT_RETRY_CAP: u32 = 30;

/// Capped linear retry backoff: the nth failed attempt waits
/// `min(n, cap) * base`. Linear rather than exponential so the wait
/// never grows unbounded while still easing pressure on a struggling
/// broker.
#[derive(Debug, Clone)]
pub struct Backoff {
    attempt: u32,
    cap: u32,
    base: Duration,
}

impl Backoff {
    pub fn new(base: Duration) -> Self {
        Self {
            attempt: 0,
            cap: DEFAULT_RETRY_CAP,
            base,
        }
    }

    pub fn with_cap(mut self, cap: u32) -> Self {
        self.cap = cap.max(1);
        self
    }

    /// Record a failed attempt and return how long to wait before the next one.
    pub fn next_delay(&mut self) -> Duration {
        self.attempt = (self.attempt + 1).min(self.cap);
        self.base * self.attempt
    }

    /// Reset after a successful attempt so the next failure starts at 1.
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
    fn delay_sequence_is_capped_linear() {
        let base = Duration::from_millis(100);
        let mut backoff = Backoff::new(base);

        for attempt in 1..=100u32 {
            let expected = base * attempt.min(DEFAULT_RETRY_CAP);
            assert_eq!(backoff.next_delay(), expected, "attempt {}", attempt);
        }
    }

    #[test]
    fn reset_restarts_at_one() {
        let base = Duration::from_millis(250);
        let mut backoff = Backoff::new(base);

        backoff.next_delay();
        backoff.next_delay();
        backoff.next_delay();
        assert_eq!(backoff.attempt(), 3);

        backoff.reset();
        assert_eq!(backoff.attempt(), 0);
        assert_eq!(backoff.next_delay(), base);
    }

    #[test]
    fn custom_cap_is_honored() {
        let base = Duration::from_millis(10);
        let mut backoff = Backoff::new(base).with_cap(3);

        assert_eq!(backoff.next_delay(), base);
        assert_eq!(backoff.next_delay(), base * 2);
        assert_eq!(backoff.next_delay(), base * 3);
        assert_eq!(backoff.next_delay(), base * 3);
    }
}
