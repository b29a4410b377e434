//! Reconnect pacing for persistent outbound connections.

use std::time::Duration;

/// Exponential backoff with a ceiling.
///
/// Each call to [`Backoff::next_delay`] returns the current delay and doubles
/// it up to the configured maximum. Call [`Backoff::reset`] after a
/// connection is successfully established.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            current: initial,
        }
    }

    /// The delay to sleep before the next connection attempt.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.max);
        delay
    }

    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(30))
    }
}
