use std::time::Duration;

/// Exponential backoff for write retries.
///
/// Starts at `initial` and doubles after each call to `next_delay()`,
/// capping at `max`. A server hint (`Retry-After`) lifts the delay to at
/// least the hint, still capped. Delays returned by one instance never
/// decrease.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    current: Duration,
    max: Duration,
    last: Duration,
}

impl ExponentialBackoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            current: initial,
            max,
            last: Duration::ZERO,
        }
    }

    /// Return the next delay and advance the state.
    pub fn next_delay(&mut self, hint: Option<Duration>) -> Duration {
        let nominal = self.current;
        self.current = self.current.saturating_mul(2).min(self.max);

        let delay = hint
            .map_or(nominal, |hint| hint.max(nominal))
            .max(self.last)
            .min(self.max);
        self.last = delay;
        delay
    }
}
