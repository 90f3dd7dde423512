use std::time::Duration;

/// Sleep schedule for idle poll loops.
///
/// Starts at `initial`, doubles after every idle round up to `max`, and
/// drops back to `initial` as soon as the loop sees activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(Duration::from_millis(1), Duration::from_millis(16))
    }
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        let max = max.max(initial);
        Self {
            initial,
            max,
            current: initial,
        }
    }

    /// The delay for this idle round; advances the schedule.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.max);
        delay
    }

    /// Sleep for the next delay, never past `remaining`.
    pub fn idle(&mut self, remaining: Duration) {
        let delay = self.next_delay().min(remaining);
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
    }

    pub fn reset(&mut self) {
        self.current = self.initial;
    }

    pub fn initial(&self) -> Duration {
        self.initial
    }

    pub fn max(&self) -> Duration {
        self.max
    }
}
