use std::time::Duration;

/// Default delay between a transport loss and the next connection attempt.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(3);

/// Decides when (and whether) to try again after a transport loss.
///
/// `attempt` counts consecutive failures since the last successful open,
/// starting at 1. Returning `None` gives up and leaves the connection
/// `Disconnected`.
pub trait ReconnectPolicy {
    fn next_delay(&mut self, attempt: u32) -> Option<Duration>;

    /// Called when a transport is established.
    fn reset(&mut self) {}
}

/// Same delay every time, no attempt limit.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FixedDelay {
    delay: Duration,
}

impl FixedDelay {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }
}

impl Default for FixedDelay {
    fn default() -> Self {
        Self::new(DEFAULT_RECONNECT_DELAY)
    }
}

impl ReconnectPolicy for FixedDelay {
    fn next_delay(&mut self, _attempt: u32) -> Option<Duration> {
        Some(self.delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_delay_never_gives_up() {
        let mut policy = FixedDelay::default();
        for attempt in [1, 2, 50, 10_000] {
            assert_eq!(policy.next_delay(attempt), Some(Duration::from_secs(3)));
        }
    }
}
