use std::time::Duration;
use tokio::time::{interval, Instant, Interval, MissedTickBehavior};

/// Fixed-period ticker for the scheduler loop.
pub(crate) struct Timer {
    interval: Interval,
    last_tick: Instant,
    period: Duration,
}

impl Timer {
    pub async fn new(period: Duration) -> Self {
        let mut interval = interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // NOTE: First tick completes instantly
        let last_tick = interval.tick().await;
        Self {
            interval,
            last_tick,
            period,
        }
    }

    /// Waits for the next tick and returns the time since the previous one.
    pub async fn tick(&mut self) -> Duration {
        let next = self.interval.tick().await;
        let elapsed = next.duration_since(self.last_tick);
        self.last_tick = next;
        elapsed
    }
}

impl std::fmt::Display for Timer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> Result<(), std::fmt::Error> {
        write!(f, "{}", humantime::format_duration(self.period))
    }
}
