//! Fixed-interval polling clock for the runner loop.

use std::time::Duration;
use tokio::time::{Interval, MissedTickBehavior, interval};

/// Ticks every `period`. A tick that runs long delays the next one
/// instead of bursting to catch up.
pub struct Ticker {
    interval: Interval,
}

impl Ticker {
    pub fn new(period: Duration) -> Self {
        let mut interval = interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self { interval }
    }

    pub fn period(&self) -> Duration {
        self.interval.period()
    }

    /// Wait for the next tick. The first tick completes immediately.
    pub async fn tick(&mut self) {
        self.interval.tick().await;
    }
}
