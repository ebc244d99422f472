use std::time::Duration;

use async_trait::async_trait;
use tokio::time::{self, Interval, MissedTickBehavior};

/// Source of display-refresh opportunities.
///
/// The scheduler waits on `next_frame` between cycles instead of sleeping a
/// fixed amount after each one.
#[async_trait(?Send)]
pub trait FrameClock {
    async fn next_frame(&mut self);
}

/// Refresh ticks at a fixed rate. A late cycle skips the ticks it missed
/// rather than bursting to catch up.
pub struct IntervalClock {
    interval: Interval,
}

impl IntervalClock {
    pub fn new(fps: u32) -> Self {
        let period = Duration::from_secs_f64(1.0 / fps.max(1) as f64);
        let mut interval = time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        Self { interval }
    }

    pub fn period(&self) -> Duration {
        self.interval.period()
    }
}

#[async_trait(?Send)]
impl FrameClock for IntervalClock {
    async fn next_frame(&mut self) {
        self.interval.tick().await;
    }
}

/// Ticks as fast as the loop can run, yielding to other tasks each time.
#[derive(Debug, Default)]
pub struct FreeRunningClock;

#[async_trait(?Send)]
impl FrameClock for FreeRunningClock {
    async fn next_frame(&mut self) {
        tokio::task::yield_now().await;
    }
}
