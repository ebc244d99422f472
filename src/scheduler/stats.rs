use std::time::{Duration, SystemTime};

/// How often rolling averages are logged.
const LOG_EVERY: u64 = 30;

/// Timing of the most recent completed cycle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PerformanceSample {
    /// From frame captured to inference outputs available
    pub capture_to_inference_ms: f64,
    /// Whole cycle, capture through promotion
    pub total_cycle_ms: f64,
    /// Wall clock time the cycle finished
    pub timestamp: SystemTime,
}

impl PerformanceSample {
    pub fn fps(&self) -> f64 {
        if self.total_cycle_ms > 0.0 {
            1000.0 / self.total_cycle_ms
        } else {
            0.0
        }
    }
}

/// Per-stage durations for one cycle.
#[derive(Debug, Clone, Copy, Default)]
pub struct CycleTimings {
    pub capture: Duration,
    pub inference: Duration,
    pub render: Duration,
    pub total: Duration,
}

impl CycleTimings {
    pub fn sample(&self) -> PerformanceSample {
        PerformanceSample {
            capture_to_inference_ms: ms(self.inference),
            total_cycle_ms: ms(self.total),
            timestamp: SystemTime::now(),
        }
    }
}

/// Running totals for periodic log lines.
#[derive(Debug, Default)]
pub struct CycleStats {
    frame_count: u64,
    total_capture: Duration,
    total_inference: Duration,
    total_render: Duration,
    total_cycle: Duration,
}

impl CycleStats {
    pub fn record(&mut self, timings: &CycleTimings) {
        self.frame_count += 1;
        self.total_capture += timings.capture;
        self.total_inference += timings.inference;
        self.total_render += timings.render;
        self.total_cycle += timings.total;

        if self.frame_count % LOG_EVERY == 0 {
            self.log();
        }
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    /// Mean total cycle time in milliseconds.
    pub fn average_cycle_ms(&self) -> f64 {
        if self.frame_count == 0 {
            return 0.0;
        }
        ms(self.total_cycle) / self.frame_count as f64
    }

    fn log(&self) {
        let n = self.frame_count as f64;
        let total_ms = self.average_cycle_ms();
        let fps = if total_ms > 0.0 { 1000.0 / total_ms } else { 0.0 };

        tracing::info!(
            "Frame {}: capture={:.1}ms, inference={:.1}ms, render={:.1}ms, total={:.1}ms, fps={:.1}",
            self.frame_count,
            ms(self.total_capture) / n,
            ms(self.total_inference) / n,
            ms(self.total_render) / n,
            total_ms,
            fps
        );
    }
}

fn ms(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}
