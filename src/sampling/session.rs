/// Running state of one sampling run.
///
/// `elapsed_seconds` advances by the target interval, never by measured
/// latency, so after `k` ticks it is exactly `k * target_interval_seconds`.
#[derive(Debug, Clone, PartialEq)]
pub struct SamplingSession {
    pub tick_count: u64,
    pub running_sum_of_tick_means: f64,
    pub elapsed_seconds: f64,
    pub target_period_seconds: f64,
    pub target_interval_seconds: f64,
}

impl SamplingSession {
    pub fn new(period_minutes: f64, rate_per_minute: f64) -> Self {
        Self {
            tick_count: 0,
            running_sum_of_tick_means: 0.0,
            elapsed_seconds: 0.0,
            target_period_seconds: period_minutes * 60.0,
            target_interval_seconds: 60.0 / rate_per_minute,
        }
    }

    pub fn record_tick(&mut self, tick_mean: f64) {
        self.running_sum_of_tick_means += tick_mean;
        self.tick_count += 1;
    }

    /// Moves the clock forward one target interval for every recorded tick.
    pub fn advance(&mut self) {
        self.elapsed_seconds = self.tick_count as f64 * self.target_interval_seconds;
    }

    pub fn is_done(&self) -> bool {
        self.elapsed_seconds >= self.target_period_seconds
    }

    /// Mean of the per-tick means (not the mean of every individual sample).
    pub fn final_average(&self) -> Option<f64> {
        if self.tick_count == 0 {
            return None;
        }
        Some(self.running_sum_of_tick_means / self.tick_count as f64)
    }
}
