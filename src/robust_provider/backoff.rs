use std::time::Duration;

use backon::BackoffBuilder;

/// Exponential backoff where attempt `n` waits `base * 2^n` plus up to half of that again.
#[derive(Debug, Clone, Copy)]
pub struct JitteredBackoffBuilder {
    base: Duration,
    max_times: usize,
}

impl JitteredBackoffBuilder {
    #[must_use]
    pub fn new(base: Duration, max_times: usize) -> Self {
        Self { base, max_times }
    }
}

impl BackoffBuilder for JitteredBackoffBuilder {
    type Backoff = JitteredBackoff;

    fn build(self) -> Self::Backoff {
        JitteredBackoff { base: self.base, max_times: self.max_times, attempt: 0 }
    }
}

#[derive(Debug)]
pub struct JitteredBackoff {
    base: Duration,
    max_times: usize,
    attempt: usize,
}

impl JitteredBackoff {
    fn delay_for(&self, attempt: usize) -> Duration {
        let exponent = u32::try_from(attempt).unwrap_or(u32::MAX).min(16);
        let delay = self.base.saturating_mul(1 << exponent);
        delay + delay.mul_f64(rand::random::<f64>() * 0.5)
    }
}

impl Iterator for JitteredBackoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        if self.attempt >= self.max_times {
            return None;
        }
        let delay = self.delay_for(self.attempt);
        self.attempt += 1;
        Some(delay)
    }
}
