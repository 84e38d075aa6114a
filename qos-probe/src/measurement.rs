use std::time::Duration;

use tokio::time::Instant;

/// One latency sample. Invalid when the probe timed out or failed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LatencyMeasurement {
    /// When the ping was sent.
    pub timestamp: Instant,
    /// Round-trip time in milliseconds. Meaningless unless `valid`.
    pub value_ms: f64,
    pub valid: bool,
}

impl LatencyMeasurement {
    pub fn ok(timestamp: Instant, rtt: Duration) -> Self {
        Self::from_millis(timestamp, rtt.as_secs_f64() * 1_000.0)
    }

    pub fn from_millis(timestamp: Instant, value_ms: f64) -> Self {
        Self { timestamp, value_ms, valid: true }
    }

    /// A sample whose ping timed out or failed.
    pub fn failed(timestamp: Instant) -> Self {
        Self { timestamp, value_ms: 0.0, valid: false }
    }

    /// The latency, if the sample is valid.
    pub fn latency_ms(&self) -> Option<f64> {
        self.valid.then_some(self.value_ms)
    }
}
