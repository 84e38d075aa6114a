//! The alert state machine.
//!
//! ```text
//!            latency > T                      latency <= T
//!   NORMAL ──────────────► ALERT ─────────────────────────► COOLDOWN(since)
//!     ▲      (assert)        ▲                                 │   │
//!     │                      └──────── latency > T ────────────┘   │
//!     │                                                            │
//!     └──────────── latency <= T and now - since >= C ─────────────┘
//!                              (clear)
//! ```
//!
//! A failed sample never raises an alert from NORMAL and never ends an ALERT. During COOLDOWN it
//! restarts the cooldown timer: a quiet period only counts if every sample in it succeeded.

use std::time::Duration;

use tokio::time::Instant;

use crate::LatencyMeasurement;

/// Where the probe stands with respect to the latency threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertState {
    /// Latency is under the threshold and no alert is raised.
    Normal,
    /// The last valid sample exceeded the threshold. The alert is raised.
    Alert,
    /// Latency is back under the threshold but the alert stays raised until it has been quiet
    /// for the whole cooldown, counted from `since`.
    Cooldown { since: Instant },
}

impl AlertState {
    /// Whether the alert marker is (or should be) present in this state.
    pub fn is_raised(&self) -> bool {
        !matches!(self, Self::Normal)
    }
}

/// The marker side effect of a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkerAction {
    /// Raise the alert.
    Assert,
    /// Clear the alert.
    Clear,
}

/// The alert state machine. Pure: time comes from the samples it is fed, never from a clock.
#[derive(Debug, Clone)]
pub struct Hysteresis {
    threshold_ms: f64,
    cooldown: Duration,
    state: AlertState,
}

impl Hysteresis {
    /// A machine in [`AlertState::Normal`].
    pub fn new(threshold_ms: f64, cooldown: Duration) -> Self {
        Self { threshold_ms, cooldown, state: AlertState::Normal }
    }

    pub fn state(&self) -> AlertState {
        self.state
    }

    pub fn threshold_ms(&self) -> f64 {
        self.threshold_ms
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    /// Feeds one sample through the machine, returning the marker action to perform, if any.
    pub fn observe(&mut self, sample: &LatencyMeasurement) -> Option<MarkerAction> {
        let now = sample.timestamp;
        let exceeded = sample.latency_ms().map(|ms| ms > self.threshold_ms);

        let (next, action) = match (self.state, exceeded) {
            (AlertState::Normal, Some(true)) => (AlertState::Alert, Some(MarkerAction::Assert)),
            (AlertState::Normal, _) => (AlertState::Normal, None),

            (AlertState::Alert, Some(false)) => (AlertState::Cooldown { since: now }, None),
            (AlertState::Alert, _) => (AlertState::Alert, None),

            (AlertState::Cooldown { .. }, Some(true)) => (AlertState::Alert, None),
            (AlertState::Cooldown { since }, Some(false)) => {
                if now.saturating_duration_since(since) >= self.cooldown {
                    (AlertState::Normal, Some(MarkerAction::Clear))
                } else {
                    (AlertState::Cooldown { since }, None)
                }
            }
            (AlertState::Cooldown { .. }, None) => (AlertState::Cooldown { since: now }, None),
        };

        match (self.state, next) {
            (AlertState::Alert, AlertState::Cooldown { .. }) => {
                tracing::info!(
                    cooldown = ?self.cooldown,
                    "latency back under threshold, cooling down"
                );
            }
            (AlertState::Cooldown { .. }, AlertState::Alert) => {
                tracing::info!(
                    threshold_ms = self.threshold_ms,
                    "latency above threshold, cooldown aborted"
                );
            }
            (from, to) if std::mem::discriminant(&from) != std::mem::discriminant(&to) => {
                tracing::info!(?from, ?to, "alert state transition");
            }
            _ => {}
        }

        self.state = next;
        action
    }
}
