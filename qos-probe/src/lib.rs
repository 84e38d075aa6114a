//! # Latency Probe
//!
//! Measures round-trip latency to one destination at a fixed cadence and raises or clears an
//! [`AlertChannel`](qos_alert::AlertChannel) with hysteresis: the alert goes up on the first
//! sample above the threshold and only comes down after a full cooldown of quiet samples.
//!
//! The probe never touches shaping rules. It only writes the alert; whoever watches the
//! channel decides what to do about it.

mod hysteresis;
mod measurement;
mod pinger;
mod probe;
mod sample_log;

pub use hysteresis::{AlertState, Hysteresis, MarkerAction};
pub use measurement::LatencyMeasurement;
pub use pinger::{parse_rtt, PingCommand, Pinger};
pub use probe::{LatencyProbe, ProbeOptions};
pub use sample_log::SampleLog;

use qos_common::command;

/// Why a single latency sample could not be taken.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// `ping` could not be run, timed out, or exited with an error.
    #[error("ping command failed: {0}")]
    Command(#[from] command::Error),
    /// `ping` finished but reported no round-trip time.
    #[error("no echo reply")]
    NoReply,
}

pub type Result<T> = std::result::Result<T, Error>;
