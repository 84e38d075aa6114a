//! # qos
//!
//! Latency-triggered traffic shaping for a delay-sensitive flow crossing a multi-hop network.
//!
//! Two loops cooperate through a single shared signal:
//!
//! ```text
//!  ┌──────────────┐  assert / clear  ┌──────────────┐  poll   ┌───────────────┐  tc   ┌───────┐
//!  │ LatencyProbe │ ───────────────► │ AlertChannel │ ◄────── │ QosController │ ────► │ nodes │
//!  └──────────────┘                  └──────────────┘         └───────────────┘       └───────┘
//! ```
//!
//! The probe raises the alert on the first sample above the latency threshold and clears it
//! after a full cooldown of quiet samples. The controller installs an HTB+SFQ three-class plan
//! on every managed interface when the alert goes up, and strips shaping from every interface
//! when it goes down.
//!
//! This crate re-exports the building blocks and hosts the `qosd` daemon and its
//! [`Config`](config::Config).

pub mod config;

pub use qos_alert as alert;
pub use qos_common as common;
pub use qos_control as control;
pub use qos_probe as probe;
pub use qos_tc as tc;

pub use config::{Config, ConfigError};
pub use qos_alert::{AlertChannel, MarkerFile, MemoryChannel};
pub use qos_control::{NodeExecutor, QosController, RecordingExecutor, ShellExecutor};
pub use qos_probe::{LatencyProbe, PingCommand, Pinger};
pub use qos_tc::{Direction, RuleCompiler, TcCommand};
