//! # QoS Controller
//!
//! Polls an [`AlertChannel`](qos_alert::AlertChannel) and reacts to its transitions:
//!
//! - `false -> true`: compile and install the three-class plan on every managed interface of
//!   every node ([`QosController::apply`]), then check that the monitored destination is still
//!   reachable. The check is advisory; a failure is logged and nothing is rolled back.
//! - `true -> false`: clear shaping on every interface of every node, managed or not
//!   ([`QosController::remove`]).
//!
//! Sweeps are sequential and not transactional. A failing interface is logged and skipped, and
//! the sweep moves on. A process killed halfway through a sweep leaves the nodes in a mixed
//! state; nothing recovers it on restart.
//!
//! Commands reach the nodes through a [`NodeExecutor`]. [`ShellExecutor`] runs the host's `tc`
//! binary, optionally inside the node's network namespace. [`RecordingExecutor`] simulates the
//! resulting traffic-control state without touching the host.

mod controller;
mod executor;
mod node;
mod recording;

pub use controller::{ControllerOptions, QosController, SkippedInterface, Sweep, SweepReport};
pub use executor::{ExecError, NodeExecutor, ShellExecutor};
pub use node::{Interface, InterfaceRole, NetworkNode, NodeId, NodeRegistry, DEFAULT_CAPACITY};
pub use recording::RecordingExecutor;

/// Errors building a [`NodeRegistry`] or a [`QosController`].
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The registry would be empty.
    #[error("no nodes to manage")]
    NoNodes,
    #[error("node {0} is defined more than once")]
    DuplicateNode(String),
    #[error("interface {dev} is defined more than once on node {node}")]
    DuplicateInterface { node: String, dev: String },
    /// The interface can't be addressed by `tc`, or its link can't carry the plan.
    #[error("interface {dev} on node {node}: {source}")]
    Interface {
        node: String,
        dev: String,
        #[source]
        source: qos_tc::Error,
    },
}

pub type Result<T> = std::result::Result<T, Error>;
