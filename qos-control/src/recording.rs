//! An executor that simulates traffic-control state instead of touching the host.
//!
//! Every command is appended to a trace and applied to a per-interface model of what the kernel
//! would hold, with the kernel's rejections: clearing an unshaped interface reports
//! [`ExecError::NothingToClear`], installing a second root or a duplicate class is rejected, and
//! unknown devices fail with [`ExecError::NoSuchDevice`].

use std::collections::{HashMap, HashSet};

use parking_lot::Mutex;
use qos_tc::TcCommand;

use crate::{
    executor::{ExecError, NodeExecutor},
    node::NetworkNode,
};

type InterfaceKey = (String, String);

#[derive(Debug, Default)]
struct State {
    trace: Vec<(String, TcCommand)>,
    installed: HashMap<InterfaceKey, Vec<TcCommand>>,
    missing: HashSet<InterfaceKey>,
    failing: HashSet<InterfaceKey>,
}

/// A [`NodeExecutor`] that applies commands to an in-memory model instead of the kernel.
///
/// Backs tests and `--dry-run`. Faults are injected per interface with
/// [`with_missing_device`](Self::with_missing_device) and
/// [`with_failing_installs`](Self::with_failing_installs).
#[derive(Debug, Default)]
pub struct RecordingExecutor {
    state: Mutex<State>,
}

fn key(node: &str, dev: &str) -> InterfaceKey {
    (node.to_string(), dev.to_string())
}

impl RecordingExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes `dev` on `node` behave as if it didn't exist.
    pub fn with_missing_device(self, node: &str, dev: &str) -> Self {
        self.state.lock().missing.insert(key(node, dev));
        self
    }

    /// Rejects every command on `dev` except clears.
    pub fn with_failing_installs(self, node: &str, dev: &str) -> Self {
        self.state.lock().failing.insert(key(node, dev));
        self
    }

    /// Every command executed so far, with the node it ran on.
    pub fn trace(&self) -> Vec<(String, TcCommand)> {
        self.state.lock().trace.clone()
    }

    /// Drains the trace, leaving the modelled configuration untouched.
    pub fn take_trace(&self) -> Vec<(String, TcCommand)> {
        std::mem::take(&mut self.state.lock().trace)
    }

    /// The commands currently in effect on `dev`. Empty means the kernel default.
    pub fn configuration(&self, node: &str, dev: &str) -> Vec<TcCommand> {
        self.state.lock().installed.get(&key(node, dev)).cloned().unwrap_or_default()
    }

    /// Whether no interface holds any shaping.
    pub fn is_pristine(&self) -> bool {
        self.state.lock().installed.values().all(Vec::is_empty)
    }
}

#[async_trait::async_trait]
impl NodeExecutor for RecordingExecutor {
    async fn execute(&self, node: &NetworkNode, command: &TcCommand) -> Result<(), ExecError> {
        tracing::info!(node = %node.name, %command, "recorded command");

        let mut state = self.state.lock();
        state.trace.push((node.name.clone(), command.clone()));

        let key = key(&node.name, command.dev());
        if state.missing.contains(&key) {
            return Err(ExecError::NoSuchDevice(command.dev().to_string()));
        }
        if !command.is_clear() && state.failing.contains(&key) {
            return Err(ExecError::Rejected(format!("injected failure: {command}")));
        }

        let installed = state.installed.entry(key).or_default();
        match command {
            TcCommand::ClearRoot { dev } => {
                if installed.is_empty() {
                    return Err(ExecError::NothingToClear(dev.clone()));
                }
                installed.clear();
            }
            TcCommand::AddHtbRoot { .. } => {
                if installed.iter().any(|c| matches!(c, TcCommand::AddHtbRoot { .. })) {
                    return Err(ExecError::Rejected(format!("root already exists: {command}")));
                }
                installed.push(command.clone());
            }
            _ => {
                if installed.is_empty() {
                    return Err(ExecError::Rejected(format!("no root qdisc: {command}")));
                }
                if installed.contains(command) {
                    return Err(ExecError::Rejected(format!("already exists: {command}")));
                }
                installed.push(command.clone());
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use qos_common::Rate;
    use qos_tc::{Direction, RuleCompiler};

    use super::*;

    #[tokio::test]
    async fn models_kernel_rejections() {
        let exec = RecordingExecutor::new().with_missing_device("r1", "eth9");
        let node = NetworkNode::new("r1");
        let plan = RuleCompiler::default().compile("eth0", Rate::mbit(100), Direction::Forward).unwrap();

        assert!(matches!(
            exec.execute(&node, &plan[0]).await,
            Err(ExecError::NothingToClear(_))
        ));
        assert!(matches!(exec.execute(&node, &plan[2]).await, Err(ExecError::Rejected(_))));

        for command in &plan[1..] {
            exec.execute(&node, command).await.unwrap();
        }
        assert_eq!(exec.configuration("r1", "eth0"), plan[1..]);
        assert!(matches!(exec.execute(&node, &plan[1]).await, Err(ExecError::Rejected(_))));

        exec.execute(&node, &plan[0]).await.unwrap();
        assert!(exec.is_pristine());

        assert!(matches!(
            exec.execute(&node, &TcCommand::clear("eth9")).await,
            Err(ExecError::NoSuchDevice(_))
        ));
        assert_eq!(exec.trace().len(), plan.len() + 4);
    }

    #[tokio::test]
    async fn injected_install_failures_spare_clears() {
        let exec = RecordingExecutor::new()
            .with_missing_device("r1", "eth9")
            .with_failing_installs("r1", "eth0");
        let node = NetworkNode::new("r1");
        let plan = RuleCompiler::default().compile("eth0", Rate::mbit(100), Direction::Forward).unwrap();

        assert!(matches!(exec.execute(&node, &plan[1]).await, Err(ExecError::Rejected(_))));
        assert!(matches!(
            exec.execute(&node, &plan[0]).await,
            Err(ExecError::NothingToClear(_))
        ));
        assert!(matches!(
            exec.execute(&node, &TcCommand::clear("eth9")).await,
            Err(ExecError::NoSuchDevice(_))
        ));
        assert!(exec.is_pristine());
    }
}
