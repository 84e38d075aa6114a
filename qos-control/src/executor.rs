use std::time::Duration;

use qos_common::command::{self, Output, Runner};
use qos_tc::TcCommand;

use crate::node::NetworkNode;

/// Why a node could not execute a command.
#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    /// The interface does not exist on the node.
    #[error("device {0} does not exist")]
    NoSuchDevice(String),
    /// A clear found no shaping to remove.
    #[error("no shaping installed on {0}")]
    NothingToClear(String),
    /// The node refused the command, e.g. because the object already exists.
    #[error("command rejected: {0}")]
    Rejected(String),
    /// The command could not be run, or failed for an unrecognised reason.
    #[error(transparent)]
    Command(#[from] command::Error),
}

/// Executes traffic-control commands against a node's interfaces.
#[async_trait::async_trait]
pub trait NodeExecutor: Send + Sync {
    /// Runs `command` on `node`. Returns once the node has accepted or rejected it.
    async fn execute(&self, node: &NetworkNode, command: &TcCommand) -> Result<(), ExecError>;
}

#[async_trait::async_trait]
impl<T: NodeExecutor + ?Sized> NodeExecutor for std::sync::Arc<T> {
    async fn execute(&self, node: &NetworkNode, command: &TcCommand) -> Result<(), ExecError> {
        (**self).execute(node, command).await
    }
}

/// Runs commands through the host's `tc` binary, inside the node's namespace if it has one.
#[derive(Debug, Clone)]
pub struct ShellExecutor {
    timeout: Duration,
}

impl Default for ShellExecutor {
    fn default() -> Self {
        Self { timeout: Duration::from_secs(5) }
    }
}

impl ShellExecutor {
    /// An executor that kills any `tc` invocation running longer than `timeout`.
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    fn runner(&self, node: &NetworkNode) -> Runner {
        let runner = Runner::new().with_timeout(self.timeout);
        match &node.namespace {
            Some(namespace) => runner.in_namespace(namespace),
            None => runner,
        }
    }
}

#[async_trait::async_trait]
impl NodeExecutor for ShellExecutor {
    async fn execute(&self, node: &NetworkNode, command: &TcCommand) -> Result<(), ExecError> {
        match self.runner(node).run("tc", &command.args()).await {
            Ok(_) => Ok(()),
            Err(command::Error::NonZero(output)) => Err(classify_failure(command, output)),
            Err(e) => Err(e.into()),
        }
    }
}

/// Maps a failed `tc` invocation to an [`ExecError`] based on its diagnostics.
fn classify_failure(command: &TcCommand, output: Output) -> ExecError {
    let stderr = output.stderr.as_str();

    // `ip netns exec` failed before `tc` ran. Its ENOENT must not read as an empty root.
    if stderr.contains("Cannot open network namespace") {
        return ExecError::Command(command::Error::NonZero(output));
    }

    if stderr.contains("Cannot find device") {
        return ExecError::NoSuchDevice(command.dev().to_string());
    }

    // Deleting the root of an unshaped interface. Older kernels report the handle, newer ones
    // report ENOENT through netlink.
    if command.is_clear()
        && (stderr.contains("handle of zero")
            || stderr
                .lines()
                .any(|line| line.starts_with("RTNETLINK answers: No such file or directory")))
    {
        return ExecError::NothingToClear(command.dev().to_string());
    }

    ExecError::Command(command::Error::NonZero(output))
}

#[cfg(test)]
mod tests {
    use std::os::unix::process::ExitStatusExt;

    use super::*;

    fn failed(stderr: &str) -> Output {
        Output {
            status: std::process::ExitStatus::from_raw(2 << 8),
            stdout: String::new(),
            stderr: stderr.to_string(),
        }
    }

    #[test]
    fn classifies_missing_device() {
        let err = classify_failure(&TcCommand::clear("eth9"), failed("Cannot find device \"eth9\"\n"));
        assert!(matches!(err, ExecError::NoSuchDevice(dev) if dev == "eth9"));
    }

    #[test]
    fn classifies_nothing_to_clear() {
        let old = failed("Error: Cannot delete qdisc with handle of zero.\n");
        assert!(matches!(
            classify_failure(&TcCommand::clear("eth0"), old),
            ExecError::NothingToClear(_)
        ));

        let new = failed("RTNETLINK answers: No such file or directory\n");
        assert!(matches!(
            classify_failure(&TcCommand::clear("eth0"), new),
            ExecError::NothingToClear(_)
        ));
    }

    #[test]
    fn missing_namespace_is_a_failure() {
        let err = classify_failure(
            &TcCommand::clear("r_trans9-eth0"),
            failed("Cannot open network namespace \"r_trans9\": No such file or directory\n"),
        );
        assert!(matches!(
            err,
            ExecError::Command(command::Error::NonZero(out)) if out.stderr.contains("r_trans9")
        ));

        // ENOENT from anything other than netlink is not an empty root either.
        let err = classify_failure(
            &TcCommand::clear("eth0"),
            failed("exec of \"tc\" failed: No such file or directory\n"),
        );
        assert!(!matches!(err, ExecError::NothingToClear(_)));
    }

    #[test]
    fn other_failures_keep_output() {
        let root = TcCommand::AddHtbRoot {
            dev: "eth0".to_string(),
            handle: qos_tc::TcHandle::root(),
            default_class: qos_tc::TcHandle::priority_class(3),
        };
        let err = classify_failure(&root, failed("RTNETLINK answers: File exists\n"));
        assert!(matches!(
            err,
            ExecError::Command(command::Error::NonZero(out)) if out.stderr.contains("File exists")
        ));
    }

    #[test]
    fn runs_in_node_namespace() {
        let node = NetworkNode::new("r1").in_namespace("r1");
        let line = ShellExecutor::default().runner(&node).command_line("tc", &["qdisc", "show"]);
        assert_eq!(line[..5], ["ip", "netns", "exec", "r1", "tc"]);
    }
}
