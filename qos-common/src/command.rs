//! Utilities for [`tokio::process::Command`].
//!
//! Commands can be run on the host or inside a named network namespace, in which case the
//! command line is prefixed with `ip netns exec <namespace>`.

use std::{io, process::Stdio, time::Duration};

/// Failure to run an external program.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The program name was empty.
    #[error("empty command provided")]
    Empty,
    /// Spawning or waiting on the process failed.
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    /// The program ran and exited unsuccessfully. Carries its captured output.
    #[error("non-zero exit status ({}): {}", .0.status, .0.stderr.trim())]
    NonZero(Output),
    /// The program was killed after exceeding the runner's deadline.
    #[error("command timed out after {0:?}")]
    Timeout(Duration),
}

/// The captured result of a finished process, with output decoded lossily as UTF-8.
#[derive(Debug, Clone)]
pub struct Output {
    pub status: std::process::ExitStatus,
    pub stdout: String,
    pub stderr: String,
}

impl From<std::process::Output> for Output {
    fn from(value: std::process::Output) -> Self {
        Self {
            status: value.status,
            stdout: String::from_utf8_lossy(&value.stdout).to_string(),
            stderr: String::from_utf8_lossy(&value.stderr).to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Runs external programs, optionally in a network namespace and with a deadline.
#[derive(Debug, Clone, Default)]
pub struct Runner {
    namespace: Option<String>,
    timeout: Option<Duration>,
}

impl Runner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run every command inside the given network namespace.
    pub fn in_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    /// Kill the command and return [`Error::Timeout`] if it runs longer than `timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// The network namespace commands run in, if any.
    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    /// The full argument vector that will be spawned for `program args..`.
    pub fn command_line<S: AsRef<str>>(&self, program: &str, args: &[S]) -> Vec<String> {
        let mut line = Vec::with_capacity(args.len() + 5);
        if let Some(namespace) = &self.namespace {
            line.extend(["ip", "netns", "exec", namespace.as_str()].map(String::from));
        }
        line.push(program.to_string());
        line.extend(args.iter().map(|a| a.as_ref().to_string()));
        line
    }

    /// Runs the command provided as a string, separating args with whitespaces.
    pub async fn by_str(&self, cmd: &str) -> Result<Output> {
        let mut iter = cmd.split_ascii_whitespace();
        let program = iter.next().ok_or(Error::Empty)?;
        let args: Vec<&str> = iter.collect();
        self.run(program, &args).await
    }

    /// Runs `program` with `args`, capturing its output. A non-zero exit status is an error.
    pub async fn run<S: AsRef<str>>(&self, program: &str, args: &[S]) -> Result<Output> {
        if program.is_empty() {
            return Err(Error::Empty);
        }

        let line = self.command_line(program, args);
        let mut cmd = tokio::process::Command::new(&line[0]);
        cmd.args(&line[1..])
            .stdin(Stdio::null())
            .stderr(Stdio::piped())
            .stdout(Stdio::piped())
            .kill_on_drop(true);

        tracing::debug!(?line, "running command");

        let output: Output = match self.timeout {
            Some(timeout) => tokio::time::timeout(timeout, cmd.output())
                .await
                .map_err(|_| Error::Timeout(timeout))??
                .into(),
            None => cmd.output().await?.into(),
        };

        if !output.status.success() {
            tracing::debug!(?output.stderr, ?output.status, ?line, "command returned non-zero status");
            return Err(Error::NonZero(output));
        }

        Ok(output)
    }
}
