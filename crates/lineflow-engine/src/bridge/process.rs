//! Child process ownership: spawning, the stderr/exit supervisor and teardown.

use std::collections::BTreeMap;
use std::io;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::config::TransformConfig;

/// Log target for subprocess diagnostics.
pub const SUBPROCESS_TARGET: &str = "lineflow::subprocess";

/// How to launch the transform program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessSpec {
    pub argv: Vec<String>,
    pub directory: Option<PathBuf>,
    pub env: BTreeMap<String, String>,
}

impl ProcessSpec {
    #[must_use]
    pub fn command_line(&self) -> String {
        self.argv.join(" ")
    }
}

impl From<&TransformConfig> for ProcessSpec {
    fn from(config: &TransformConfig) -> Self {
        Self {
            argv: config.argv.clone(),
            directory: config.directory.clone(),
            env: config.env.clone(),
        }
    }
}

/// A live child process and its pipes.
///
/// The supervisor task owns the child and its stderr; dropping the kill
/// sender (or sending on it) makes the supervisor kill the child.
pub(crate) struct SubprocessHandle {
    pub(crate) pid: Option<u32>,
    pub(crate) stdin: Option<ChildStdin>,
    pub(crate) stdout: Option<BufReader<ChildStdout>>,
    kill: Option<oneshot::Sender<()>>,
    supervisor: JoinHandle<()>,
}

impl SubprocessHandle {
    /// Spawn the program described by `spec` with all three streams piped.
    pub(crate) fn spawn(spec: &ProcessSpec) -> io::Result<Self> {
        let (program, args) = spec
            .argv
            .split_first()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "empty command"))?;

        let mut cmd = Command::new(program);
        cmd.args(args)
            .envs(&spec.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &spec.directory {
            cmd.current_dir(dir);
        }

        let mut child = cmd.spawn()?;
        let pid = child.id();
        let missing = |name: &str| io::Error::other(format!("{name} not piped"));
        let stdin = child.stdin.take().ok_or_else(|| missing("stdin"))?;
        let stdout = child.stdout.take().ok_or_else(|| missing("stdout"))?;
        let stderr = child.stderr.take().ok_or_else(|| missing("stderr"))?;

        let (kill_tx, kill_rx) = oneshot::channel();
        let supervisor = tokio::spawn(supervise(child, stderr, kill_rx, spec.command_line()));

        tracing::debug!(pid, command = %spec.command_line(), "Subprocess started");
        Ok(Self {
            pid,
            stdin: Some(stdin),
            stdout: Some(BufReader::new(stdout)),
            kill: Some(kill_tx),
            supervisor,
        })
    }

    /// Close the pipes, kill the child and wait for the supervisor.
    ///
    /// The supervisor is aborted if it has not finished within `grace`.
    pub(crate) async fn shutdown(mut self, grace: Duration) {
        drop(self.stdin.take());
        drop(self.stdout.take());
        if let Some(kill) = self.kill.take() {
            let _ = kill.send(());
        }
        if tokio::time::timeout(grace, &mut self.supervisor).await.is_err() {
            tracing::warn!(pid = self.pid, "Subprocess supervisor did not finish, aborting");
            self.supervisor.abort();
        }
    }
}

/// Log stderr line by line until it closes or a kill is requested, then reap
/// the child and log how it ended.
async fn supervise(
    mut child: Child,
    stderr: ChildStderr,
    mut kill_rx: oneshot::Receiver<()>,
    command: String,
) {
    let pid = child.id();
    let mut lines = BufReader::new(stderr).lines();
    let mut killed = false;

    loop {
        tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) => tracing::debug!(target: SUBPROCESS_TARGET, pid, "{line}"),
                Ok(None) => break,
                Err(e) => {
                    tracing::debug!(target: SUBPROCESS_TARGET, pid, error = %e, "Stopped reading stderr");
                    break;
                }
            },
            _ = &mut kill_rx => {
                killed = true;
                let _ = child.start_kill();
                break;
            }
        }
    }
    drop(lines);

    let status = if killed {
        child.wait().await
    } else {
        let exited = tokio::select! {
            status = child.wait() => Some(status),
            _ = &mut kill_rx => None,
        };
        match exited {
            Some(status) => status,
            None => {
                killed = true;
                let _ = child.start_kill();
                child.wait().await
            }
        }
    };

    match status {
        Ok(status) if killed => {
            tracing::debug!(target: SUBPROCESS_TARGET, pid, %status, %command, "Subprocess stopped");
        }
        Ok(status) => {
            let code = status
                .code()
                .map_or_else(|| status.to_string(), |c| c.to_string());
            tracing::warn!(
                target: SUBPROCESS_TARGET,
                pid,
                %command,
                "Subprocess terminated unexpectedly with status {code}"
            );
        }
        Err(e) => {
            tracing::error!(target: SUBPROCESS_TARGET, pid, %command, error = %e, "Failed to wait for subprocess");
        }
    }
}
