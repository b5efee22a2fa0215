//! Child command control.
//!
//! Launches the task's command in its own process group, reports its exit,
//! and performs the staged tree termination on stop. One executor runs one
//! command; the handle is owned by the orchestrator.

use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use nix::sys::signal::Signal;
use nix::unistd::Pid;
use stevedore_proto::{CommandSpec, EnvironmentVariable};
use tokio::process::{ChildStderr, ChildStdout};
use tokio::sync::oneshot;
use tracing::{error, info, warn};

use crate::config::ENVIRONMENT_PREFIX;
use crate::error::{Error, Result};
use crate::hook::HookEnv;
use crate::kill;

/// Why the child is no longer running.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskExitState {
    /// Exited with a zero code.
    Success,
    /// Exited with a non-zero code or failed to run.
    Failed(String),
    /// Terminated by [`Command::stop`]; the exit code is ignored.
    Killed,
}

/// The child's output pipes, handed to a scraping sink.
pub struct ChildOutput {
    pub stdout: ChildStdout,
    pub stderr: ChildStderr,
}

/// Consumer of a scraped child's output.
#[async_trait]
pub trait OutputSink: Send + Sync {
    /// Consumes both pipes until EOF.
    async fn consume(self: Box<Self>, output: ChildOutput);
}

/// Where the child's stdout/stderr go.
pub enum OutputRouting {
    /// Inherit the executor's own stdout/stderr.
    Forward,
    /// Pipe the output into a log-scraping sink.
    Scrape(Box<dyn OutputSink>),
}

/// A command running on the system.
#[async_trait]
pub trait Command: Send + Sync {
    /// Starts the child process.
    fn start(&mut self) -> Result<()>;

    /// Takes the exit-state receiver. Returns `None` if already taken or the
    /// command was never started.
    fn exit_state(&mut self) -> Option<oneshot::Receiver<TaskExitState>>;

    /// Performs staged termination of the whole process tree: TERM the tree,
    /// wait `grace`, KILL the tree. Idempotent; concurrent calls collapse to
    /// the first one.
    async fn stop(&self, grace: Duration);
}

/// The standard command implementation.
///
/// The command line is always run as `sh -c <value>`, matching the behavior
/// of previous executor generations even for `shell=false` specs (their
/// argument form is not honored; see the repository design notes).
pub struct ShellCommand {
    command_line: String,
    env: Vec<(String, String)>,
    routing: Option<OutputRouting>,
    kill_tree_excludes: Vec<String>,
    pid: Option<Pid>,
    exit_rx: Option<oneshot::Receiver<TaskExitState>>,
    killing: Arc<AtomicBool>,
}

impl ShellCommand {
    /// Builds a command from its spec and a fully composed environment.
    pub fn new(
        spec: &CommandSpec,
        env: Vec<(String, String)>,
        routing: OutputRouting,
        kill_tree_excludes: Vec<String>,
    ) -> Self {
        Self {
            command_line: spec.value.clone(),
            env,
            routing: Some(routing),
            kill_tree_excludes,
            pid: None,
            exit_rx: None,
            killing: Arc::new(AtomicBool::new(false)),
        }
    }
}

#[async_trait]
impl Command for ShellCommand {
    fn start(&mut self) -> Result<()> {
        if self.pid.is_some() {
            return Err(Error::Launch("command already started".into()));
        }
        let routing = self
            .routing
            .take()
            .ok_or_else(|| Error::Launch("missing output routing".into()))?;

        let mut command = tokio::process::Command::new("sh");
        command.arg("-c").arg(&self.command_line);
        command.env_clear();
        command.envs(self.env.iter().cloned());
        command.process_group(0);
        if matches!(routing, OutputRouting::Scrape(_)) {
            command.stdout(Stdio::piped());
            command.stderr(Stdio::piped());
        }

        let mut child = command.spawn()?;
        let pid = child
            .id()
            .ok_or_else(|| Error::Launch("child exited before it was tracked".into()))?;
        self.pid = Some(Pid::from_raw(pid as i32));
        info!(pid, command = %self.command_line, "Started task command");

        if let OutputRouting::Scrape(sink) = routing {
            let output = ChildOutput {
                stdout: child
                    .stdout
                    .take()
                    .ok_or_else(|| Error::Launch("child stdout not piped".into()))?,
                stderr: child
                    .stderr
                    .take()
                    .ok_or_else(|| Error::Launch("child stderr not piped".into()))?,
            };
            tokio::spawn(sink.consume(output));
        }

        let (exit_tx, exit_rx) = oneshot::channel();
        self.exit_rx = Some(exit_rx);
        let killing = Arc::clone(&self.killing);
        tokio::spawn(async move {
            let status = child.wait().await;
            let state = match status {
                Ok(status) if status.success() => TaskExitState::Success,
                _ if killing.load(Ordering::SeqCst) => TaskExitState::Killed,
                Ok(status) => TaskExitState::Failed(status.to_string()),
                Err(err) => TaskExitState::Failed(err.to_string()),
            };
            info!(state = ?state, "Command exited");
            let _ = exit_tx.send(state);
        });

        Ok(())
    }

    fn exit_state(&mut self) -> Option<oneshot::Receiver<TaskExitState>> {
        self.exit_rx.take()
    }

    async fn stop(&self, grace: Duration) {
        // A second (or concurrent) stop is a no-op.
        if self.killing.swap(true, Ordering::SeqCst) {
            return;
        }
        let Some(pid) = self.pid else {
            return;
        };

        if let Err(err) =
            kill::kill_tree_with_excludes(Signal::SIGTERM, pid, &self.kill_tree_excludes)
        {
            error!(error = %err, pid = %pid, "Problem sending SIGTERM to process tree");
            return;
        }

        tokio::time::sleep(grace).await;

        if let Err(err) =
            kill::kill_tree_with_excludes(Signal::SIGKILL, pid, &self.kill_tree_excludes)
        {
            warn!(error = %err, pid = %pid, "Problem sending SIGKILL to process tree");
        }
    }
}

/// Drops every variable whose name starts with the executor's configuration
/// prefix (any case), so executor-level configuration never leaks into the
/// task.
pub fn filtered_environment(
    vars: impl Iterator<Item = (String, String)>,
) -> Vec<(String, String)> {
    vars.filter(|(name, _)| {
        !name
            .to_ascii_uppercase()
            .starts_with(&ENVIRONMENT_PREFIX.to_ascii_uppercase())
    })
    .collect()
}

/// Composes the child environment: filtered process environment, then the
/// task's own variables, then hook additions. Later entries win on duplicate
/// names.
pub fn build_child_environment(
    process_vars: impl Iterator<Item = (String, String)>,
    task_env: &[EnvironmentVariable],
    hook_env: &HookEnv,
) -> Vec<(String, String)> {
    let mut env = filtered_environment(process_vars);
    env.extend(
        task_env
            .iter()
            .map(|variable| (variable.name.clone(), variable.value.clone())),
    );
    env.extend(hook_env.iter().cloned());
    env
}
