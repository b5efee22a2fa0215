//! Hook that runs external commands on lifecycle events.

use std::collections::HashMap;

use async_trait::async_trait;
use stevedore_core::hook::{Hook, HookEnv, HookEvent, HookEventKind};
use tracing::{debug, info};

/// Runs one configured shell command per hook event type. Events without a
/// configured command are ignored. The commands inherit the executor's
/// stdout/stderr.
#[derive(Default)]
pub struct ExecHook {
    commands: HashMap<HookEventKind, String>,
}

impl ExecHook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the command to run on `event`. One command per event type.
    pub fn on(mut self, event: HookEventKind, command_line: impl Into<String>) -> Self {
        self.commands.insert(event, command_line.into());
        self
    }

    /// Builds the hook from `STEVEDORE_EXEC_HOOK_*` environment variables.
    /// Returns `None` when no command is configured.
    pub fn from_env() -> Option<Self> {
        let mut hook = Self::new();
        let bindings = [
            ("STEVEDORE_EXEC_HOOK_BEFORE_TASK_START", HookEventKind::BeforeTaskStart),
            ("STEVEDORE_EXEC_HOOK_AFTER_TASK_HEALTHY", HookEventKind::AfterTaskHealthy),
            ("STEVEDORE_EXEC_HOOK_BEFORE_TERMINATE", HookEventKind::BeforeTerminate),
        ];
        for (name, event) in bindings {
            if let Ok(command_line) = std::env::var(name) {
                if !command_line.is_empty() {
                    hook = hook.on(event, command_line);
                }
            }
        }
        (!hook.commands.is_empty()).then_some(hook)
    }
}

#[async_trait]
impl Hook for ExecHook {
    fn name(&self) -> &'static str {
        "exec"
    }

    async fn handle_event(&self, event: &HookEvent<'_>) -> anyhow::Result<HookEnv> {
        let Some(command_line) = self.commands.get(&event.kind) else {
            debug!(event = %event.kind, "No command configured for event, ignoring");
            return Ok(HookEnv::new());
        };

        info!(command = %command_line, event = %event.kind, "Running hook command");
        let status = tokio::process::Command::new("sh")
            .arg("-c")
            .arg(command_line)
            .env("TASK_ID", event.task.task_id.as_str())
            .status()
            .await?;
        if !status.success() {
            anyhow::bail!("hook command failed: {status}");
        }
        Ok(HookEnv::new())
    }
}

#[cfg(test)]
mod tests {
    use stevedore_proto::{CommandSpec, ExecutorId, FrameworkId, Labels, TaskDescriptor, TaskId};

    use super::*;

    fn task() -> TaskDescriptor {
        TaskDescriptor {
            task_id: TaskId::from("task-1"),
            executor_id: ExecutorId::from("executor-1"),
            framework_id: FrameworkId::from("framework-1"),
            command: CommandSpec {
                shell: true,
                value: "true".into(),
                arguments: vec![],
                environment: vec![],
            },
            ports: vec![],
            labels: Labels::default(),
            health_check: None,
            kill_policy: None,
        }
    }

    #[tokio::test]
    async fn runs_the_configured_command_with_task_context() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("marker");
        let hook = ExecHook::new().on(
            HookEventKind::BeforeTaskStart,
            format!("echo \"$TASK_ID\" > {}", marker.display()),
        );

        let task = task();
        let event = HookEvent {
            kind: HookEventKind::BeforeTaskStart,
            task: &task,
        };
        hook.handle_event(&event).await.unwrap();
        let written = std::fs::read_to_string(&marker).unwrap();
        assert_eq!(written.trim(), "task-1");
    }

    #[tokio::test]
    async fn unconfigured_events_are_ignored() {
        let hook = ExecHook::new().on(HookEventKind::BeforeTerminate, "exit 1");
        let task = task();
        let event = HookEvent {
            kind: HookEventKind::AfterTaskHealthy,
            task: &task,
        };
        assert!(hook.handle_event(&event).await.is_ok());
    }

    #[tokio::test]
    async fn failing_commands_surface_an_error() {
        let hook = ExecHook::new().on(HookEventKind::BeforeTaskStart, "exit 7");
        let task = task();
        let event = HookEvent {
            kind: HookEventKind::BeforeTaskStart,
            task: &task,
        };
        let err = hook.handle_event(&event).await.unwrap_err();
        assert!(err.to_string().contains("hook command failed"));
    }
}
