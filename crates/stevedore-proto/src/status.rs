//! Task states and status updates.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::task::{ExecutorId, TaskId};

/// Task state as reported to the agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskState {
    Starting,
    Running,
    Killing,
    Killed,
    Failed,
    Finished,
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            TaskState::Starting => "STARTING",
            TaskState::Running => "RUNNING",
            TaskState::Killing => "KILLING",
            TaskState::Killed => "KILLED",
            TaskState::Failed => "FAILED",
            TaskState::Finished => "FINISHED",
        };
        f.write_str(name)
    }
}

impl TaskState {
    /// Terminal states end the task lifecycle; the executor emits exactly one.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskState::Killed | TaskState::Failed | TaskState::Finished
        )
    }
}

/// Optional fields attached to a status update.
#[derive(Debug, Clone, Default)]
pub struct OptionalInfo {
    /// Human readable message, e.g. a failure reason.
    pub message: Option<String>,
    /// Health verdict; `None` when unknown.
    pub healthy: Option<bool>,
}

/// One status report, identified by a fresh UUID.
///
/// The UUID is the acknowledgement key: the agent echoes it back in an
/// ACKNOWLEDGED event and the update is retried until that happens.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusUpdate {
    pub task_id: TaskId,
    pub executor_id: ExecutorId,
    pub state: TaskState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub healthy: Option<bool>,
    pub uuid: Uuid,
    /// Wall-clock seconds since the unix epoch.
    pub timestamp: f64,
}

impl StatusUpdate {
    /// Builds an update with a fresh random UUID and the current wall clock.
    pub fn new(
        task_id: TaskId,
        executor_id: ExecutorId,
        state: TaskState,
        info: OptionalInfo,
    ) -> Self {
        Self {
            task_id,
            executor_id,
            state,
            message: info.message,
            healthy: info.healthy,
            uuid: Uuid::new_v4(),
            timestamp: Utc::now().timestamp_micros() as f64 / 1_000_000.0,
        }
    }
}
