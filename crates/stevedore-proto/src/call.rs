//! Calls the executor POSTs to the agent.

use serde::{Deserialize, Serialize};

use crate::status::StatusUpdate;
use crate::task::{ExecutorId, FrameworkId};

/// An executor-originated call.
///
/// SUBSCRIBE opens the long-lived event stream and replays every update the
/// agent has not yet acknowledged, so a restarted agent can dedupe by UUID.
/// UPDATE delivers a single status report out of band.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Call {
    Subscribe {
        executor_id: ExecutorId,
        framework_id: FrameworkId,
        #[serde(default)]
        unacknowledged_updates: Vec<StatusUpdate>,
    },
    Update {
        status: StatusUpdate,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::{OptionalInfo, TaskState};
    use crate::task::TaskId;

    #[test]
    fn subscribe_carries_unacknowledged_replays() {
        let update = StatusUpdate::new(
            TaskId::from("task-1"),
            ExecutorId::from("executor-1"),
            TaskState::Running,
            OptionalInfo::default(),
        );
        let call = Call::Subscribe {
            executor_id: ExecutorId::from("executor-1"),
            framework_id: FrameworkId::from("framework-1"),
            unacknowledged_updates: vec![update.clone()],
        };

        let encoded = serde_json::to_string(&call).unwrap();
        assert!(encoded.contains("\"type\":\"SUBSCRIBE\""));
        assert!(encoded.contains(&update.uuid.to_string()));

        let decoded: Call = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, call);
    }
}
