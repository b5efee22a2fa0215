//! Events the agent streams to a subscribed executor.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::task::{FrameworkInfo, TaskDescriptor, TaskId};

/// One decoded record from the subscribe stream.
///
/// Kinds the executor does not recognize decode to [`AgentEvent::Unknown`]
/// so a newer agent never breaks the stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AgentEvent {
    Subscribed {
        framework: FrameworkInfo,
    },
    Launch {
        task: Box<TaskDescriptor>,
    },
    Kill {
        task_id: TaskId,
    },
    Acknowledged {
        uuid: Uuid,
    },
    Shutdown,
    Error {
        #[serde(default)]
        message: String,
    },
    #[serde(other)]
    Unknown,
}
