//! Internal executor events.
//!
//! Every producer (agent link, health supervisor, child waiter, certificate
//! watchdog) feeds the same channel; the orchestrator is the only consumer.

use stevedore_proto::{FrameworkInfo, TaskDescriptor, TaskId};

/// Capacity of the internal event channel. Agents have been observed to emit
/// bursts of duplicated KILL/SHUTDOWN events after the orchestrator already
/// exited; the buffer absorbs them so producers never deadlock.
pub const EVENT_CHANNEL_CAPACITY: usize = 128;

/// An event driving the orchestrator's state machine.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutorEvent {
    /// The agent confirmed the subscription.
    Subscribed(FrameworkInfo),
    /// The agent asked the executor to start its task.
    Launch(Box<TaskDescriptor>),
    /// The agent asked for the task to be killed.
    Kill { task_id: TaskId },
    /// The agent asked the executor to terminate everything and exit.
    Shutdown,
    /// A health check passed.
    Healthy,
    /// A health check failed below the failure threshold.
    Unhealthy { message: String },
    /// Consecutive health check failures crossed the threshold.
    FailedDueToUnhealthy { message: String },
    /// The task certificate expired, or is about to.
    FailedDueToExpiredCertificate { message: String },
    /// The child command exited on its own.
    CommandExited { message: String },
}
