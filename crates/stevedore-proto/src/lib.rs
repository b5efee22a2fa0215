//! # stevedore-proto
//!
//! Wire model shared between the stevedore executor and the cluster agent.
//!
//! This crate defines:
//! - The task descriptor the agent hands to the executor on LAUNCH
//! - Task states and acknowledged status updates
//! - The calls the executor POSTs to the agent (SUBSCRIBE / UPDATE)
//! - The events the agent streams back on the subscribe channel
//! - The RecordIO framing used on that stream
//!
//! Everything here is plain data: no I/O, no channels, no runtime.

mod call;
mod error;
mod event;
mod health;
pub mod recordio;
mod status;
mod task;

pub use call::Call;
pub use error::{Error, Result};
pub use event::AgentEvent;
pub use health::{HealthCheckKind, HealthCheckSpec};
pub use status::{OptionalInfo, StatusUpdate, TaskState};
pub use task::{
    CommandSpec, EnvironmentVariable, ExecutorId, FrameworkCapability, FrameworkId, FrameworkInfo,
    KillPolicy, Label, Labels, Port, TaskDescriptor, TaskId,
};
