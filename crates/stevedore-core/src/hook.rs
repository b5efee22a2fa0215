//! Lifecycle hooks.
//!
//! Hooks are executor extensions invoked at fixed points of the task
//! lifecycle (service registration, load-balancer wiring, and the like live
//! behind this trait). The manager calls them serially; whether a failing
//! hook aborts the sequence depends on the call site.

use async_trait::async_trait;
use stevedore_proto::TaskDescriptor;
use tracing::{error, info};

use crate::error::{Error, Result};

/// The lifecycle moments a hook can react to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookEventKind {
    /// Right before the task command is started. Not guaranteed to occur.
    BeforeTaskStart,
    /// Right after the first successful health check pass.
    AfterTaskHealthy,
    /// Right before the task is terminated. Guaranteed to be the last event
    /// a hook receives.
    BeforeTerminate,
}

impl std::fmt::Display for HookEventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            HookEventKind::BeforeTaskStart => "BeforeTaskStart",
            HookEventKind::AfterTaskHealthy => "AfterTaskHealthy",
            HookEventKind::BeforeTerminate => "BeforeTerminate",
        };
        f.write_str(name)
    }
}

/// Container for event-specific data handed to each hook.
#[derive(Debug, Clone)]
pub struct HookEvent<'a> {
    pub kind: HookEventKind,
    pub task: &'a TaskDescriptor,
}

/// Environment additions returned by a hook, appended to the child
/// environment at launch.
pub type HookEnv = Vec<(String, String)>;

/// An executor extension invoked on lifecycle events.
///
/// Implementations must ignore event kinds they do not support. A call blocks
/// the orchestrator until it returns; hooks are expected to bound their own
/// work.
#[async_trait]
pub trait Hook: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Reacts to a lifecycle event, optionally returning environment
    /// additions for the task command.
    async fn handle_event(&self, event: &HookEvent<'_>) -> anyhow::Result<HookEnv>;
}

/// Ordered hook list with shared error policy.
#[derive(Default)]
pub struct HookManager {
    hooks: Vec<Box<dyn Hook>>,
}

impl HookManager {
    pub fn new(hooks: Vec<Box<dyn Hook>>) -> Self {
        Self { hooks }
    }

    /// Calls every hook in order.
    ///
    /// With `ignore_errors` false the first failing hook aborts the sequence
    /// and its error is returned; environment from earlier hooks is
    /// discarded. With `ignore_errors` true every hook runs, failures are
    /// logged, and environment from the successful ones is concatenated.
    pub async fn handle_event(
        &self,
        event: &HookEvent<'_>,
        ignore_errors: bool,
    ) -> Result<HookEnv> {
        let mut combined = HookEnv::new();
        for hook in &self.hooks {
            info!(hook = hook.name(), event = %event.kind, "Calling hook");
            match hook.handle_event(event).await {
                Ok(env) => combined.extend(env),
                Err(err) if ignore_errors => {
                    error!(hook = hook.name(), event = %event.kind, error = %err, "Hook failed");
                }
                Err(err) => {
                    return Err(Error::Hook {
                        hook: hook.name(),
                        event: event.kind.to_string(),
                        message: err.to_string(),
                    });
                }
            }
        }
        Ok(combined)
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }
}
