//! The executor: agent subscription and task lifecycle orchestration.
//!
//! Two cooperating loops make up the executor. The subscribe loop owns the
//! HTTP stream to the agent, decodes its events and forwards them to the
//! internal channel, re-subscribing with backoff after disconnects. The
//! orchestrator is the single consumer of that channel: it owns the task
//! descriptor and the child command, drives the lifecycle state machine, and
//! emits status updates. The executor exits after the orchestrator issued a
//! terminal status and the updater drained, or when the recovery window
//! elapses without a successful subscribe.

use std::sync::Arc;
use std::time::Duration;

use stevedore_proto::{
    AgentEvent, FrameworkInfo, OptionalInfo, TaskDescriptor, TaskState,
};
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, error, info, warn};

use crate::agent::{AgentClient, EventStream};
use crate::cert::{cert_from_env, TaskCertificate};
use crate::command::{
    build_child_environment, Command, OutputRouting, OutputSink, ShellCommand, TaskExitState,
};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::event::{ExecutorEvent, EVENT_CHANNEL_CAPACITY};
use crate::health;
use crate::hook::{Hook, HookEvent, HookEventKind, HookManager};
use crate::runtime::Runtime;
use crate::state::{BufferedUpdater, Updater};

/// Initial wait between re-subscribe attempts; doubles up to the configured
/// maximum.
const SUBSCRIPTION_BACKOFF_MIN: Duration = Duration::from_secs(1);

/// Task label that opts into certificate validation.
const VALIDATE_CERTIFICATE_LABEL: &str = "validate-certificate";

/// Task label that selects the output routing.
const LOG_SCRAPING_LABEL: &str = "log-scraping";

/// Builds the log-scraping sink for tasks labelled `log-scraping=logstash`.
///
/// The pipeline itself (scrapers, appenders) is a collaborator; the executor
/// only knows how to hand it the child's output.
pub trait ScrapePipeline: Send + Sync {
    fn attach(&self, task: &TaskDescriptor) -> anyhow::Result<Box<dyn OutputSink>>;
}

/// Internal lifecycle of the supervised task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    /// No launch received yet.
    Waiting,
    /// Launch sequence in progress.
    Starting,
    /// Child running.
    Running,
    /// Shutdown sequence in progress.
    Terminating,
    /// Terminal status emitted; the event loop is done.
    Terminated,
}

/// Health substate as last reported by the supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HealthSubstate {
    Unknown,
    Healthy,
    Unhealthy,
}

/// The executor instance. One per task.
pub struct Executor {
    config: Arc<Config>,
    runtime: Runtime,
    agent: Arc<AgentClient>,
    updater: Arc<dyn Updater>,
    hooks: Arc<HookManager>,
    scraper: Option<Arc<dyn ScrapePipeline>>,
}

impl Executor {
    /// Creates an executor wired to the configured agent.
    pub fn new(config: Config, runtime: Runtime, hooks: Vec<Box<dyn Hook>>) -> Result<Self> {
        info!("Initializing executor with the following configuration:");
        info!(agent_endpoint = %config.agent.endpoint);
        info!(executor_id = %config.agent.executor_id);
        info!(framework_id = %config.agent.framework_id);
        info!(recovery_timeout = ?config.agent.recovery_timeout);
        info!(subscription_backoff_max = ?config.agent.subscription_backoff_max);
        info!(api_path = %config.api_path);
        info!(debug = config.debug);
        info!(state_update_buffer_size = config.state_update_buffer_size);

        let config = Arc::new(config);
        let agent = Arc::new(AgentClient::new(&config)?);
        let updater = Arc::new(BufferedUpdater::new(
            config.agent.executor_id.clone(),
            agent.clone(),
            config.state_update_buffer_size,
        ));
        Ok(Self {
            config,
            runtime,
            agent,
            updater,
            hooks: Arc::new(HookManager::new(hooks)),
            scraper: None,
        })
    }

    /// Attaches the log-scraping pipeline collaborator.
    pub fn with_scrape_pipeline(mut self, pipeline: Arc<dyn ScrapePipeline>) -> Self {
        self.scraper = Some(pipeline);
        self
    }

    /// Registers with the agent and runs until the task reached a terminal
    /// state or a fatal error occurred.
    pub async fn run(self) -> Result<()> {
        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (done_tx, done_rx) = watch::channel(false);

        let orchestrator = Orchestrator::new(
            Arc::clone(&self.config),
            self.runtime.clone(),
            Arc::clone(&self.updater),
            Arc::clone(&self.hooks),
            self.scraper.clone(),
            events_tx.clone(),
        );
        let orchestrator_task = tokio::spawn(async move {
            orchestrator.run(events_rx).await;
            let _ = done_tx.send(true);
        });

        let result = self.subscribe_loop(events_tx, done_rx).await;
        if result.is_ok() {
            let timeout = self.config.state_update_wait_timeout;
            info!(timeout = ?timeout, "Trying to send remaining state updates");
            if let Err(err) = self.updater.wait(timeout).await {
                error!(error = %err, "Unable to send remaining state updates to agent");
            }
            let _ = orchestrator_task.await;
        }
        result
    }

    /// Maintains the subscription until the orchestrator finishes. Returns
    /// a fatal error when the recovery window elapses without a successful
    /// subscribe.
    async fn subscribe_loop(
        &self,
        events: mpsc::Sender<ExecutorEvent>,
        mut done: watch::Receiver<bool>,
    ) -> Result<()> {
        let recovery_timeout = self.config.agent.recovery_timeout;
        let mut backoff = SUBSCRIPTION_BACKOFF_MIN;
        let recovery = tokio::time::sleep(recovery_timeout);
        tokio::pin!(recovery);

        while !*done.borrow() {
            match self.agent.subscribe(self.updater.unacknowledged()).await {
                Ok(mut stream) => {
                    backoff = SUBSCRIPTION_BACKOFF_MIN;
                    // The recovery window restarts on every successful
                    // subscribe and again when the stream ends.
                    recovery
                        .as_mut()
                        .reset(tokio::time::Instant::now() + recovery_timeout);
                    let outcome = self.pump_events(&mut stream, &events, &mut done).await;
                    match outcome {
                        Ok(()) => info!("Disconnected from agent"),
                        Err(err) => warn!(error = %err, "Agent connection error"),
                    }
                    recovery
                        .as_mut()
                        .reset(tokio::time::Instant::now() + recovery_timeout);
                }
                Err(err) => warn!(error = %err, "Agent connection error"),
            }
            if *done.borrow() {
                break;
            }

            tokio::select! {
                _ = &mut recovery => return Err(Error::RecoveryTimeout(recovery_timeout)),
                changed = done.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = tokio::time::sleep(backoff) => {}
            }
            backoff = (backoff * 2).min(self.config.agent.subscription_backoff_max);
        }

        info!("Orchestrator finished, breaking subscribe loop");
        Ok(())
    }

    /// Decodes and dispatches events until the stream ends, the agent aborts
    /// the subscription, or the orchestrator finishes.
    async fn pump_events(
        &self,
        stream: &mut EventStream,
        events: &mpsc::Sender<ExecutorEvent>,
        done: &mut watch::Receiver<bool>,
    ) -> Result<()> {
        loop {
            let event = tokio::select! {
                _ = done.changed() => return Ok(()),
                event = stream.next_event() => event?,
            };
            let Some(event) = event else {
                return Ok(());
            };
            debug!(event = ?event, "Handling agent event");

            let internal = match event {
                AgentEvent::Subscribed { framework } => ExecutorEvent::Subscribed(framework),
                AgentEvent::Launch { task } => ExecutorEvent::Launch(task),
                AgentEvent::Kill { task_id } => ExecutorEvent::Kill { task_id },
                AgentEvent::Shutdown => ExecutorEvent::Shutdown,
                AgentEvent::Acknowledged { uuid } => {
                    self.updater.acknowledge(&uuid);
                    continue;
                }
                AgentEvent::Error { message } => {
                    warn!(message = %message, "Agent aborted the subscription");
                    return Err(Error::AgentAbort);
                }
                AgentEvent::Unknown => {
                    warn!("Unknown event type received from agent, ignoring");
                    continue;
                }
            };
            if events.send(internal).await.is_err() {
                // Orchestrator already finished.
                return Ok(());
            }
        }
    }
}

/// Single-threaded owner of the task lifecycle.
struct Orchestrator {
    config: Arc<Config>,
    runtime: Runtime,
    updater: Arc<dyn Updater>,
    hooks: Arc<HookManager>,
    scraper: Option<Arc<dyn ScrapePipeline>>,
    events_tx: mpsc::Sender<ExecutorEvent>,

    framework: FrameworkInfo,
    task: Option<TaskDescriptor>,
    command: Option<Box<dyn Command>>,
    lifecycle: Lifecycle,
    health: HealthSubstate,
    fired_healthy_hook: bool,
}

impl Orchestrator {
    fn new(
        config: Arc<Config>,
        runtime: Runtime,
        updater: Arc<dyn Updater>,
        hooks: Arc<HookManager>,
        scraper: Option<Arc<dyn ScrapePipeline>>,
        events_tx: mpsc::Sender<ExecutorEvent>,
    ) -> Self {
        Self {
            config,
            runtime,
            updater,
            hooks,
            scraper,
            events_tx,
            framework: FrameworkInfo::default(),
            task: None,
            command: None,
            lifecycle: Lifecycle::Waiting,
            health: HealthSubstate::Unknown,
            fired_healthy_hook: false,
        }
    }

    /// Processes internal events in arrival order until a terminal status
    /// has been issued.
    async fn run(mut self, mut events: mpsc::Receiver<ExecutorEvent>) {
        while let Some(event) = events.recv().await {
            self.handle(event).await;
            if self.lifecycle == Lifecycle::Terminated {
                break;
            }
        }
    }

    async fn handle(&mut self, event: ExecutorEvent) {
        match event {
            ExecutorEvent::Subscribed(framework) => {
                info!(framework = %framework.name, "Subscribed with agent");
                self.framework = framework;
            }
            ExecutorEvent::Launch(task) => self.handle_launch(*task).await,
            ExecutorEvent::Healthy => self.handle_healthy().await,
            ExecutorEvent::Unhealthy { message } => {
                let Some(task_id) = self.task_id() else {
                    return;
                };
                self.health = HealthSubstate::Unhealthy;
                self.updater
                    .update_with_options(
                        task_id,
                        TaskState::Running,
                        OptionalInfo {
                            message: Some(message),
                            healthy: Some(false),
                        },
                    )
                    .await;
            }
            ExecutorEvent::FailedDueToUnhealthy { message } => {
                self.terminate_unhealthy(TaskState::Failed, message).await;
            }
            ExecutorEvent::FailedDueToExpiredCertificate { message } => {
                self.terminate_unhealthy(TaskState::Killed, message).await;
            }
            ExecutorEvent::CommandExited { message } => {
                let Some(task_id) = self.task_id() else {
                    return;
                };
                self.shut_down().await;
                self.updater
                    .update_with_options(
                        task_id,
                        TaskState::Failed,
                        OptionalInfo {
                            message: Some(message),
                            healthy: None,
                        },
                    )
                    .await;
                self.lifecycle = Lifecycle::Terminated;
            }
            ExecutorEvent::Kill { task_id } => {
                self.shut_down().await;
                // The kill event's task ID is authoritative: the launch may
                // have been lost, yet the agent still expects a status with
                // a valid ID.
                self.updater
                    .update_with_options(
                        task_id,
                        TaskState::Killed,
                        OptionalInfo {
                            message: Some(
                                "task killed due to receiving a kill event from agent".into(),
                            ),
                            healthy: None,
                        },
                    )
                    .await;
                self.lifecycle = Lifecycle::Terminated;
            }
            ExecutorEvent::Shutdown => {
                self.shut_down().await;
                // A shutdown can arrive without a preceding launch; nothing
                // reached STARTING then, so there is nothing to report.
                if let Some(task_id) = self.task_id() {
                    self.updater
                        .update_with_options(
                            task_id,
                            TaskState::Killed,
                            OptionalInfo {
                                message: Some(
                                    "task killed due to receiving a shutdown event from agent"
                                        .into(),
                                ),
                                healthy: None,
                            },
                        )
                        .await;
                }
                self.lifecycle = Lifecycle::Terminated;
            }
        }
    }

    fn task_id(&self) -> Option<stevedore_proto::TaskId> {
        self.task.as_ref().map(|task| task.task_id.clone())
    }

    async fn handle_launch(&mut self, task: TaskDescriptor) {
        if self.task.is_some() {
            warn!(task_id = %task.task_id, "Ignoring duplicate launch event");
            return;
        }
        self.lifecycle = Lifecycle::Starting;
        self.task = Some(task.clone());

        match self.launch_task(&task).await {
            Ok(command) => {
                self.command = Some(command);
                self.lifecycle = Lifecycle::Running;
            }
            Err(err) => {
                let message = format!("cannot launch task: {err}");
                error!(task_id = %task.task_id, error = %err, "Launch failed");
                self.updater
                    .update_with_options(
                        task.task_id.clone(),
                        TaskState::Failed,
                        OptionalInfo {
                            message: Some(message),
                            healthy: None,
                        },
                    )
                    .await;
                self.lifecycle = Lifecycle::Terminated;
            }
        }
    }

    /// The launch sequence, atomic from the orchestrator's point of view.
    async fn launch_task(&mut self, task: &TaskDescriptor) -> Result<Box<dyn Command>> {
        self.updater
            .update(task.task_id.clone(), TaskState::Starting)
            .await;

        if task.label_value(VALIDATE_CERTIFICATE_LABEL) == Some("true") {
            let certificate = cert_from_env(std::env::vars())?;
            self.check_cert(&certificate)?;
        }

        let routing = match task.label_value(LOG_SCRAPING_LABEL) {
            Some("logstash") => {
                info!("Service logs will be forwarded to Logstash");
                let pipeline = self.scraper.as_ref().ok_or_else(|| {
                    Error::Launch("log scraping requested but no pipeline is configured".into())
                })?;
                let sink = pipeline.attach(task).map_err(|err| {
                    Error::Launch(format!("cannot configure service log scraping: {err}"))
                })?;
                OutputRouting::Scrape(sink)
            }
            _ => {
                info!("Service logs will be forwarded to stdout/stderr");
                OutputRouting::Forward
            }
        };

        let before_start = HookEvent {
            kind: HookEventKind::BeforeTaskStart,
            task,
        };
        let hook_env = self
            .hooks
            .handle_event(&before_start, false)
            .await
            .map_err(|err| Error::Launch(format!("error running hooks before task start: {err}")))?;

        let env = build_child_environment(std::env::vars(), &task.command.environment, &hook_env);
        let mut command: Box<dyn Command> = Box::new(ShellCommand::new(
            &task.command,
            env,
            routing,
            self.config.kill_tree_excludes.clone(),
        ));
        command
            .start()
            .map_err(|err| Error::Launch(format!("cannot start command: {err}")))?;

        let exit = command
            .exit_state()
            .ok_or_else(|| Error::Launch("command exit state unavailable".into()))?;
        tokio::spawn(exit_to_event(exit, self.events_tx.clone()));

        self.updater
            .update(task.task_id.clone(), TaskState::Running)
            .await;

        if let Some(spec) = &task.health_check {
            health::start(spec.clone(), self.events_tx.clone());
        }

        Ok(command)
    }

    /// Validates certificate freshness and schedules a kill ahead of expiry.
    ///
    /// The jitter spreads the kill times of tasks whose certificates expire
    /// together, so a whole fleet is not terminated at the same instant.
    fn check_cert(&self, certificate: &TaskCertificate) -> Result<()> {
        let jitter = self
            .runtime
            .random
            .duration_in(self.config.random_expiration_range);
        let remaining = self.runtime.clock.until(certificate.not_after);
        let kill_in = remaining
            .checked_sub(jitter)
            .filter(|duration| !duration.is_zero())
            .ok_or_else(|| {
                Error::Certificate(format!(
                    "certificate valid period <= 0 - certificate invalid after {:?}",
                    certificate.not_after
                ))
            })?;

        info!(
            subject = %certificate.subject,
            kill_in = ?kill_in,
            "Scheduling task kill before certificate expiry"
        );
        let events = self.events_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(kill_in).await;
            let _ = events
                .send(ExecutorEvent::FailedDueToExpiredCertificate {
                    message: "certificate expired".into(),
                })
                .await;
        });
        Ok(())
    }

    async fn handle_healthy(&mut self) {
        let Some(task) = self.task.clone() else {
            return;
        };
        if !self.fired_healthy_hook {
            // Latched: later Healthy events must not re-run the hooks.
            self.fired_healthy_hook = true;
            let event = HookEvent {
                kind: HookEventKind::AfterTaskHealthy,
                task: &task,
            };
            // Not ignoring errors here: a failed hook means a misconfigured
            // service, and the task must not keep running in that state.
            if let Err(err) = self.hooks.handle_event(&event, false).await {
                error!(error = %err, "Error calling after task healthy hooks, stopping the command");
                let message = format!("error calling after task healthy hooks: {err}");
                self.shut_down().await;
                self.updater
                    .update_with_options(
                        task.task_id.clone(),
                        TaskState::Failed,
                        OptionalInfo {
                            message: Some(message),
                            healthy: None,
                        },
                    )
                    .await;
                self.lifecycle = Lifecycle::Terminated;
                return;
            }
        }

        self.health = HealthSubstate::Healthy;
        self.updater
            .update_with_options(
                task.task_id.clone(),
                TaskState::Running,
                OptionalInfo {
                    message: None,
                    healthy: Some(true),
                },
            )
            .await;
    }

    /// Shared path for health-breach and certificate-expiry terminations:
    /// report the unhealthy RUNNING state, shut the child down, then emit the
    /// terminal status.
    async fn terminate_unhealthy(&mut self, terminal: TaskState, message: String) {
        let Some(task_id) = self.task_id() else {
            return;
        };
        let previous = self.health;
        self.health = HealthSubstate::Unhealthy;
        let info = OptionalInfo {
            message: Some(message.clone()),
            healthy: Some(false),
        };
        self.updater
            .update_with_options(task_id.clone(), TaskState::Running, info.clone())
            .await;
        info!(task_id = %task_id, reason = %message, was = ?previous, "Killing task");
        self.shut_down().await;
        self.updater
            .update_with_options(task_id, terminal, info)
            .await;
        self.lifecycle = Lifecycle::Terminated;
    }

    /// The shutdown sequence. Idempotent: the command handle is taken on the
    /// first call and later calls return immediately.
    async fn shut_down(&mut self) {
        let Some(task) = self.task.clone() else {
            return;
        };
        let Some(command) = self.command.take() else {
            return;
        };
        self.lifecycle = Lifecycle::Terminating;

        if self.framework.supports_task_killing_state() {
            self.updater
                .update(task.task_id.clone(), TaskState::Killing)
                .await;
        }

        let grace = task
            .kill_policy
            .as_ref()
            .and_then(|policy| policy.grace_period())
            .unwrap_or(self.config.kill_policy_grace_period);

        let before_terminate = HookEvent {
            kind: HookEventKind::BeforeTerminate,
            task: &task,
        };
        // Errors are ignored so every hook gets its chance to run.
        let _ = self.hooks.handle_event(&before_terminate, true).await;

        command.stop(grace).await;
    }
}

/// Posts the child's exit as an internal event. A stop-initiated exit is
/// reported by the kill path instead, so `Killed` stays silent here.
async fn exit_to_event(
    exit: oneshot::Receiver<TaskExitState>,
    events: mpsc::Sender<ExecutorEvent>,
) {
    let message = match exit.await {
        Ok(TaskExitState::Success) => "task exited with success (zero) exit code".to_string(),
        Ok(TaskExitState::Failed(reason)) => format!("task exited with an error: {reason}"),
        Ok(TaskExitState::Killed) | Err(_) => return,
    };
    let _ = events.send(ExecutorEvent::CommandExited { message }).await;
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::SystemTime;

    use async_trait::async_trait;
    use stevedore_proto::{
        CommandSpec, ExecutorId, FrameworkCapability, FrameworkId, HealthCheckKind,
        HealthCheckSpec, KillPolicy, Label, Labels, StatusUpdate, TaskId,
    };

    use super::*;
    use crate::hook::HookEnv;
    use crate::runtime::testing::{FixedClock, ZeroRandom};

    #[derive(Default)]
    struct InMemoryUpdater {
        updates: Mutex<Vec<StatusUpdate>>,
    }

    impl InMemoryUpdater {
        fn states(&self) -> Vec<TaskState> {
            self.updates
                .lock()
                .unwrap()
                .iter()
                .map(|update| update.state)
                .collect()
        }

        fn last(&self) -> StatusUpdate {
            self.updates.lock().unwrap().last().cloned().expect("no updates")
        }
    }

    #[async_trait]
    impl Updater for InMemoryUpdater {
        async fn update(&self, task_id: TaskId, state: TaskState) {
            self.update_with_options(task_id, state, OptionalInfo::default())
                .await;
        }

        async fn update_with_options(
            &self,
            task_id: TaskId,
            state: TaskState,
            info: OptionalInfo,
        ) {
            self.updates.lock().unwrap().push(StatusUpdate::new(
                task_id,
                ExecutorId::from("executor-1"),
                state,
                info,
            ));
        }

        fn acknowledge(&self, _uuid: &uuid::Uuid) {}

        fn unacknowledged(&self) -> Vec<StatusUpdate> {
            Vec::new()
        }

        async fn wait(&self, _timeout: Duration) -> Result<()> {
            Ok(())
        }
    }

    struct CountingHook {
        fail_on: Option<HookEventKind>,
        healthy_calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Hook for CountingHook {
        fn name(&self) -> &'static str {
            "counting"
        }

        async fn handle_event(&self, event: &HookEvent<'_>) -> anyhow::Result<HookEnv> {
            if event.kind == HookEventKind::AfterTaskHealthy {
                self.healthy_calls.fetch_add(1, Ordering::SeqCst);
            }
            if self.fail_on == Some(event.kind) {
                anyhow::bail!("hook rejected {}", event.kind);
            }
            Ok(HookEnv::new())
        }
    }

    fn test_config() -> Arc<Config> {
        let vars = vec![
            ("AGENT_ENDPOINT".to_string(), "127.0.0.1:1".to_string()),
            ("EXECUTOR_ID".to_string(), "executor-1".to_string()),
            ("FRAMEWORK_ID".to_string(), "framework-1".to_string()),
            (
                "STEVEDORE_KILL_POLICY_GRACE_PERIOD".to_string(),
                "200ms".to_string(),
            ),
        ];
        Arc::new(Config::from_vars(vars.into_iter()).unwrap())
    }

    fn task(command: &str) -> TaskDescriptor {
        TaskDescriptor {
            task_id: TaskId::from("task-1"),
            executor_id: ExecutorId::from("executor-1"),
            framework_id: FrameworkId::from("framework-1"),
            command: CommandSpec {
                shell: true,
                value: command.into(),
                arguments: vec![],
                environment: vec![],
            },
            ports: vec![],
            labels: Labels::default(),
            health_check: None,
            kill_policy: Some(KillPolicy {
                grace_period_ns: 200_000_000,
            }),
        }
    }

    struct Harness {
        events_tx: mpsc::Sender<ExecutorEvent>,
        updater: Arc<InMemoryUpdater>,
        healthy_calls: Arc<AtomicUsize>,
        done: tokio::task::JoinHandle<()>,
    }

    fn harness(fail_on: Option<HookEventKind>) -> Harness {
        harness_with(fail_on, FrameworkInfo::default())
    }

    fn harness_with(fail_on: Option<HookEventKind>, framework: FrameworkInfo) -> Harness {
        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let updater = Arc::new(InMemoryUpdater::default());
        let healthy_calls = Arc::new(AtomicUsize::new(0));
        let hooks = Arc::new(HookManager::new(vec![Box::new(CountingHook {
            fail_on,
            healthy_calls: Arc::clone(&healthy_calls),
        })]));

        let mut orchestrator = Orchestrator::new(
            test_config(),
            Runtime::system(),
            updater.clone() as Arc<dyn Updater>,
            hooks,
            None,
            events_tx.clone(),
        );
        orchestrator.framework = framework;
        let done = tokio::spawn(orchestrator.run(events_rx));

        Harness {
            events_tx,
            updater,
            healthy_calls,
            done,
        }
    }

    async fn finish(harness: Harness) -> (Vec<TaskState>, StatusUpdate) {
        tokio::time::timeout(Duration::from_secs(10), harness.done)
            .await
            .expect("orchestrator did not finish")
            .unwrap();
        let states = harness.updater.states();
        let last = harness.updater.last();
        (states, last)
    }

    #[tokio::test]
    async fn clean_exit_maps_to_failed_terminal() {
        let harness = harness(None);
        harness
            .events_tx
            .send(ExecutorEvent::Subscribed(FrameworkInfo::default()))
            .await
            .unwrap();
        harness
            .events_tx
            .send(ExecutorEvent::Launch(Box::new(task("sleep 0.2"))))
            .await
            .unwrap();

        let (states, last) = finish(harness).await;
        assert_eq!(
            states,
            vec![TaskState::Starting, TaskState::Running, TaskState::Failed]
        );
        assert!(last.message.unwrap().contains("zero"));
    }

    #[tokio::test]
    async fn kill_event_terminates_the_running_task() {
        let harness = harness(None);
        harness
            .events_tx
            .send(ExecutorEvent::Launch(Box::new(task("sleep 100"))))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        harness
            .events_tx
            .send(ExecutorEvent::Kill {
                task_id: TaskId::from("task-1"),
            })
            .await
            .unwrap();

        let (states, last) = finish(harness).await;
        assert_eq!(
            states,
            vec![TaskState::Starting, TaskState::Running, TaskState::Killed]
        );
        assert!(last.message.unwrap().contains("kill event"));
    }

    #[tokio::test]
    async fn task_killing_capability_adds_the_killing_state() {
        let framework = FrameworkInfo {
            framework_id: None,
            name: "framework".into(),
            capabilities: vec![FrameworkCapability::new(
                FrameworkCapability::TASK_KILLING_STATE,
            )],
        };
        let harness = harness_with(None, framework);
        harness
            .events_tx
            .send(ExecutorEvent::Launch(Box::new(task("sleep 100"))))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        harness
            .events_tx
            .send(ExecutorEvent::Kill {
                task_id: TaskId::from("task-1"),
            })
            .await
            .unwrap();

        let (states, _) = finish(harness).await;
        assert_eq!(
            states,
            vec![
                TaskState::Starting,
                TaskState::Running,
                TaskState::Killing,
                TaskState::Killed
            ]
        );
    }

    #[tokio::test]
    async fn missing_certificate_fails_the_launch() {
        let mut descriptor = task("sleep 100");
        descriptor.labels = Labels::new(vec![Label {
            key: VALIDATE_CERTIFICATE_LABEL.into(),
            value: "true".into(),
        }]);

        let harness = harness(None);
        harness
            .events_tx
            .send(ExecutorEvent::Launch(Box::new(descriptor)))
            .await
            .unwrap();

        let (states, last) = finish(harness).await;
        assert_eq!(states, vec![TaskState::Starting, TaskState::Failed]);
        assert!(last.message.unwrap().contains("certificate"));
    }

    #[tokio::test]
    async fn healthy_hook_runs_exactly_once() {
        let harness = harness(None);
        harness
            .events_tx
            .send(ExecutorEvent::Launch(Box::new(task("sleep 100"))))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        harness.events_tx.send(ExecutorEvent::Healthy).await.unwrap();
        harness.events_tx.send(ExecutorEvent::Healthy).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(harness.healthy_calls.load(Ordering::SeqCst), 1);

        harness
            .events_tx
            .send(ExecutorEvent::Kill {
                task_id: TaskId::from("task-1"),
            })
            .await
            .unwrap();
        let (states, _) = finish(harness).await;
        assert_eq!(
            states,
            vec![
                TaskState::Starting,
                TaskState::Running,
                TaskState::Running,
                TaskState::Running,
                TaskState::Killed
            ]
        );
    }

    #[tokio::test]
    async fn failing_healthy_hook_terminates_the_task() {
        let harness = harness(Some(HookEventKind::AfterTaskHealthy));
        let healthy_calls = Arc::clone(&harness.healthy_calls);
        harness
            .events_tx
            .send(ExecutorEvent::Launch(Box::new(task("sleep 100"))))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        harness.events_tx.send(ExecutorEvent::Healthy).await.unwrap();

        let (states, last) = finish(harness).await;
        assert_eq!(healthy_calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            states,
            vec![TaskState::Starting, TaskState::Running, TaskState::Failed]
        );
        assert!(last.message.unwrap().contains("healthy hooks"));
    }

    #[tokio::test]
    async fn http_health_breach_shuts_the_task_down() {
        use axum::http::StatusCode;
        use axum::routing::get;
        use axum::Router;

        let app = Router::new().route("/ping", get(|| async { StatusCode::INTERNAL_SERVER_ERROR }));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let mut descriptor = task("sleep 100");
        descriptor.health_check = Some(HealthCheckSpec {
            kind: HealthCheckKind::Http {
                port,
                path: "/ping".into(),
                scheme: None,
            },
            delay_seconds: Some(0.0),
            interval_seconds: Some(0.05),
            timeout_seconds: Some(1.0),
            grace_period_seconds: Some(0.0),
            consecutive_failures: Some(2),
        });

        let harness = harness(None);
        harness
            .events_tx
            .send(ExecutorEvent::Launch(Box::new(descriptor)))
            .await
            .unwrap();

        let (states, last) = finish(harness).await;
        let running_unhealthy = states
            .iter()
            .filter(|state| **state == TaskState::Running)
            .count();
        assert!(running_unhealthy >= 2, "states: {states:?}");
        assert_eq!(*states.last().unwrap(), TaskState::Failed);
        assert_eq!(last.healthy, Some(false));
    }

    #[tokio::test]
    async fn certificate_watchdog_fires_near_expiry() {
        let now = SystemTime::now();
        let runtime = Runtime::new(
            Arc::new(FixedClock { now }),
            Arc::new(ZeroRandom),
        );
        let (events_tx, mut events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let orchestrator = Orchestrator::new(
            test_config(),
            runtime,
            Arc::new(InMemoryUpdater::default()),
            Arc::new(HookManager::default()),
            None,
            events_tx,
        );

        let certificate = TaskCertificate {
            not_after: now + Duration::from_millis(150),
            subject: "CN=task".into(),
        };
        orchestrator.check_cert(&certificate).unwrap();

        let event = tokio::time::timeout(Duration::from_secs(2), events_rx.recv())
            .await
            .expect("watchdog never fired")
            .unwrap();
        assert!(matches!(
            event,
            ExecutorEvent::FailedDueToExpiredCertificate { .. }
        ));
    }

    #[tokio::test]
    async fn expired_certificate_is_rejected_without_arming_a_timer() {
        let now = SystemTime::now();
        let runtime = Runtime::new(Arc::new(FixedClock { now }), Arc::new(ZeroRandom));
        let (events_tx, mut events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let orchestrator = Orchestrator::new(
            test_config(),
            runtime,
            Arc::new(InMemoryUpdater::default()),
            Arc::new(HookManager::default()),
            None,
            events_tx,
        );

        let certificate = TaskCertificate {
            not_after: now - Duration::from_secs(1),
            subject: "CN=task".into(),
        };
        assert!(orchestrator.check_cert(&certificate).is_err());
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(events_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn shutdown_without_a_task_emits_no_status() {
        let harness = harness(None);
        harness.events_tx.send(ExecutorEvent::Shutdown).await.unwrap();
        let done = tokio::time::timeout(Duration::from_secs(2), harness.done).await;
        assert!(done.is_ok());
        assert!(harness.updater.states().is_empty());
    }
}
