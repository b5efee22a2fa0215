//! Health check scheduling and evaluation.
//!
//! The supervisor runs the task's health check on its configured cadence and
//! turns raw pass/fail outcomes into orchestrator events: `Healthy` on first
//! pass and on recovery, `Unhealthy` below the failure threshold,
//! `FailedDueToUnhealthy` at the threshold. It runs for the lifetime of the
//! orchestrator and stops when the event channel closes.

use std::net::IpAddr;
use std::time::Duration;

use stevedore_proto::{HealthCheckKind, HealthCheckSpec};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::event::ExecutorEvent;
use crate::runenv;

/// Fallback host for TCP/HTTP checks when the environment publishes no IP.
const DEFAULT_CHECK_HOST: &str = "127.0.0.1";

/// Schedules periodic execution of `spec`, emitting events on `events`.
pub fn start(spec: HealthCheckSpec, events: mpsc::Sender<ExecutorEvent>) {
    debug!(?spec, "Health check configuration");
    tokio::spawn(run(spec, events));
}

async fn run(spec: HealthCheckSpec, events: mpsc::Sender<ExecutorEvent>) {
    let checker = Checker::new(&spec);
    let mut tracker = ResultTracker::new(
        spec.grace_period(),
        spec.max_consecutive_failures(),
        Instant::now(),
    );

    let delay = spec.delay();
    info!(delay = ?delay, "Scheduling health check for task");
    tokio::time::sleep(delay).await;

    let interval = spec.interval();
    // A zero interval would spin; fall back to the documented default.
    let interval = if interval.is_zero() {
        Duration::from_secs(10)
    } else {
        interval
    };
    info!(interval = ?interval, "Scheduling health check for task every interval");
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        let outcome = checker.check().await;
        if let Some(verdict) = tracker.observe(outcome, Instant::now()) {
            let event = match verdict {
                Verdict::Healthy => ExecutorEvent::Healthy,
                Verdict::Unhealthy(message) => ExecutorEvent::Unhealthy { message },
                Verdict::Failed(message) => ExecutorEvent::FailedDueToUnhealthy { message },
            };
            if events.send(event).await.is_err() {
                // Orchestrator is gone; nothing left to report to.
                return;
            }
        }
    }
}

/// What the tracker decided to report for one check outcome.
#[derive(Debug, PartialEq, Eq)]
enum Verdict {
    Healthy,
    Unhealthy(String),
    Failed(String),
}

/// Turns a stream of raw check outcomes into reportable verdicts.
struct ResultTracker {
    grace_period: Duration,
    max_consecutive_failures: u32,
    start_time: Instant,
    consecutive_failures: u32,
    never_passed: bool,
}

impl ResultTracker {
    fn new(grace_period: Duration, max_consecutive_failures: u32, start_time: Instant) -> Self {
        Self {
            grace_period,
            max_consecutive_failures,
            start_time,
            consecutive_failures: 0,
            never_passed: true,
        }
    }

    fn observe(&mut self, outcome: Result<(), String>, now: Instant) -> Option<Verdict> {
        match outcome {
            Err(message) => {
                if self.never_passed
                    && now.duration_since(self.start_time) < self.grace_period
                {
                    info!(error = %message, "Ignoring failure of health check: still in grace period");
                    return None;
                }
                self.consecutive_failures += 1;
                info!(
                    error = %message,
                    failures = self.consecutive_failures,
                    "Health check for task failed consecutively"
                );
                // The orchestrator decides whether to honor the failure; the
                // supervisor keeps checking until the channel closes.
                if self.consecutive_failures >= self.max_consecutive_failures {
                    Some(Verdict::Failed(message))
                } else {
                    Some(Verdict::Unhealthy(message))
                }
            }
            Ok(()) => {
                // Report on the first success and on the first success
                // following failures; stay quiet otherwise.
                let report = self.never_passed || self.consecutive_failures > 0;
                self.consecutive_failures = 0;
                self.never_passed = false;
                if report {
                    info!("Health check passed");
                    Some(Verdict::Healthy)
                } else {
                    None
                }
            }
        }
    }
}

/// Executes one kind of check with a fixed timeout.
struct Checker {
    kind: HealthCheckKind,
    timeout: Duration,
}

impl Checker {
    fn new(spec: &HealthCheckSpec) -> Self {
        Self {
            kind: spec.kind.clone(),
            timeout: spec.timeout(),
        }
    }

    async fn check(&self) -> Result<(), String> {
        match &self.kind {
            HealthCheckKind::Command {
                shell,
                value,
                arguments,
                environment,
            } => command_check(*shell, value, arguments, environment, self.timeout).await,
            HealthCheckKind::Tcp { port } => tcp_check(*port, self.timeout).await,
            HealthCheckKind::Http { port, path, scheme } => {
                http_check(*port, path, scheme.as_deref(), self.timeout).await
            }
        }
    }
}

async fn command_check(
    shell: bool,
    value: &str,
    arguments: &[String],
    environment: &[stevedore_proto::EnvironmentVariable],
    timeout: Duration,
) -> Result<(), String> {
    let mut command = if shell {
        let mut command = tokio::process::Command::new("sh");
        command.arg("-c").arg(value);
        command
    } else {
        let mut command = tokio::process::Command::new(value);
        command.args(arguments);
        command
    };
    for variable in environment {
        command.env(&variable.name, &variable.value);
    }
    // Check output lands in the executor's own stream, next to its logs.
    command.kill_on_drop(true);

    info!(command = value, "Launching command health check");
    let mut child = command
        .spawn()
        .map_err(|err| format!("command health check errored: {err}"))?;

    match tokio::time::timeout(timeout, child.wait()).await {
        Ok(Ok(status)) if status.success() => Ok(()),
        Ok(Ok(status)) => Err(format!("command health check errored: {status}")),
        Ok(Err(err)) => Err(format!("command health check errored: {err}")),
        Err(_) => {
            let _ = child.start_kill();
            Err(format!(
                "health check timed out after {}",
                humantime::format_duration(timeout)
            ))
        }
    }
}

async fn tcp_check(port: u16, timeout: Duration) -> Result<(), String> {
    let address = check_address(port);
    match tokio::time::timeout(timeout, tokio::net::TcpStream::connect(&address)).await {
        Ok(Ok(connection)) => {
            drop(connection);
            Ok(())
        }
        Ok(Err(err)) => Err(format!("tcp health check error: {err}")),
        Err(_) => Err(format!(
            "health check timed out after {}",
            humantime::format_duration(timeout)
        )),
    }
}

async fn http_check(
    port: u16,
    path: &str,
    scheme: Option<&str>,
    timeout: Duration,
) -> Result<(), String> {
    let scheme = scheme.unwrap_or("http");
    let path = path.strip_prefix('/').unwrap_or(path);
    let url = format!("{scheme}://{}/{path}", check_address(port));

    let client = reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|err| format!("health check error: {err}"))?;
    let response = client
        .get(&url)
        .send()
        .await
        .map_err(|err| format!("health check error: {err}"))?;

    let code = response.status().as_u16();
    // Codes between 200 and 399 count as success.
    if !(200..400).contains(&code) {
        return Err(format!(
            "health check error: received status code {code}, but expected codes between 200 and 399"
        ));
    }
    Ok(())
}

/// Host and port a TCP/HTTP check should dial: the host IP published through
/// the environment, or loopback.
fn check_address(port: u16) -> String {
    let host = runenv::ip()
        .as_ref()
        .map(IpAddr::to_string)
        .unwrap_or_else(|| {
            warn!("No host IP published, health checking via loopback");
            DEFAULT_CHECK_HOST.to_string()
        });
    format!("{host}:{port}")
}
