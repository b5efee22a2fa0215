//! Executor configuration.
//!
//! Everything is environment-driven: executor-level options carry the
//! `STEVEDORE_` prefix, while agent-supplied settings (endpoint, identities,
//! recovery window) arrive unprefixed in the launch environment set up by the
//! agent. The same prefix is later used to keep executor configuration out of
//! the child's environment.

use std::collections::HashMap;
use std::time::Duration;

use stevedore_proto::{ExecutorId, FrameworkId};

use crate::error::{Error, Result};

/// Prefix for executor-level environment configuration.
pub const ENVIRONMENT_PREFIX: &str = "STEVEDORE_";

/// Settings the agent passes through the launch environment.
#[derive(Debug, Clone)]
pub struct AgentSettings {
    /// `host:port` of the agent's HTTP endpoint.
    pub endpoint: String,
    pub executor_id: ExecutorId,
    pub framework_id: FrameworkId,
    /// Total time without a successful subscribe before the executor aborts.
    pub recovery_timeout: Duration,
    /// Upper bound for the wait between re-subscribe attempts.
    pub subscription_backoff_max: Duration,
}

/// Executor configuration, settable from the environment.
#[derive(Debug, Clone)]
pub struct Config {
    /// Raises the log level to `debug` when true.
    pub debug: bool,
    /// URL path of the agent HTTP endpoint.
    pub api_path: String,
    /// Delay between sending TERM and KILL to the task's process tree.
    pub kill_policy_grace_period: Duration,
    /// Timeout for a single HTTP call to the agent.
    pub http_timeout: Duration,
    /// Capacity of the status update queue.
    pub state_update_buffer_size: usize,
    /// Deadline for flushing remaining status updates on shutdown.
    pub state_update_wait_timeout: Duration,
    /// Upper bound of the uniform jitter subtracted from the certificate
    /// expiry kill time, so co-expiring tasks are not all killed at once.
    pub random_expiration_range: Duration,
    /// Keys dropped from scraped service log entries.
    pub servicelog_ignore_keys: Vec<String>,
    /// Process names spared by tree termination (e.g. a sidecar proxy).
    pub kill_tree_excludes: Vec<String>,
    pub agent: AgentSettings,
}

impl Config {
    /// Loads configuration from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_vars(std::env::vars())
    }

    /// Loads configuration from an explicit variable set.
    pub fn from_vars(vars: impl Iterator<Item = (String, String)>) -> Result<Self> {
        let vars: HashMap<String, String> = vars.collect();

        let config = Config {
            debug: parse_or(&vars, "STEVEDORE_DEBUG", false, parse_bool)?,
            api_path: lookup(&vars, "STEVEDORE_API_PATH")
                .unwrap_or_else(|| "/api/v1/executor".to_string()),
            kill_policy_grace_period: parse_or(
                &vars,
                "STEVEDORE_KILL_POLICY_GRACE_PERIOD",
                Duration::from_secs(5),
                parse_duration,
            )?,
            http_timeout: parse_or(
                &vars,
                "STEVEDORE_HTTP_TIMEOUT",
                Duration::from_secs(10),
                parse_duration,
            )?,
            state_update_buffer_size: parse_or(
                &vars,
                "STEVEDORE_STATE_UPDATE_BUFFER_SIZE",
                1024,
                parse_usize,
            )?,
            state_update_wait_timeout: parse_or(
                &vars,
                "STEVEDORE_STATE_UPDATE_WAIT_TIMEOUT",
                Duration::from_secs(5),
                parse_duration,
            )?,
            random_expiration_range: parse_or(
                &vars,
                "STEVEDORE_RANDOM_EXPIRATION_RANGE",
                Duration::from_secs(3 * 3600),
                parse_duration,
            )?,
            servicelog_ignore_keys: parse_or(
                &vars,
                "STEVEDORE_SERVICELOG_IGNORE_KEYS",
                Vec::new(),
                parse_list,
            )?,
            kill_tree_excludes: parse_or(
                &vars,
                "STEVEDORE_KILL_TREE_EXCLUDES",
                Vec::new(),
                parse_list,
            )?,
            agent: AgentSettings {
                endpoint: require(&vars, "AGENT_ENDPOINT")?,
                executor_id: ExecutorId::new(require(&vars, "EXECUTOR_ID")?),
                framework_id: FrameworkId::new(require(&vars, "FRAMEWORK_ID")?),
                recovery_timeout: parse_or(
                    &vars,
                    "RECOVERY_TIMEOUT",
                    Duration::from_secs(1),
                    parse_duration,
                )?,
                subscription_backoff_max: parse_or(
                    &vars,
                    "SUBSCRIPTION_BACKOFF_MAX",
                    Duration::from_secs(1),
                    parse_duration,
                )?,
            },
        };

        Ok(config.sanitize())
    }

    /// Applies floors and fallback defaults to values that must not be zero.
    fn sanitize(mut self) -> Self {
        if self.random_expiration_range.is_zero() {
            self.random_expiration_range = Duration::from_secs(3 * 3600);
        }
        if self.api_path.is_empty() {
            self.api_path = "/api/v1/executor".to_string();
        }
        if self.http_timeout.is_zero() {
            self.http_timeout = Duration::from_secs(10);
        }
        if self.agent.recovery_timeout.is_zero() {
            self.agent.recovery_timeout = Duration::from_secs(1);
        }
        if self.agent.subscription_backoff_max < Duration::from_secs(1) {
            self.agent.subscription_backoff_max = Duration::from_secs(1);
        }
        if self.state_update_buffer_size == 0 {
            self.state_update_buffer_size = 1;
        }
        self
    }
}

fn lookup(vars: &HashMap<String, String>, name: &str) -> Option<String> {
    vars.get(name).filter(|value| !value.is_empty()).cloned()
}

fn require(vars: &HashMap<String, String>, name: &str) -> Result<String> {
    lookup(vars, name).ok_or_else(|| Error::Config(format!("missing {name} environment variable")))
}

fn parse_or<T>(
    vars: &HashMap<String, String>,
    name: &str,
    default: T,
    parse: impl Fn(&str) -> std::result::Result<T, String>,
) -> Result<T> {
    match lookup(vars, name) {
        Some(value) => {
            parse(&value).map_err(|err| Error::Config(format!("invalid {name}: {err}")))
        }
        None => Ok(default),
    }
}

fn parse_bool(value: &str) -> std::result::Result<bool, String> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "1" => Ok(true),
        "false" | "0" => Ok(false),
        other => Err(format!("expected a boolean, got {other:?}")),
    }
}

fn parse_duration(value: &str) -> std::result::Result<Duration, String> {
    humantime::parse_duration(value).map_err(|err| err.to_string())
}

fn parse_usize(value: &str) -> std::result::Result<usize, String> {
    value
        .parse()
        .map_err(|err| format!("expected a number: {err}"))
}

fn parse_list(value: &str) -> std::result::Result<Vec<String>, String> {
    Ok(value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect())
}
