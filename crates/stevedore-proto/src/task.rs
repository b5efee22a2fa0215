//! Task descriptor and related identity types.
//!
//! A [`TaskDescriptor`] is immutable once received from the agent: the
//! executor reads it, it never writes it back.

use serde::{Deserialize, Serialize};

use crate::health::HealthCheckSpec;

macro_rules! id_newtype {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }
    };
}

id_newtype! {
    /// Framework-generated ID distinguishing a single task.
    TaskId
}

id_newtype! {
    /// ID of this executor instance, assigned by the scheduler.
    ExecutorId
}

id_newtype! {
    /// ID of the framework that owns the task.
    FrameworkId
}

/// A single key/value label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Label {
    pub key: String,
    pub value: String,
}

/// Ordered label list with lookup helpers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Labels(Vec<Label>);

impl Labels {
    pub fn new(labels: Vec<Label>) -> Self {
        Self(labels)
    }

    /// Returns the label matching `key`, if any.
    pub fn find(&self, key: &str) -> Option<&Label> {
        self.0.iter().find(|label| label.key == key)
    }

    /// Returns the value of the label matching `key`, or `None`.
    pub fn value_of(&self, key: &str) -> Option<&str> {
        self.find(key).map(|label| label.value.as_str())
    }

    /// Returns all keys whose labels carry the given value.
    pub fn keys_with_value(&self, value: &str) -> Vec<&str> {
        self.0
            .iter()
            .filter(|label| label.value == value)
            .map(|label| label.key.as_str())
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Label> {
        self.0.iter()
    }
}

impl FromIterator<(String, String)> for Labels {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(key, value)| Label { key, value })
                .collect(),
        )
    }
}

/// One environment variable carried by a command or health check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentVariable {
    pub name: String,
    pub value: String,
}

/// How to start the task's child process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandSpec {
    /// When true the value is a shell command line; when false it names an
    /// executable and `arguments` are its argv.
    #[serde(default = "default_shell")]
    pub shell: bool,
    pub value: String,
    #[serde(default)]
    pub arguments: Vec<String>,
    #[serde(default)]
    pub environment: Vec<EnvironmentVariable>,
}

fn default_shell() -> bool {
    true
}

/// A port published for the task, with optional symbolic name and labels.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Port {
    pub number: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Labels::is_empty")]
    pub labels: Labels,
}

/// Grace period between soft and hard termination signals, as requested by
/// the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KillPolicy {
    pub grace_period_ns: i64,
}

impl KillPolicy {
    /// Returns the grace period as a duration, or `None` when unset or
    /// non-positive.
    pub fn grace_period(&self) -> Option<std::time::Duration> {
        u64::try_from(self.grace_period_ns)
            .ok()
            .filter(|ns| *ns > 0)
            .map(std::time::Duration::from_nanos)
    }
}

/// A framework capability name.
///
/// Kept as an open string set: frameworks grow capabilities faster than
/// executors learn them, and unknown ones must pass through undisturbed. The
/// executor only reacts to [`FrameworkCapability::TASK_KILLING_STATE`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FrameworkCapability(String);

impl FrameworkCapability {
    /// The framework understands the KILLING state and expects it to be
    /// reported before KILLED.
    pub const TASK_KILLING_STATE: &'static str = "TASK_KILLING_STATE";

    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_task_killing_state(&self) -> bool {
        self.0 == Self::TASK_KILLING_STATE
    }
}

/// Description of the framework the executor is subscribed under.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameworkInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub framework_id: Option<FrameworkId>,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub capabilities: Vec<FrameworkCapability>,
}

impl FrameworkInfo {
    /// True when the framework advertises the task-killing-state capability.
    pub fn supports_task_killing_state(&self) -> bool {
        self.capabilities
            .iter()
            .any(FrameworkCapability::is_task_killing_state)
    }
}

/// Everything the agent tells the executor about the task to run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskDescriptor {
    pub task_id: TaskId,
    pub executor_id: ExecutorId,
    pub framework_id: FrameworkId,
    pub command: CommandSpec,
    #[serde(default)]
    pub ports: Vec<Port>,
    #[serde(default)]
    pub labels: Labels,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health_check: Option<HealthCheckSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kill_policy: Option<KillPolicy>,
}

impl TaskDescriptor {
    /// Returns the value of a task label, or `None` when absent.
    pub fn label_value(&self, key: &str) -> Option<&str> {
        self.labels.value_of(key)
    }

    /// Returns the value of a task-command environment variable.
    pub fn env_value(&self, name: &str) -> Option<&str> {
        self.command
            .environment
            .iter()
            .find(|variable| variable.name == name)
            .map(|variable| variable.value.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(pairs: &[(&str, &str)]) -> Labels {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn finds_label_value() {
        let labels = labels(&[("log-scraping", "logstash"), ("serviceId", "cart")]);
        assert_eq!(labels.value_of("log-scraping"), Some("logstash"));
        assert_eq!(labels.value_of("missing"), None);
    }

    #[test]
    fn collects_keys_by_value() {
        let labels = labels(&[("weight:50", "tag"), ("canary", "tag"), ("other", "x")]);
        assert_eq!(labels.keys_with_value("tag"), vec!["weight:50", "canary"]);
    }

    #[test]
    fn kill_policy_ignores_non_positive_grace() {
        assert_eq!(KillPolicy { grace_period_ns: 0 }.grace_period(), None);
        assert_eq!(KillPolicy { grace_period_ns: -5 }.grace_period(), None);
        assert_eq!(
            KillPolicy {
                grace_period_ns: 2_000_000_000
            }
            .grace_period(),
            Some(std::time::Duration::from_secs(2))
        );
    }

    #[test]
    fn env_value_searches_the_command_environment() {
        let descriptor = TaskDescriptor {
            task_id: TaskId::from("task-1"),
            executor_id: ExecutorId::from("executor-1"),
            framework_id: FrameworkId::from("framework-1"),
            command: CommandSpec {
                shell: true,
                value: "true".into(),
                arguments: vec![],
                environment: vec![EnvironmentVariable {
                    name: "SERVICE_NAME".into(),
                    value: "cart".into(),
                }],
            },
            ports: vec![],
            labels: Labels::default(),
            health_check: None,
            kill_policy: None,
        };
        assert_eq!(descriptor.env_value("SERVICE_NAME"), Some("cart"));
        assert_eq!(descriptor.env_value("MISSING"), None);
    }

    #[test]
    fn unknown_capabilities_deserialize_without_error() {
        let info: FrameworkInfo = serde_json::from_str(
            r#"{"name":"scheduler","capabilities":["TASK_KILLING_STATE","GPU_RESOURCES"]}"#,
        )
        .unwrap();
        assert!(info.supports_task_killing_state());
        assert_eq!(info.capabilities.len(), 2);
    }
}
