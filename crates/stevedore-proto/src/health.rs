//! Health check specification.
//!
//! Field values come from the scheduler as fractional seconds; absent fields
//! fall back to the defaults below. Agent versions disagree on these, so the
//! executor applies its own at accessor level rather than at decode time.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::task::EnvironmentVariable;

/// Default delay before the first check.
pub const DEFAULT_DELAY_SECONDS: f64 = 0.0;
/// Default interval between checks.
pub const DEFAULT_INTERVAL_SECONDS: f64 = 10.0;
/// Default per-check timeout.
pub const DEFAULT_TIMEOUT_SECONDS: f64 = 20.0;
/// Default grace period during which failures are ignored.
pub const DEFAULT_GRACE_PERIOD_SECONDS: f64 = 0.0;
/// Default consecutive-failure threshold.
pub const DEFAULT_CONSECUTIVE_FAILURES: u32 = 3;

/// The probe a health check performs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HealthCheckKind {
    /// Run a command; exit code zero is healthy.
    Command {
        #[serde(default)]
        shell: bool,
        value: String,
        #[serde(default)]
        arguments: Vec<String>,
        #[serde(default)]
        environment: Vec<EnvironmentVariable>,
    },
    /// Establish a TCP connection to the given port.
    Tcp { port: u16 },
    /// GET `scheme://host:port/path`; 2xx/3xx is healthy.
    Http {
        port: u16,
        #[serde(default)]
        path: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        scheme: Option<String>,
    },
}

/// Health check definition attached to a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthCheckSpec {
    #[serde(flatten)]
    pub kind: HealthCheckKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay_seconds: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval_seconds: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grace_period_seconds: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consecutive_failures: Option<u32>,
}

impl HealthCheckSpec {
    pub fn delay(&self) -> Duration {
        seconds(self.delay_seconds.unwrap_or(DEFAULT_DELAY_SECONDS))
    }

    pub fn interval(&self) -> Duration {
        seconds(self.interval_seconds.unwrap_or(DEFAULT_INTERVAL_SECONDS))
    }

    pub fn timeout(&self) -> Duration {
        seconds(self.timeout_seconds.unwrap_or(DEFAULT_TIMEOUT_SECONDS))
    }

    pub fn grace_period(&self) -> Duration {
        seconds(
            self.grace_period_seconds
                .unwrap_or(DEFAULT_GRACE_PERIOD_SECONDS),
        )
    }

    pub fn max_consecutive_failures(&self) -> u32 {
        self.consecutive_failures
            .unwrap_or(DEFAULT_CONSECUTIVE_FAILURES)
    }
}

/// Translates the fractional second values used on the wire to a duration.
fn seconds(value: f64) -> Duration {
    if value <= 0.0 || !value.is_finite() {
        return Duration::ZERO;
    }
    Duration::from_secs_f64(value)
}
