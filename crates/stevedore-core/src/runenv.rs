//! Host runtime environment discovery.
//!
//! The agent and the surrounding cloud tooling publish facts about the host
//! through environment variables; this module is the single place that knows
//! their names.

use std::net::IpAddr;

use regex::Regex;

/// Name of the environment the host belongs to, derived from its hostname.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvName {
    Local,
    Dev,
    Test,
    Prod,
}

impl std::fmt::Display for EnvName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            EnvName::Local => "local",
            EnvName::Dev => "dev",
            EnvName::Test => "test",
            EnvName::Prod => "prod",
        };
        f.write_str(name)
    }
}

/// Returns the host IP published for the task, if any.
pub fn ip() -> Option<IpAddr> {
    std::env::var("HOST_IP").ok()?.parse().ok()
}

/// Returns the hostname reported by the agent, the cloud, or the OS.
pub fn hostname() -> Option<String> {
    for name in ["TASK_HOSTNAME", "CLOUD_HOSTNAME"] {
        if let Ok(value) = std::env::var(name) {
            if !value.is_empty() {
                return Some(value);
            }
        }
    }
    os_hostname()
}

/// Classifies the current environment from the hostname pattern
/// `*-(prod|test|dev).*`; anything else is treated as local.
pub fn environment() -> EnvName {
    hostname().map(|name| classify(&name)).unwrap_or(EnvName::Local)
}

fn classify(hostname: &str) -> EnvName {
    let pattern = Regex::new(r".*-(prod|test|dev)\..*").expect("static pattern");
    match pattern
        .captures(hostname)
        .and_then(|captures| captures.get(1))
        .map(|m| m.as_str())
    {
        Some("prod") => EnvName::Prod,
        Some("test") => EnvName::Test,
        Some("dev") => EnvName::Dev,
        _ => EnvName::Local,
    }
}

/// Returns the ID of the supervised task, as published by the agent.
pub fn task_id() -> Option<String> {
    non_empty_var("TASK_ID")
}

/// Returns this executor's ID, as published by the agent.
pub fn executor_id() -> Option<String> {
    non_empty_var("EXECUTOR_ID")
}

/// Returns the agent's HTTP endpoint (`host:port`), as published by the
/// agent.
pub fn agent_endpoint() -> Option<String> {
    non_empty_var("AGENT_ENDPOINT")
}

/// Returns the name of the cloud region the host runs in, if published.
pub fn region() -> Option<String> {
    non_empty_var("CLOUD_REGION")
}

/// Returns the name of the host's availability zone, if published.
pub fn availability_zone() -> Option<String> {
    non_empty_var("CLOUD_AVAILABILITY_ZONE")
}

fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|value| !value.is_empty())
}

fn os_hostname() -> Option<String> {
    nix::unistd::gethostname()
        .ok()
        .and_then(|name| name.into_string().ok())
        .filter(|name| !name.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_environment_from_hostname() {
        assert_eq!(classify("cart-42-prod.dc1.internal"), EnvName::Prod);
        assert_eq!(classify("cart-1-test.dc2.internal"), EnvName::Test);
        assert_eq!(classify("cart-7-dev.dc2.internal"), EnvName::Dev);
        assert_eq!(classify("laptop"), EnvName::Local);
        assert_eq!(classify("cart-7-staging.dc2.internal"), EnvName::Local);
    }
}
