use std::process::Command;
use std::time::{Duration, Instant};

fn stevedore() -> Command {
    let mut command = Command::new(env!("CARGO_BIN_EXE_stevedore"));
    command.env_clear();
    command
}

#[test]
fn version_flag_works() {
    let output = stevedore().arg("--version").output().expect("run stevedore");
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("stevedore"), "stdout: {stdout}");
}

#[test]
fn validate_flag_checks_the_environment_without_subscribing() {
    let output = stevedore()
        .arg("--validate")
        .env("AGENT_ENDPOINT", "127.0.0.1:5051")
        .env("EXECUTOR_ID", "executor-cli-1")
        .env("FRAMEWORK_ID", "framework-1")
        .output()
        .expect("run stevedore");
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("configuration ok"), "stdout: {stdout}");
}

#[test]
fn missing_agent_environment_is_fatal() {
    let output = stevedore().output().expect("run stevedore");
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        stderr.contains("AGENT_ENDPOINT"),
        "stderr: {stderr}"
    );
}

#[test]
fn unreachable_agent_exits_nonzero_within_the_recovery_window() {
    // Bind then drop to get a port with nothing listening on it.
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let started = Instant::now();
    let output = stevedore()
        .env("AGENT_ENDPOINT", format!("127.0.0.1:{port}"))
        .env("EXECUTOR_ID", "executor-cli-1")
        .env("FRAMEWORK_ID", "framework-1")
        .env("RECOVERY_TIMEOUT", "1s")
        .output()
        .expect("run stevedore");

    assert!(!output.status.success());
    assert!(started.elapsed() < Duration::from_secs(30));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(
        stdout.contains("re-establish") || stdout.contains("Executor exited with error"),
        "stdout: {stdout}"
    );
}
