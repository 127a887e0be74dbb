//! Runs the real `shienctl` binary against an in-process daemon.

use std::path::Path;
use std::process::Output;
use std::time::Duration;

use pretty_assertions::assert_eq;
use shien_core::{
    BoxFuture, CommandError, CommandHandler, CommandRegistry, DaemonState, DispatchContext,
};
use shien_test_utils::{TestConfigBuilder, TestDaemon, init_test_tracing};
use tempfile::TempDir;
use tokio::process::Command;

async fn shienctl(data_dir: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_shienctl"))
        .arg("--data-dir")
        .arg(data_dir)
        .args(args)
        .env_remove("RUST_LOG")
        .output()
        .await
        .expect("failed to run shienctl")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

#[tokio::test]
async fn test_help_does_not_need_a_daemon() {
    let tmp = TempDir::new().unwrap();
    for flag in ["--help", "-h", "help"] {
        let output = shienctl(tmp.path(), &[flag]).await;
        assert_eq!(output.status.code(), Some(0), "{flag}");
        assert!(stdout(&output).contains("shienctl"), "{flag}");
    }
    assert!(!tmp.path().join("shien.sock").exists());
}

#[tokio::test]
async fn test_version_flag() {
    let tmp = TempDir::new().unwrap();
    let output = shienctl(tmp.path(), &["--version"]).await;
    assert_eq!(output.status.code(), Some(0));
    assert!(stdout(&output).starts_with("shienctl "));
}

#[tokio::test]
async fn test_ping_without_daemon_is_unreachable() {
    let tmp = TempDir::new().unwrap();
    let output = shienctl(tmp.path(), &["ping"]).await;

    assert_eq!(output.status.code(), Some(3));
    assert_eq!(stdout(&output), "");
    let err = stderr(&output);
    assert!(err.contains("daemon unreachable"), "{err}");
    assert!(!err.contains("error:"), "{err}");
}

#[tokio::test]
async fn test_ping_prints_pong() {
    init_test_tracing();
    let daemon = TestDaemon::start().await;

    let output = shienctl(daemon.data_dir(), &["ping"]).await;
    assert_eq!(output.status.code(), Some(0), "{}", stderr(&output));
    assert_eq!(stdout(&output), "pong\n");

    daemon.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_unknown_command_reports_error() {
    init_test_tracing();
    let daemon = TestDaemon::start().await;

    let output = shienctl(daemon.data_dir(), &["frobnicate", "now"]).await;
    assert_eq!(output.status.code(), Some(1));
    assert_eq!(stdout(&output), "");
    assert_eq!(stderr(&output), "error: unknown command: frobnicate\n");
    assert_eq!(daemon.state(), DaemonState::Ready);

    daemon.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_builtin_with_arguments_is_rejected() {
    let daemon = TestDaemon::start().await;

    // Extra words after a known subcommand are a usage error in shienctl
    // itself; the daemon-side check is reached through a forwarded name.
    let output = shienctl(daemon.data_dir(), &["ping", "extra"]).await;
    assert_eq!(output.status.code(), Some(2));

    daemon.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_status_reports_ready() {
    let daemon = TestDaemon::start().await;

    let output = shienctl(daemon.data_dir(), &["status"]).await;
    assert_eq!(output.status.code(), Some(0));
    let line = stdout(&output);
    assert!(line.starts_with("state=ready "), "{line}");
    assert_eq!(line.lines().count(), 1);

    daemon.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_shutdown_stops_daemon() {
    let mut daemon = TestDaemon::start().await;

    let output = shienctl(daemon.data_dir(), &["shutdown"]).await;
    assert_eq!(output.status.code(), Some(0));
    assert_eq!(stdout(&output), "shutting down\n");

    tokio::time::timeout(Duration::from_secs(10), daemon.join())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(daemon.state(), DaemonState::Stopped);
    assert!(!daemon.socket_path().exists());
}

struct Stall;

impl CommandHandler for Stall {
    fn call<'a>(
        &'a self,
        _ctx: &'a DispatchContext,
        _args: &'a [String],
    ) -> BoxFuture<'a, Result<String, CommandError>> {
        Box::pin(async {
            tokio::time::sleep(Duration::from_secs(3)).await;
            Ok("late".to_string())
        })
    }
}

#[tokio::test]
async fn test_slow_command_times_out() {
    let registry = CommandRegistry::builder()
        .with_builtins()
        .custom("stall", Stall)
        .build();
    let config = TestConfigBuilder::new().grace_period_secs(1).build();
    let daemon = TestDaemon::start_with(config, registry).await;

    let output = shienctl(daemon.data_dir(), &["--timeout-ms", "200", "stall"]).await;
    assert_eq!(output.status.code(), Some(4));
    assert!(stderr(&output).contains("did not respond within 200ms"));

    daemon.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_config_show_is_local() {
    let tmp = TempDir::new().unwrap();
    std::fs::write(
        tmp.path().join("config.toml"),
        TestConfigBuilder::new().timeout_ms(1234).to_toml(),
    )
    .unwrap();

    let output = shienctl(tmp.path(), &["config", "--show"]).await;
    assert_eq!(output.status.code(), Some(0));
    assert!(stdout(&output).contains("timeout_ms = 1234"));
    assert!(!tmp.path().join("shien.sock").exists());
}

#[tokio::test]
async fn test_socket_flag_overrides_data_dir() {
    let daemon = TestDaemon::start().await;
    let elsewhere = TempDir::new().unwrap();

    let socket = daemon.socket_path().to_str().unwrap().to_string();
    let output = shienctl(elsewhere.path(), &["--socket", &socket, "ping"]).await;
    assert_eq!(output.status.code(), Some(0));
    assert_eq!(stdout(&output), "pong\n");

    daemon.shutdown().await.unwrap();
}
