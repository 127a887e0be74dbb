#![deny(unsafe_code)]

//! shien: the background daemon.
//!
//! Runs in the foreground under a service supervisor until SIGINT, SIGTERM,
//! or a `shutdown` command, then drains and exits.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use shien_config::paths::expand_home;
use shien_config::{AppConfig, DataDir};
use shien_core::Daemon;
use shien_core::logging;

/// shien daemon: serves the control socket used by `shienctl`.
#[derive(Parser)]
#[command(name = "shien", version = shien_core::build_info::VERSION, about, long_about = None)]
struct Cli {
    /// Data directory holding config.toml and the control socket.
    #[arg(long, env = "SHIEN_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Configuration file. Defaults to <data-dir>/config.toml.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Control socket path, overriding the configuration.
    #[arg(long)]
    socket: Option<PathBuf>,

    /// Append normal log output to this file instead of stdout.
    #[arg(long)]
    stdout_log: Option<PathBuf>,

    /// Append warnings and errors to this file instead of stderr.
    #[arg(long)]
    stderr_log: Option<PathBuf>,

    /// Increase log verbosity (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("shien: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let data_dir = DataDir::resolve(cli.data_dir.as_deref())?;
    let mut config = load_config(&data_dir, cli.config.as_deref()).await?;
    apply_overrides(&mut config, &cli);
    config.validate()?;

    let stdout_log = log_path(config.logging.stdout_log.as_deref())?;
    let stderr_log = log_path(config.logging.stderr_log.as_deref())?;
    logging::init_service_logging(
        &logging::verbosity_directive(&config.logging.level, cli.verbose),
        stdout_log.as_deref(),
        stderr_log.as_deref(),
    )?;

    data_dir
        .ensure_exists()
        .await
        .with_context(|| format!("cannot create data directory {}", data_dir.path().display()))?;
    info!(data_dir = %data_dir.path().display(), "Resolved data directory");

    let daemon = Daemon::from_config(config, &data_dir)?;
    daemon.run().await?;
    Ok(())
}

async fn load_config(data_dir: &DataDir, explicit: Option<&Path>) -> Result<AppConfig> {
    match explicit {
        Some(path) => AppConfig::load(path)
            .await
            .with_context(|| format!("cannot load config {}", path.display())),
        None => {
            let path = data_dir.config_file();
            AppConfig::load_or_default(&path)
                .await
                .with_context(|| format!("cannot load config {}", path.display()))
        }
    }
}

fn apply_overrides(config: &mut AppConfig, cli: &Cli) {
    if let Some(socket) = &cli.socket {
        config.daemon.socket_path = Some(socket.display().to_string());
    }
    if let Some(path) = &cli.stdout_log {
        config.logging.stdout_log = Some(path.display().to_string());
    }
    if let Some(path) = &cli.stderr_log {
        config.logging.stderr_log = Some(path.display().to_string());
    }
}

fn log_path(configured: Option<&str>) -> Result<Option<PathBuf>> {
    configured
        .map(|p| expand_home(Path::new(p)).map_err(anyhow::Error::from))
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_no_arguments_required() {
        let cli = Cli::try_parse_from(["shien"]).unwrap();
        assert!(cli.socket.is_none());
        assert_eq!(cli.verbose, 0);
    }

    #[test]
    fn test_flags_override_config() {
        let cli = Cli::try_parse_from([
            "shien",
            "--socket",
            "/tmp/s.sock",
            "--stdout-log",
            "/var/log/shien.log",
            "--stderr-log",
            "/var/log/shien.err.log",
            "-vv",
        ])
        .unwrap();
        let mut config = AppConfig::default();
        apply_overrides(&mut config, &cli);

        assert_eq!(config.daemon.socket_path.as_deref(), Some("/tmp/s.sock"));
        assert_eq!(config.logging.stdout_log.as_deref(), Some("/var/log/shien.log"));
        assert_eq!(config.logging.stderr_log.as_deref(), Some("/var/log/shien.err.log"));
        assert_eq!(cli.verbose, 2);
    }

    #[tokio::test]
    async fn test_missing_default_config_uses_defaults() {
        let tmp = tempfile::TempDir::new().unwrap();
        let config = load_config(&DataDir::at(tmp.path()), None).await.unwrap();
        assert_eq!(config, AppConfig::default());
    }

    #[tokio::test]
    async fn test_missing_explicit_config_is_an_error() {
        let tmp = tempfile::TempDir::new().unwrap();
        let missing = tmp.path().join("nope.toml");
        assert!(load_config(&DataDir::at(tmp.path()), Some(&missing)).await.is_err());
    }
}
