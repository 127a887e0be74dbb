#![deny(unsafe_code)]

//! shienctl: command-line control tool for the shien daemon.
//!
//! Each invocation sends exactly one command over the control socket and
//! prints a single line: the payload on stdout when the daemon answers OK,
//! a diagnostic on stderr otherwise.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::debug;

use shien_config::{AppConfig, DataDir};
use shien_core::{ControlClient, Outcome, logging};

/// Exit status for failures that happen before the daemon is contacted.
const EXIT_LOCAL_FAULT: u8 = 5;

/// shienctl: control the shien daemon.
#[derive(Parser)]
#[command(name = "shienctl", version = shien_core::build_info::VERSION, about, long_about = None)]
struct Cli {
    /// Data directory holding config.toml and the control socket.
    #[arg(long, global = true, env = "SHIEN_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Control socket path, overriding the configuration.
    #[arg(long, global = true)]
    socket: Option<PathBuf>,

    /// Round-trip timeout in milliseconds.
    #[arg(long, global = true, value_parser = clap::value_parser!(u64).range(1..))]
    timeout_ms: Option<u64>,

    /// Increase log verbosity (-v, -vv).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check that the daemon is alive.
    Ping,

    /// Show daemon state, pid, uptime, and version.
    Status,

    /// Show the daemon's build version.
    Version,

    /// Ask the daemon to drain and stop.
    Shutdown,

    /// Validate and display the local configuration. Does not contact the daemon.
    Config {
        /// Show the resolved configuration.
        #[arg(long)]
        show: bool,
    },

    /// Any other command is sent to the daemon as-is.
    #[command(external_subcommand)]
    Other(Vec<String>),
}

impl Commands {
    /// The daemon command name and arguments, or `None` for local commands.
    fn into_request(self) -> Option<(String, Vec<String>)> {
        let name = match self {
            Commands::Ping => "ping",
            Commands::Status => "status",
            Commands::Version => "version",
            Commands::Shutdown => "shutdown",
            Commands::Config { .. } => return None,
            Commands::Other(mut words) => {
                if words.is_empty() {
                    return None;
                }
                let name = words.remove(0);
                return Some((name, words));
            }
        };
        Some((name.to_string(), Vec::new()))
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) =
        logging::init_cli_logging(&logging::verbosity_directive("warn", cli.verbose))
    {
        eprintln!("shienctl: {e}");
    }

    match run(cli).await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("shienctl: {e:#}");
            ExitCode::from(EXIT_LOCAL_FAULT)
        }
    }
}

async fn run(cli: Cli) -> Result<u8> {
    let data_dir = DataDir::resolve(cli.data_dir.as_deref())?;
    let config_path = data_dir.config_file();
    let config = AppConfig::load_or_default(&config_path)
        .await
        .with_context(|| format!("cannot load config {}", config_path.display()))?;

    if let Commands::Config { show } = cli.command {
        cmd_config(&config, &config_path, show)?;
        return Ok(0);
    }

    let socket = match &cli.socket {
        Some(path) => path.clone(),
        None => config.socket_path(&data_dir)?,
    };
    let timeout = cli
        .timeout_ms
        .map(Duration::from_millis)
        .unwrap_or_else(|| config.client_timeout());

    let Some((name, args)) = cli.command.into_request() else {
        anyhow::bail!("no command given");
    };

    debug!(socket = %socket.display(), command = %name, "Contacting daemon");
    let client = ControlClient::new(socket, timeout);
    let outcome: Outcome = client
        .run(&name, args, &mut std::io::stdout(), &mut std::io::stderr())
        .await;
    Ok(outcome.exit_code())
}

fn cmd_config(config: &AppConfig, path: &Path, show: bool) -> Result<()> {
    if show {
        let rendered = toml::to_string_pretty(config).context("cannot render configuration")?;
        print!("{rendered}");
    } else if path.exists() {
        println!("Configuration at '{}' is valid.", path.display());
    } else {
        println!("No configuration at '{}'; using defaults.", path.display());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use pretty_assertions::assert_eq;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("shienctl").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_builtin_subcommands_map_to_requests() {
        for name in ["ping", "status", "version", "shutdown"] {
            let request = parse(&[name]).command.into_request();
            assert_eq!(request, Some((name.to_string(), Vec::new())));
        }
    }

    #[test]
    fn test_unknown_command_is_forwarded() {
        let request = parse(&["frobnicate", "a", "b"]).command.into_request();
        assert_eq!(
            request,
            Some((
                "frobnicate".to_string(),
                vec!["a".to_string(), "b".to_string()]
            ))
        );
    }

    #[test]
    fn test_config_is_local() {
        let cli = parse(&["config", "--show"]);
        assert!(matches!(cli.command, Commands::Config { show: true }));
        assert_eq!(cli.command.into_request(), None);
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = parse(&["ping", "--socket", "/tmp/x.sock", "--timeout-ms", "250"]);
        assert_eq!(cli.socket.as_deref(), Some(Path::new("/tmp/x.sock")));
        assert_eq!(cli.timeout_ms, Some(250));
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let result = Cli::try_parse_from(["shienctl", "--timeout-ms", "0", "ping"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_help_names_the_tool() {
        let help = Cli::command().render_help().to_string();
        assert!(help.contains("shienctl"));
        assert!(help.contains("ping"));
    }
}
