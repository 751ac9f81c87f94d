mod cmd;
mod logging;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use j2534::{ClientConfig, PassThruClient};
use tracing::info;

use crate::cmd::Command;
use crate::logging::{init_logging, LogFormat, LogLevel};

#[derive(Parser, Debug)]
#[command(name = "passthru", version, about = "J2534 PassThru diagnostic tool")]
struct Cli {
    /// Configuration file (TOML); `J2534_*` environment variables override it
    #[arg(long, value_name = "FILE", env = "J2534_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Use an emulated library with this many devices instead of a vendor DLL
    #[arg(long, value_name = "N", global = true)]
    mock: Option<usize>,

    /// Print command output as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Log output format (stderr).
    #[arg(long, value_name = "FORMAT", default_value = "text", global = true)]
    log_format: LogFormat,

    /// Minimum log level (stderr).
    #[arg(long, value_name = "LEVEL", default_value = "warn", global = true)]
    log_level: LogLevel,

    #[command(subcommand)]
    command: Command,
}

fn run(cli: Cli) -> Result<()> {
    let config = ClientConfig::load(cli.config.as_deref()).context("failed to load configuration")?;

    match cli.mock {
        Some(count) => {
            info!(count, "Using emulated PassThru library");
            let client = PassThruClient::with_driver_and_config(cmd::mock_driver(count)?, config)?;
            cmd::run(&client, cli.command, cli.json)
        }
        None => {
            let client = PassThruClient::from_config(config).context("failed to load PassThru library")?;
            cmd::run(&client, cli.command, cli.json)
        }
    }
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.log_format, cli.log_level);

    if let Err(err) = run(cli) {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cmd::Protocol;

    #[test]
    fn parses_scan_with_mock() {
        let cli = Cli::try_parse_from(["passthru", "--mock", "2", "scan"]).expect("scan args should parse");
        assert_eq!(cli.mock, Some(2));
        assert!(matches!(cli.command, Command::Scan));
    }

    #[test]
    fn parses_monitor_defaults() {
        let cli = Cli::try_parse_from(["passthru", "monitor", "passthru-1"]).expect("monitor args should parse");
        match cli.command {
            Command::Monitor(args) => {
                assert_eq!(args.device, "passthru-1");
                assert_eq!(args.protocol, Protocol::Can);
                assert_eq!(args.baud, None);
                assert_eq!(args.count, 100);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn parses_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "passthru",
            "version",
            "bench",
            "--json",
            "--log-format",
            "json",
            "--log-level",
            "debug",
        ])
        .expect("version args should parse");
        assert!(cli.json);
        assert_eq!(cli.log_format, LogFormat::Json);
        assert_eq!(cli.log_level, LogLevel::Debug);
    }

    #[test]
    fn rejects_unknown_protocol() {
        let err = Cli::try_parse_from(["passthru", "monitor", "passthru-1", "--protocol", "flexray"])
            .expect_err("unknown protocol should fail");
        assert_eq!(err.kind(), clap::error::ErrorKind::InvalidValue);
    }

    #[test]
    fn requires_a_command() {
        assert!(Cli::try_parse_from(["passthru", "--mock", "1"]).is_err());
    }
}
