mod cmd;
mod exit;
mod logging;
mod output;

use clap::Parser;

use crate::cmd::Command;
use crate::logging::{init_logging, LogFormat, LogLevel};
use crate::output::OutputFormat;

#[derive(Parser, Debug)]
#[command(name = "osrlink", version, about = "Offscreen renderer transport CLI")]
struct Cli {
    /// Output format.
    #[arg(long, value_name = "FORMAT", global = true)]
    format: Option<OutputFormat>,

    /// Log output format (stderr).
    #[arg(long, value_name = "FORMAT", default_value = "text", global = true)]
    log_format: LogFormat,

    /// Minimum log level (stderr).
    #[arg(
        long,
        value_name = "LEVEL",
        default_value = "info",
        env = "OSRLINK_LOG_LEVEL",
        global = true
    )]
    log_level: LogLevel,

    #[command(subcommand)]
    command: Command,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.log_format, cli.log_level);

    let format = cli.format.unwrap_or_else(OutputFormat::default_for_stdout);
    let result = cmd::run(cli.command, format);

    match result {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(err.code);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_host_with_renderer_args() {
        let cli = Cli::try_parse_from([
            "osrlink",
            "host",
            "--max-frame-size",
            "640x480",
            "--ticks",
            "10",
            "/opt/renderer",
            "--",
            "--headless",
            "--gpu=off",
        ])
        .expect("host args should parse");

        let Command::Host(args) = cli.command else {
            panic!("expected host command");
        };
        assert_eq!(args.executable, std::path::PathBuf::from("/opt/renderer"));
        assert_eq!(args.args, vec!["--headless", "--gpu=off"]);
        assert_eq!(args.max_frame_size.to_string(), "640x480");
        assert_eq!(args.ticks, Some(10));
    }

    #[test]
    fn parses_peer_with_channel_args() {
        let cli = Cli::try_parse_from([
            "osrlink",
            "peer",
            "--pipe-name=/tmp/osrl-1-1.sock",
            "--shmem-name=/osrl-1-1",
            "--max-frame-size=64x64",
        ])
        .expect("peer args should parse");
        assert!(matches!(cli.command, Command::Peer(_)));
    }

    #[test]
    fn rejects_bad_frame_size() {
        let err = Cli::try_parse_from([
            "osrlink",
            "host",
            "--max-frame-size",
            "wide",
            "/opt/renderer",
        ])
        .expect_err("invalid layout should fail");
        assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);
    }

    #[test]
    fn rejects_conflicting_peer_modes() {
        let err = Cli::try_parse_from([
            "osrlink",
            "peer",
            "--pipe-name=/tmp/x.sock",
            "--shmem-name=/x",
            "--no-ready",
            "--fail",
            "boom",
        ])
        .expect_err("conflicting args should fail");
        assert_eq!(err.kind(), clap::error::ErrorKind::ArgumentConflict);
    }
}
