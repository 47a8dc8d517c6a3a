mod cmd;
mod exit;
mod logging;
mod output;

use clap::Parser;

use crate::cmd::Command;
use crate::logging::{init_logging, LogFormat, LogLevel};
use crate::output::OutputFormat;

#[derive(Parser, Debug)]
#[command(name = "livechan", version, about = "Live channel engine CLI")]
struct Cli {
    /// Output format.
    #[arg(long, value_name = "FORMAT", global = true)]
    format: Option<OutputFormat>,

    /// Log output format (stderr).
    #[arg(long, value_name = "FORMAT", default_value = "text", global = true)]
    log_format: LogFormat,

    /// Minimum log level (stderr).
    #[arg(long, value_name = "LEVEL", default_value = "info", global = true)]
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
    fn parses_replay_subcommand() {
        let cli = Cli::try_parse_from([
            "livechan",
            "replay",
            "capture.jsonl",
            "--config",
            "livechan.json",
            "--snapshot",
            "--max-reconnects",
            "3",
        ])
        .expect("replay args should parse");

        let Command::Replay(args) = cli.command else {
            panic!("expected replay");
        };
        assert!(args.snapshot);
        assert_eq!(args.max_reconnects, Some(3));
        assert!(!args.persist);
    }

    #[test]
    fn replay_requires_config() {
        let err = Cli::try_parse_from(["livechan", "replay", "capture.jsonl"])
            .expect_err("missing config should fail");

        assert_eq!(err.kind(), clap::error::ErrorKind::MissingRequiredArgument);
    }

    #[test]
    fn global_flags_follow_the_subcommand() {
        let cli = Cli::try_parse_from([
            "livechan",
            "version",
            "--format",
            "json",
            "--log-level",
            "debug",
        ])
        .expect("global flags should parse");

        assert!(matches!(cli.format, Some(OutputFormat::Json)));
        assert!(matches!(cli.log_level, LogLevel::Debug));
    }
}
