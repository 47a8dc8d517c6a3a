use clap::{Args, Subcommand};
use std::path::PathBuf;

use crate::exit::CliResult;
use crate::output::OutputFormat;

pub mod replay;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Replay a captured session through the engine and print its events.
    Replay(ReplayArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Replay(args) => replay::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

#[derive(Args, Debug)]
pub struct ReplayArgs {
    /// Capture file: one inbound frame (JSON array) or directive per line.
    pub capture: PathBuf,
    /// Engine configuration file.
    #[arg(long, value_name = "PATH", env = "LIVECHAN_CONFIG")]
    pub config: PathBuf,
    /// Session id to use instead of the stored one.
    #[arg(long, value_name = "ID")]
    pub session_id: Option<String>,
    /// Give up after this many consecutive reconnects.
    #[arg(long, value_name = "N")]
    pub max_reconnects: Option<u32>,
    /// Write the session id granted during replay back to the config file.
    #[arg(long)]
    pub persist: bool,
    /// Print the final materialized collections.
    #[arg(long)]
    pub snapshot: bool,
    /// Exit non-zero when the engine reported errors.
    #[arg(long)]
    pub strict: bool,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build information.
    #[arg(long)]
    pub extended: bool,
}
