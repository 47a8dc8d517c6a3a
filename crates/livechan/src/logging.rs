use clap::ValueEnum;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::filter::Targets;
use tracing_subscriber::prelude::*;

/// Crates whose diagnostics follow `--log-level`.
const ENGINE_TARGETS: [&str; 5] = [
    "livechan",
    "livechan_engine",
    "livechan_codec",
    "livechan_schema",
    "livechan_transport",
];

/// Ceiling for every other crate so dependency chatter stays out of replays.
const DEPENDENCY_LEVEL: LevelFilter = LevelFilter::WARN;

#[derive(Copy, Clone, Debug, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn as_filter(self) -> LevelFilter {
        match self {
            LogLevel::Error => LevelFilter::ERROR,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Trace => LevelFilter::TRACE,
        }
    }
}

/// Engine crates log at `level`; everything else is capped at warnings.
fn engine_filter(level: LogLevel) -> Targets {
    let level = level.as_filter();
    Targets::new()
        .with_default(DEPENDENCY_LEVEL.min(level))
        .with_targets(ENGINE_TARGETS.map(|target| (target, level)))
}

/// Logs go to stderr so stdout carries only command output.
pub fn init_logging(format: LogFormat, level: LogLevel) {
    let builder = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_max_level(level.as_filter())
        .with_ansi(false)
        .with_target(true);
    let filter = engine_filter(level);

    let _ = match format {
        LogFormat::Text => builder.finish().with(filter).try_init(),
        LogFormat::Json => builder
            .json()
            .flatten_event(true)
            .finish()
            .with(filter)
            .try_init(),
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing::Level;

    #[test]
    fn engine_crates_follow_requested_level() {
        let filter = engine_filter(LogLevel::Debug);

        assert!(filter.would_enable("livechan_engine::sync", &Level::DEBUG));
        assert!(filter.would_enable("livechan_codec", &Level::DEBUG));
        assert!(filter.would_enable("livechan::cmd::replay", &Level::DEBUG));
        assert!(!filter.would_enable("livechan_engine::sync", &Level::TRACE));
    }

    #[test]
    fn other_crates_are_capped_at_warn() {
        let filter = engine_filter(LogLevel::Trace);

        assert!(filter.would_enable("tokio::runtime", &Level::WARN));
        assert!(!filter.would_enable("tokio::runtime", &Level::INFO));
    }

    #[test]
    fn quiet_level_applies_everywhere() {
        let filter = engine_filter(LogLevel::Error);

        assert!(!filter.would_enable("livechan_engine", &Level::WARN));
        assert!(!filter.would_enable("tokio", &Level::WARN));
        assert!(filter.would_enable("tokio", &Level::ERROR));
    }
}
