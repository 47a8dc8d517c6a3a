//! Offline replay of a captured session.
//!
//! Capture lines are either inbound frames (a JSON array, exactly as the
//! server sent it) or directives:
//!
//! ```text
//! #open               socket opened
//! #close [reason]     socket closed
//! #error <reason>     socket error
//! #tick <ms>          advance the clock and fire due timers
//! // comment
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use livechan_engine::{ConfigStore, Event, JsonFileStore, Synchronizer};
use livechan_transport::{Connector, MemoryTransport, TransportEvent};
use tracing::{info, warn};

use crate::cmd::ReplayArgs;
use crate::exit::{engine_error, io_error, CliError, CliResult, DATA_INVALID, FAILURE, SUCCESS};
use crate::output::{print_snapshots, EventPrinter, OutputFormat, SnapshotOutput};

#[derive(Debug, PartialEq)]
enum Step {
    Skip,
    Feed(TransportEvent),
    Advance(Duration),
}

pub fn run(args: ReplayArgs, format: OutputFormat) -> CliResult<i32> {
    let store = JsonFileStore::new(&args.config);
    let mut config = store
        .load()
        .map_err(|err| engine_error("failed loading configuration", err))?;
    if let Some(session_id) = args.session_id.clone() {
        config.stored_session_id = Some(session_id);
    }
    if let Some(max) = args.max_reconnects {
        config.reconnect.max_attempts = Some(max);
    }

    let capture = std::fs::read_to_string(&args.capture)
        .map_err(|err| io_error("failed reading capture", err))?;

    let (_, handle) = MemoryTransport::new();
    let source = handle.clone();
    let mut sync = Synchronizer::new(config, move || source.transport())
        .map_err(|err| engine_error("invalid configuration", err))?;
    if args.persist {
        sync = sync.with_store(store);
    }

    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(running.clone())?;

    let mut printer = EventPrinter::new(format);
    let mut errors = 0usize;
    let mut now = Instant::now();

    sync.start(now)
        .map_err(|err| engine_error("failed starting engine", err))?;
    errors += drain(&mut sync, &mut printer);

    for (index, line) in capture.lines().enumerate() {
        if !running.load(Ordering::SeqCst) {
            warn!(line = index + 1, "replay interrupted");
            break;
        }
        let step = parse_line(line).map_err(|reason| {
            CliError::new(
                DATA_INVALID,
                format!("{}:{}: {reason}", args.capture.display(), index + 1),
            )
        })?;
        match step {
            Step::Skip => continue,
            Step::Feed(event) => {
                // capture lines always belong to the newest socket
                let generation = sync.generation();
                sync.handle(generation, event, now)
            }
            Step::Advance(elapsed) => {
                now += elapsed;
                sync.tick(now);
            }
        }
        errors += drain(&mut sync, &mut printer);
        if sync.is_abandoned() {
            break;
        }
    }

    sync.shutdown()
        .map_err(|err| engine_error("failed shutting down", err))?;
    errors += drain(&mut sync, &mut printer);

    info!(
        events = printer.count(),
        frames_sent = handle.sent().len(),
        connections = sync.generation(),
        errors,
        "replay finished"
    );
    printer.finish();

    if args.snapshot {
        print_snapshots(&snapshots(&sync), format);
    }

    if sync.is_abandoned() {
        return Ok(FAILURE);
    }
    if args.strict && errors > 0 {
        return Err(CliError::new(
            DATA_INVALID,
            format!("engine reported {errors} error(s) during replay"),
        ));
    }
    Ok(SUCCESS)
}

/// Print pending events; returns how many were errors.
fn drain<C: Connector>(sync: &mut Synchronizer<C>, printer: &mut EventPrinter) -> usize {
    let mut errors = 0;
    while let Some(event) = sync.poll_event() {
        if matches!(event, Event::Error { .. }) {
            errors += 1;
        }
        printer.print(&event);
    }
    errors
}

fn snapshots<C: Connector>(sync: &Synchronizer<C>) -> Vec<SnapshotOutput<'_>> {
    sync.channels()
        .join_and_bootstrap()
        .iter()
        .map(|channel| SnapshotOutput {
            channel: channel.as_str(),
            ready: sync.is_ready(channel),
            records: sync.snapshot(channel).unwrap_or(&[]),
        })
        .collect()
}

fn parse_line(line: &str) -> Result<Step, String> {
    let line = line.trim();
    if line.is_empty() || line.starts_with("//") {
        return Ok(Step::Skip);
    }

    if let Some(directive) = line.strip_prefix('#') {
        let (name, rest) = match directive.split_once(char::is_whitespace) {
            Some((name, rest)) => (name, rest.trim()),
            None => (directive, ""),
        };
        return match name {
            "open" => Ok(Step::Feed(TransportEvent::Open)),
            "close" => Ok(Step::Feed(TransportEvent::Close {
                reason: (!rest.is_empty()).then(|| rest.to_string()),
            })),
            "error" if !rest.is_empty() => Ok(Step::Feed(TransportEvent::Error(rest.to_string()))),
            "error" => Err("#error needs a reason".to_string()),
            "tick" => rest
                .parse::<u64>()
                .map(|ms| Step::Advance(Duration::from_millis(ms)))
                .map_err(|err| format!("invalid tick '{rest}': {err}")),
            other => Err(format!("unknown directive '#{other}'")),
        };
    }

    if line.starts_with('[') {
        return Ok(Step::Feed(TransportEvent::Message(Bytes::from(
            line.to_string(),
        ))));
    }
    Err("expected a JSON array frame or a # directive".to_string())
}

fn install_ctrlc_handler(running: Arc<AtomicBool>) -> CliResult<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .map_err(|err| {
        CliError::new(
            crate::exit::INTERNAL,
            format!("signal handler setup failed: {err}"),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_directives() {
        assert_eq!(parse_line("#open"), Ok(Step::Feed(TransportEvent::Open)));
        assert_eq!(
            parse_line("#close server restart"),
            Ok(Step::Feed(TransportEvent::Close {
                reason: Some("server restart".to_string())
            }))
        );
        assert_eq!(
            parse_line("#close"),
            Ok(Step::Feed(TransportEvent::Close { reason: None }))
        );
        assert_eq!(
            parse_line("#tick 5000"),
            Ok(Step::Advance(Duration::from_millis(5000)))
        );
    }

    #[test]
    fn skips_blank_and_comment_lines() {
        assert_eq!(parse_line("   "), Ok(Step::Skip));
        assert_eq!(parse_line("// boot phase"), Ok(Step::Skip));
    }

    #[test]
    fn frames_pass_through_untouched() {
        let line = r#"[{"cmd":"CONNECT"}]"#;
        assert_eq!(
            parse_line(line),
            Ok(Step::Feed(TransportEvent::Message(Bytes::from(line))))
        );
    }

    #[test]
    fn rejects_malformed_lines() {
        assert!(parse_line("#tick soon").unwrap_err().contains("invalid tick"));
        assert!(parse_line("#rewind").unwrap_err().contains("unknown directive"));
        assert!(parse_line("#error").is_err());
        assert!(parse_line("{\"cmd\":\"CONNECT\"}").is_err());
    }
}
