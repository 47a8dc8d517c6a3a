use std::io::IsTerminal;

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use livechan_engine::Event;
use serde::Serialize;
use serde_json::Value;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

#[derive(Serialize)]
struct EventLine<'a> {
    seq: usize,
    #[serde(flatten)]
    event: &'a Event,
}

/// Prints events as they are drained. Table output is buffered until
/// [`EventPrinter::finish`].
pub struct EventPrinter {
    format: OutputFormat,
    table: Option<Table>,
    seq: usize,
}

impl EventPrinter {
    pub fn new(format: OutputFormat) -> Self {
        let table = matches!(format, OutputFormat::Table).then(|| {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["SEQ", "EVENT", "CHANNEL", "DETAIL"]);
            table
        });
        Self {
            format,
            table,
            seq: 0,
        }
    }

    pub fn print(&mut self, event: &Event) {
        self.seq += 1;
        match self.format {
            OutputFormat::Json => {
                let line = EventLine {
                    seq: self.seq,
                    event,
                };
                println!(
                    "{}",
                    serde_json::to_string(&line).unwrap_or_else(|_| "{}".to_string())
                );
            }
            OutputFormat::Table => {
                if let Some(table) = self.table.as_mut() {
                    table.add_row(vec![
                        self.seq.to_string(),
                        event.name().to_string(),
                        event.channel().unwrap_or("-").to_string(),
                        event_detail(event),
                    ]);
                }
            }
            OutputFormat::Pretty => {
                println!(
                    "{:>4} {:<24} {:<16} {}",
                    self.seq,
                    event.name(),
                    event.channel().unwrap_or("-"),
                    event_detail(event)
                );
            }
        }
    }

    /// Number of events printed so far.
    pub fn count(&self) -> usize {
        self.seq
    }

    pub fn finish(self) {
        if let Some(table) = self.table {
            if self.seq > 0 {
                println!("{table}");
            }
        }
    }
}

/// Final materialized collections, one entry per bootstrap channel.
#[derive(Serialize)]
pub struct SnapshotOutput<'a> {
    pub channel: &'a str,
    pub ready: bool,
    pub records: &'a [Value],
}

pub fn print_snapshots(snapshots: &[SnapshotOutput<'_>], format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            for snapshot in snapshots {
                println!(
                    "{}",
                    serde_json::to_string(snapshot).unwrap_or_else(|_| "{}".to_string())
                );
            }
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["CHANNEL", "READY", "ROWS"]);
            for snapshot in snapshots {
                table.add_row(vec![
                    snapshot.channel.to_string(),
                    snapshot.ready.to_string(),
                    snapshot.records.len().to_string(),
                ]);
            }
            println!("{table}");
        }
        OutputFormat::Pretty => {
            for snapshot in snapshots {
                println!(
                    "channel={} ready={} rows={}",
                    snapshot.channel,
                    snapshot.ready,
                    snapshot.records.len()
                );
            }
        }
    }
}

/// Event fields other than its name and channel, as compact JSON.
fn event_detail(event: &Event) -> String {
    let Ok(Value::Object(mut fields)) = serde_json::to_value(event) else {
        return String::new();
    };
    fields.remove("event");
    fields.remove("channel");
    if fields.is_empty() {
        String::new()
    } else {
        Value::Object(fields).to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detail_drops_name_and_channel() {
        let event = Event::HeartbeatSent {
            channel: "calls".to_string(),
            seq: 3,
        };
        assert_eq!(event_detail(&event), r#"{"seq":3}"#);
    }

    #[test]
    fn detail_of_unit_event_is_empty() {
        assert_eq!(event_detail(&Event::SocketOpened), "");
    }

    #[test]
    fn json_line_carries_sequence_and_tag() {
        let event = Event::ChannelLoaded {
            channel: "calls".to_string(),
        };
        let line = serde_json::to_value(EventLine {
            seq: 7,
            event: &event,
        })
        .unwrap();
        assert_eq!(line["seq"], 7);
        assert_eq!(line["event"], "channel_loaded");
        assert_eq!(line["channel"], "calls");
    }
}
