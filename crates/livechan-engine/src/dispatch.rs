//! Inbound routing.
//!
//! Every message of a batch either goes to the command dispatcher (control
//! replies and the lifecycle of channels that are not done yet) or is
//! formatted and delivered to the live cache.

use std::collections::BTreeMap;
use std::time::Instant;

use livechan_codec::{normalize_channel, Action, CommandName, InboundMessage};
use livechan_schema::{FormatError, Record};
use livechan_transport::Transport;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::connection::{Connection, ConnectionState, Output};
use crate::error::EngineError;
use crate::event::Event;
use crate::registry::ChannelKind;

static EMPTY_ROW: Value = Value::Null;

#[derive(Debug, Default)]
struct BatchActions {
    clear: bool,
    init: bool,
    bootstrap_data: bool,
}

/// Channels whose batch carries a clear without both an init and a
/// bootstrap_data.
fn no_calls_channels(messages: &[InboundMessage]) -> Vec<String> {
    let mut seen: BTreeMap<String, BatchActions> = BTreeMap::new();
    for message in messages {
        let Some(channel) = message.resolve_channel() else {
            continue;
        };
        let actions = seen.entry(channel).or_default();
        match message.action() {
            Action::Clear => actions.clear = true,
            Action::Init => actions.init = true,
            Action::BootstrapData => actions.bootstrap_data = true,
            _ => {}
        }
    }
    seen.into_iter()
        .filter(|(_, actions)| actions.clear && !(actions.init && actions.bootstrap_data))
        .map(|(channel, _)| channel)
        .collect()
}

impl<T: Transport> Connection<T> {
    pub(crate) fn process_batch(&mut self, messages: Vec<InboundMessage>, now: Instant) {
        for channel in no_calls_channels(&messages) {
            if self.registry.contains(&channel) {
                debug!(channel = %channel, "no calls expected");
                let _ = self.registry.set_no_calls(&channel, true);
            }
        }
        for message in messages {
            self.route(message, now);
        }
    }

    fn route(&mut self, message: InboundMessage, now: Instant) {
        let action = message.action();
        match message.resolve_channel() {
            None if action.is_definitive() => {
                self.emit(Event::error(EngineError::Routing {
                    action: action.to_string(),
                    reason: "message has no channel or object name".to_string(),
                }));
            }
            None => self.dispatch_command(&message, None, now),
            Some(channel) if message.is_reserved() || !self.registry.is_done(&channel) => {
                self.dispatch_command(&message, Some(channel), now)
            }
            Some(channel) => self.deliver(&message, channel, now),
        }
    }

    fn dispatch_command(&mut self, message: &InboundMessage, channel: Option<String>, now: Instant) {
        match message.command() {
            Some(CommandName::Connect) => self.on_connect_ack(message),
            Some(CommandName::Join) => self.on_join_ack(message, channel),
            Some(CommandName::Check) => self.emit(Event::HealthCheckReceived {
                channel,
                data: message.data.clone(),
            }),
            Some(CommandName::Broadcast) | None => self.dispatch_action(message, channel, now),
        }
    }

    fn dispatch_action(&mut self, message: &InboundMessage, channel: Option<String>, now: Instant) {
        let action = message.action();
        let Some(channel) = channel else {
            debug!(action = %action, label = ?message.raw_label(), "ignoring message without channel");
            return;
        };
        if !self.registry.contains(&channel) {
            warn!(channel = %channel, action = %action, "message for unknown channel");
            self.emit(Event::error(EngineError::UnknownChannel(channel)));
            return;
        }
        match action {
            Action::Init => self.on_schema(&channel, &message.data, now),
            Action::BootstrapData => self.on_bootstrap(&channel, &message.data, now),
            Action::Clear => self.push(Output::Cleared { channel }),
            Action::Add | Action::Modify | Action::Del => {
                warn!(channel = %channel, action = %action, "dropping record for channel that is not done");
            }
            Action::Bootstrap | Action::Other(_) => {
                debug!(channel = %channel, action = %action, "ignoring message");
            }
        }
    }

    fn on_connect_ack(&mut self, message: &InboundMessage) {
        if let Some(session_id) = message.sessid.as_deref() {
            if self.session.update(session_id) {
                info!("session id updated by server");
            }
        }
        if self.state == ConnectionState::Authenticated {
            debug!("duplicate CONNECT acknowledgement");
            return;
        }
        self.state = ConnectionState::Authenticated;
        self.emit(Event::Authenticated);
        self.join_channels();
    }

    fn on_join_ack(&mut self, message: &InboundMessage, channel: Option<String>) {
        let names: Vec<String> = if !message.channels.is_empty() {
            message
                .channels
                .iter()
                .map(|name| normalize_channel(name))
                .collect()
        } else if let Some(channel) = channel {
            vec![channel]
        } else {
            self.registry.unjoined()
        };

        for name in names {
            let (kind, joined) = match self
                .registry
                .get(&name)
                .map(|state| (state.kind, state.is_joined()))
            {
                Ok(found) => found,
                Err(err) => {
                    self.emit(Event::error(err));
                    continue;
                }
            };
            if kind == ChannelKind::JoinOnly {
                continue;
            }
            if !joined {
                let _ = self.registry.mark_joined(&name);
                self.emit(Event::ChannelJoined {
                    channel: name.clone(),
                });
            }
            self.request_boot(&name);
        }
    }

    fn on_schema(&mut self, channel: &str, labels: &Value, now: Instant) {
        if !self.registry.contains(channel) {
            self.emit(Event::error(EngineError::UnknownChannel(channel.to_string())));
            return;
        }
        if let Err(err) = self.bonds.register_value(channel, labels) {
            self.emit(Event::error(err));
            return;
        }
        let _ = self.registry.mark_schema_received(channel);

        if self.registry.no_calls(channel) {
            debug!(channel, "schema on channel without calls: empty bootstrap");
            self.on_bootstrap(channel, &Value::Array(Vec::new()), now);
        }
    }

    fn on_bootstrap(&mut self, channel: &str, rows: &Value, now: Instant) {
        let boot_sent = match self.registry.get(channel).map(|state| state.boot_sent) {
            Ok(sent) => sent,
            Err(err) => {
                self.emit(Event::error(err));
                return;
            }
        };
        if !boot_sent {
            self.lock(channel);
            return;
        }

        let _ = self.registry.mark_snapshot_received(channel);
        self.heartbeat.start(channel, now);
        self.lock(channel);

        let records = self.format_snapshot(channel, rows);
        info!(channel, rows = records.len(), "channel ready");
        self.push(Output::ChannelReady {
            channel: channel.to_string(),
            records,
        });
    }

    /// Rows are positional arrays (row id = index) or `{row_id, data}` objects.
    fn format_snapshot(&mut self, channel: &str, rows: &Value) -> Vec<Record> {
        let rows: &[Value] = match rows {
            Value::Array(rows) => rows,
            Value::Null => &[],
            other => {
                self.emit(Event::error(FormatError::InvalidRow {
                    channel: channel.to_string(),
                    reason: format!("expected an array of rows, found {other}"),
                }));
                return Vec::new();
            }
        };

        let mut records = Vec::with_capacity(rows.len());
        for (index, row) in rows.iter().enumerate() {
            let (row_id, values) = match row {
                Value::Object(entry) => (
                    entry
                        .get("row_id")
                        .and_then(Value::as_u64)
                        .unwrap_or(index as u64),
                    entry.get("data").unwrap_or(&EMPTY_ROW),
                ),
                other => (index as u64, other),
            };
            match self
                .bonds
                .format_value(channel, values, Some(row_id), Action::BootstrapData.as_str())
            {
                Ok(record) => records.push(record),
                Err(err) => self.emit(Event::error(err)),
            }
        }
        records
    }

    fn deliver(&mut self, message: &InboundMessage, channel: String, now: Instant) {
        let action = message.action();
        match action {
            Action::Clear => self.push(Output::Cleared { channel }),
            Action::BootstrapData => self.on_bootstrap(&channel, &message.data, now),
            _ => match self
                .bonds
                .format_value(&channel, &message.data, message.row_id, action.as_str())
            {
                Ok(record) => self.push(Output::Delivered { channel, record }),
                Err(err) => {
                    warn!(channel = %channel, action = %action, error = %err, "record not formattable");
                    self.emit(Event::error(err));
                }
            },
        }
    }
}
