use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::command::CommandName;
use crate::error::Result;

/// Paging and filter defaults sent with every channel query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryDefaults {
    pub page: u32,
    pub limit: u32,
    pub filter: Map<String, Value>,
    pub order: Vec<String>,
}

impl Default for QueryDefaults {
    fn default() -> Self {
        Self {
            page: 0,
            limit: 100,
            filter: Map::new(),
            order: Vec::new(),
        }
    }
}

/// The five outbound command kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutboundKind {
    Authenticate,
    Join,
    Subscribe,
    Heartbeat,
    HealthCheck,
}

impl OutboundKind {
    pub fn command(self) -> CommandName {
        match self {
            OutboundKind::Authenticate => CommandName::Connect,
            OutboundKind::Join => CommandName::Join,
            OutboundKind::Subscribe | OutboundKind::Heartbeat => CommandName::Broadcast,
            OutboundKind::HealthCheck => CommandName::Check,
        }
    }
}

/// One outbound command together with its context.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound<'a> {
    /// Authenticate with a session token. Sent without `sessid`.
    Authenticate { token: &'a str },
    /// Join every channel of one group.
    Join { channels: &'a [String] },
    /// Subscribe to a channel and request its bootstrap snapshot.
    Subscribe {
        channel: &'a str,
        query: &'a QueryDefaults,
    },
    /// Liveness beat with the channel's heartbeat sequence id.
    Heartbeat {
        channel: &'a str,
        query: &'a QueryDefaults,
        seq: u64,
    },
    /// Session health check with the channel's health-check sequence id.
    HealthCheck { channel: &'a str, seq: u64 },
}

impl Outbound<'_> {
    pub fn kind(&self) -> OutboundKind {
        match self {
            Outbound::Authenticate { .. } => OutboundKind::Authenticate,
            Outbound::Join { .. } => OutboundKind::Join,
            Outbound::Subscribe { .. } => OutboundKind::Subscribe,
            Outbound::Heartbeat { .. } => OutboundKind::Heartbeat,
            Outbound::HealthCheck { .. } => OutboundKind::HealthCheck,
        }
    }

    fn params(&self) -> Value {
        match self {
            Outbound::Authenticate { token } => json!({ "token": token }),
            Outbound::Join { channels } => json!({ "channels": channels }),
            Outbound::Subscribe { channel, query } => json!({
                "channel": channel,
                "query": advanced_query("bootstrap", query, None),
            }),
            Outbound::Heartbeat {
                channel,
                query,
                seq,
            } => json!({
                "channel": channel,
                "query": advanced_query("beat", query, Some(*seq)),
            }),
            Outbound::HealthCheck { channel, seq } => json!({
                "channel": channel,
                "seq": seq,
            }),
        }
    }
}

fn advanced_query(command: &str, defaults: &QueryDefaults, seq: Option<u64>) -> Value {
    let mut query = Map::new();
    query.insert("command".to_string(), Value::from(command));
    query.insert("page".to_string(), Value::from(defaults.page));
    query.insert("limit".to_string(), Value::from(defaults.limit));
    query.insert("filter".to_string(), Value::Object(defaults.filter.clone()));
    query.insert("order".to_string(), json!(defaults.order));
    if let Some(seq) = seq {
        query.insert("seq".to_string(), Value::from(seq));
    }
    Value::Object(query)
}

#[derive(Serialize)]
struct Envelope<'a> {
    cmd: CommandName,
    chl: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    sessid: Option<&'a str>,
    params: Value,
}

/// Encodes outbound commands and owns the per-connection sequence counter.
///
/// A fresh encoder starts at zero; every encoded command consumes exactly one
/// sequence number.
#[derive(Debug, Default)]
pub struct Encoder {
    next_seq: u64,
}

impl Encoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sequence number the next encoded command will carry.
    pub fn next_seq(&self) -> u64 {
        self.next_seq
    }

    /// Encode `command` into a wire frame, returning the frame and its sequence number.
    ///
    /// `session_id` is ignored for [`Outbound::Authenticate`].
    pub fn encode(&mut self, command: &Outbound<'_>, session_id: Option<&str>) -> Result<(Bytes, u64)> {
        let kind = command.kind();
        let sessid = match kind {
            OutboundKind::Authenticate => None,
            _ => session_id,
        };
        let envelope = Envelope {
            cmd: kind.command(),
            chl: self.next_seq,
            sessid,
            params: command.params(),
        };
        let frame = serde_json::to_vec(&envelope)?;
        let seq = self.next_seq;
        self.next_seq += 1;
        Ok((Bytes::from(frame), seq))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode(frame: &Bytes) -> Value {
        serde_json::from_slice(frame).unwrap()
    }

    #[test]
    fn authenticate_omits_session_id() {
        let mut encoder = Encoder::new();
        let (frame, seq) = encoder
            .encode(&Outbound::Authenticate { token: "tok-1" }, Some("sess-9"))
            .unwrap();
        let value = decode(&frame);

        assert_eq!(seq, 0);
        assert_eq!(value["cmd"], "CONNECT");
        assert_eq!(value["chl"], 0);
        assert!(value.get("sessid").is_none());
        assert_eq!(value["params"]["token"], "tok-1");
    }

    #[test]
    fn join_lists_every_channel() {
        let mut encoder = Encoder::new();
        let channels = vec!["calls".to_string(), "queues".to_string()];
        let (frame, _) = encoder
            .encode(&Outbound::Join { channels: &channels }, Some("sess-9"))
            .unwrap();
        let value = decode(&frame);

        assert_eq!(value["cmd"], "JOIN");
        assert_eq!(value["sessid"], "sess-9");
        assert_eq!(value["params"]["channels"], json!(["calls", "queues"]));
    }

    #[test]
    fn heartbeat_carries_query_defaults_and_seq() {
        let mut encoder = Encoder::new();
        let query = QueryDefaults::default();
        let (frame, _) = encoder
            .encode(
                &Outbound::Heartbeat {
                    channel: "calls",
                    query: &query,
                    seq: 7,
                },
                Some("sess"),
            )
            .unwrap();
        let value = decode(&frame);

        assert_eq!(value["cmd"], "BROADCAST");
        assert_eq!(value["params"]["channel"], "calls");
        assert_eq!(value["params"]["query"]["command"], "beat");
        assert_eq!(value["params"]["query"]["limit"], 100);
        assert_eq!(value["params"]["query"]["seq"], 7);
    }

    #[test]
    fn subscribe_has_no_seq() {
        let mut encoder = Encoder::new();
        let query = QueryDefaults::default();
        let (frame, _) = encoder
            .encode(
                &Outbound::Subscribe {
                    channel: "calls",
                    query: &query,
                },
                Some("sess"),
            )
            .unwrap();
        let value = decode(&frame);

        assert_eq!(value["params"]["query"]["command"], "bootstrap");
        assert!(value["params"]["query"].get("seq").is_none());
    }

    #[test]
    fn health_check_uses_check_command() {
        let mut encoder = Encoder::new();
        let (frame, _) = encoder
            .encode(&Outbound::HealthCheck { channel: "calls", seq: 3 }, Some("s"))
            .unwrap();
        let value = decode(&frame);

        assert_eq!(value["cmd"], "CHECK");
        assert_eq!(value["params"]["seq"], 3);
    }

    #[test]
    fn sequence_increases_by_one_per_send() {
        let mut encoder = Encoder::new();
        let seqs: Vec<u64> = (0..4)
            .map(|_| {
                encoder
                    .encode(&Outbound::HealthCheck { channel: "c", seq: 0 }, Some("s"))
                    .unwrap()
                    .1
            })
            .collect();

        assert_eq!(seqs, vec![0, 1, 2, 3]);
        assert_eq!(encoder.next_seq(), 4);
    }
}
