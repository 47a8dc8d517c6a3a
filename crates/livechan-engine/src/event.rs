use livechan_codec::OutboundKind;
use livechan_schema::Record;
use serde::{Serialize, Serializer};
use serde_json::Value;

use crate::error::EngineError;

/// Notifications emitted to the consumer, in the order they happened.
#[derive(Debug, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Event {
    /// A fresh connection instance was constructed.
    ConnectionForged { generation: u64 },
    SocketOpened,
    /// The server acknowledged `CONNECT`.
    Authenticated,
    ChannelJoined { channel: String },
    /// The channel reached the done state.
    ChannelLoaded { channel: String },
    /// Lock was attempted before the channel's boot message went out.
    BootingInProgress { channel: String },
    /// Every bootstrap channel has sent its boot message. `trigger` is the
    /// channel whose boot completed the set.
    AllChannelsBooted { trigger: String },
    /// The materialized collection after a bootstrap.
    ChannelSnapshotReady { channel: String, records: Vec<Value> },
    OutboundSent {
        kind: OutboundKind,
        seq: u64,
        #[serde(skip_serializing_if = "Option::is_none")]
        channel: Option<String>,
    },
    HeartbeatSent { channel: String, seq: u64 },
    HealthCheckSent { channel: String, seq: u64 },
    /// Inbound `CHECK` reply.
    HealthCheckReceived {
        #[serde(skip_serializing_if = "Option::is_none")]
        channel: Option<String>,
        data: Value,
    },
    RecordCreated {
        channel: String,
        row_id: u64,
        record: Record,
    },
    RecordUpdated {
        channel: String,
        row_id: u64,
        record: Record,
    },
    RecordDeleted {
        channel: String,
        row_id: u64,
        data: Value,
    },
    ChannelCleared { channel: String },
    /// A delivered record was not applied to the cache.
    RecordIgnored { channel: String, reason: String },
    ConnectionClosed {
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    /// The reconnect policy ran out of attempts.
    ReconnectAbandoned { attempts: u32 },
    Error {
        #[serde(serialize_with = "display")]
        error: EngineError,
    },
}

fn display<S: Serializer>(error: &EngineError, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(error)
}

impl Event {
    /// Snake-case event name, as used in the serialized `event` tag.
    pub fn name(&self) -> &'static str {
        match self {
            Event::ConnectionForged { .. } => "connection_forged",
            Event::SocketOpened => "socket_opened",
            Event::Authenticated => "authenticated",
            Event::ChannelJoined { .. } => "channel_joined",
            Event::ChannelLoaded { .. } => "channel_loaded",
            Event::BootingInProgress { .. } => "booting_in_progress",
            Event::AllChannelsBooted { .. } => "all_channels_booted",
            Event::ChannelSnapshotReady { .. } => "channel_snapshot_ready",
            Event::OutboundSent { .. } => "outbound_sent",
            Event::HeartbeatSent { .. } => "heartbeat_sent",
            Event::HealthCheckSent { .. } => "health_check_sent",
            Event::HealthCheckReceived { .. } => "health_check_received",
            Event::RecordCreated { .. } => "record_created",
            Event::RecordUpdated { .. } => "record_updated",
            Event::RecordDeleted { .. } => "record_deleted",
            Event::ChannelCleared { .. } => "channel_cleared",
            Event::RecordIgnored { .. } => "record_ignored",
            Event::ConnectionClosed { .. } => "connection_closed",
            Event::ReconnectAbandoned { .. } => "reconnect_abandoned",
            Event::Error { .. } => "error",
        }
    }

    /// Channel the event concerns, if any.
    pub fn channel(&self) -> Option<&str> {
        match self {
            Event::ChannelJoined { channel }
            | Event::ChannelLoaded { channel }
            | Event::BootingInProgress { channel }
            | Event::ChannelSnapshotReady { channel, .. }
            | Event::HeartbeatSent { channel, .. }
            | Event::HealthCheckSent { channel, .. }
            | Event::RecordCreated { channel, .. }
            | Event::RecordUpdated { channel, .. }
            | Event::RecordDeleted { channel, .. }
            | Event::ChannelCleared { channel }
            | Event::RecordIgnored { channel, .. } => Some(channel),
            Event::OutboundSent { channel, .. } | Event::HealthCheckReceived { channel, .. } => {
                channel.as_deref()
            }
            _ => None,
        }
    }

    pub fn error(error: impl Into<EngineError>) -> Self {
        Event::Error {
            error: error.into(),
        }
    }
}
