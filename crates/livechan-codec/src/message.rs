use serde::Deserialize;
use serde_json::Value;
use tracing::warn;

use crate::command::{is_reserved, Action, CommandName};
use crate::error::{CodecError, Result};

/// Nested object reference carried by snapshot-stream messages.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
pub struct ObjectRef {
    #[serde(default)]
    pub name: Option<String>,
}

/// One inbound message from a batch.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct InboundMessage {
    #[serde(default)]
    pub cmd: Option<String>,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub channel: Option<String>,
    #[serde(default)]
    pub object: Option<ObjectRef>,
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default)]
    pub row_id: Option<u64>,
    #[serde(default)]
    pub data: Value,
    #[serde(default)]
    pub sessid: Option<String>,
    #[serde(default)]
    pub channels: Vec<String>,
}

impl InboundMessage {
    /// Owning channel: the direct `channel` field, else `object.name`, lower-cased.
    pub fn resolve_channel(&self) -> Option<String> {
        self.channel
            .as_deref()
            .or_else(|| self.object.as_ref().and_then(|object| object.name.as_deref()))
            .map(normalize_channel)
            .filter(|name| !name.is_empty())
    }

    /// Raw label: `label`, falling back to `cmd`.
    pub fn raw_label(&self) -> Option<&str> {
        self.label.as_deref().or(self.cmd.as_deref())
    }

    /// Whether the raw label names a reserved command.
    pub fn is_reserved(&self) -> bool {
        self.raw_label().is_some_and(is_reserved)
    }

    /// Command named by the raw label, if any.
    pub fn command(&self) -> Option<CommandName> {
        self.raw_label().and_then(CommandName::parse)
    }

    pub fn action(&self) -> Action {
        Action::parse(self.action.as_deref())
    }
}

/// Case-normalize a channel name.
pub fn normalize_channel(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Result of decoding one inbound frame.
///
/// Messages that fail to decode are reported individually so the rest of the
/// batch is still processed.
#[derive(Debug, Default)]
pub struct DecodedBatch {
    pub messages: Vec<InboundMessage>,
    pub rejected: Vec<CodecError>,
}

/// Decode an inbound frame into its message batch.
pub fn decode_batch(frame: &[u8]) -> Result<DecodedBatch> {
    let value: Value = serde_json::from_slice(frame)?;
    let items = match value {
        Value::Array(items) => items,
        Value::Object(_) => return Err(CodecError::NotABatch("object")),
        Value::String(_) => return Err(CodecError::NotABatch("string")),
        Value::Number(_) => return Err(CodecError::NotABatch("number")),
        Value::Bool(_) => return Err(CodecError::NotABatch("bool")),
        Value::Null => return Err(CodecError::NotABatch("null")),
    };

    let mut batch = DecodedBatch {
        messages: Vec::with_capacity(items.len()),
        rejected: Vec::new(),
    };
    for (index, item) in items.into_iter().enumerate() {
        match serde_json::from_value::<InboundMessage>(item) {
            Ok(message) => batch.messages.push(message),
            Err(err) => {
                warn!(index, error = %err, "dropping undecodable message");
                batch.rejected.push(CodecError::InvalidMessage {
                    index,
                    reason: err.to_string(),
                });
            }
        }
    }
    Ok(batch)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn decodes_batch_in_arrival_order() {
        let frame = json!([
            { "channel": "Calls", "action": "init", "data": ["a_id"] },
            { "channel": "calls", "action": "add", "row_id": 0, "data": [1] },
        ])
        .to_string();

        let batch = decode_batch(frame.as_bytes()).unwrap();
        assert!(batch.rejected.is_empty());
        assert_eq!(batch.messages.len(), 2);
        assert_eq!(batch.messages[0].action(), Action::Init);
        assert_eq!(batch.messages[1].row_id, Some(0));
    }

    #[test]
    fn channel_is_lower_cased() {
        let message = InboundMessage {
            channel: Some("Calls".to_string()),
            ..InboundMessage::default()
        };
        assert_eq!(message.resolve_channel().as_deref(), Some("calls"));
    }

    #[test]
    fn snapshot_stream_uses_object_name() {
        let message: InboundMessage =
            serde_json::from_value(json!({ "object": { "name": "QUEUES" }, "action": "bootstrap_data" }))
                .unwrap();
        assert_eq!(message.resolve_channel().as_deref(), Some("queues"));
    }

    #[test]
    fn direct_channel_wins_over_object_name() {
        let message: InboundMessage =
            serde_json::from_value(json!({ "channel": "calls", "object": { "name": "queues" } }))
                .unwrap();
        assert_eq!(message.resolve_channel().as_deref(), Some("calls"));
    }

    #[test]
    fn unresolvable_channel() {
        let message = InboundMessage {
            channel: Some("  ".to_string()),
            ..InboundMessage::default()
        };
        assert_eq!(message.resolve_channel(), None);
    }

    #[test]
    fn label_falls_back_to_cmd() {
        let message: InboundMessage = serde_json::from_value(json!({ "cmd": "join" })).unwrap();
        assert_eq!(message.raw_label(), Some("join"));
        assert!(message.is_reserved());
        assert_eq!(message.command(), Some(CommandName::Join));
    }

    #[test]
    fn rejects_non_array_frame() {
        let err = decode_batch(br#"{"channel":"calls"}"#).unwrap_err();
        assert!(matches!(err, CodecError::NotABatch("object")));
    }

    #[test]
    fn rejects_invalid_json() {
        let err = decode_batch(b"[{not-json").unwrap_err();
        assert!(matches!(err, CodecError::Json(_)));
    }

    #[test]
    fn bad_message_does_not_sink_the_batch() {
        let frame = json!([42, { "channel": "calls", "action": "del", "row_id": 1 }]).to_string();
        let batch = decode_batch(frame.as_bytes()).unwrap();

        assert_eq!(batch.messages.len(), 1);
        assert_eq!(batch.rejected.len(), 1);
        assert!(matches!(
            batch.rejected[0],
            CodecError::InvalidMessage { index: 0, .. }
        ));
    }
}
