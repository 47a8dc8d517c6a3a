//! Wire codec for the livechan channel protocol.
//!
//! Outbound, every command is a single JSON envelope:
//! `{ cmd, chl, sessid, params }`, where `chl` is a per-connection sequence
//! number and `sessid` is omitted for `CONNECT`.
//!
//! Inbound, every frame is a JSON array of messages. Each message is routed
//! to its owning channel by a direct `channel` field or, for snapshot-stream
//! messages, by the lower-cased `object.name` field.

pub mod command;
pub mod encode;
pub mod error;
pub mod message;

pub use command::{is_reserved, Action, CommandName};
pub use encode::{Encoder, Outbound, OutboundKind, QueryDefaults};
pub use error::{CodecError, Result};
pub use message::{decode_batch, normalize_channel, DecodedBatch, InboundMessage, ObjectRef};
