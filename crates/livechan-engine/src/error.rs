use livechan_codec::CodecError;
use livechan_schema::FormatError;
use livechan_transport::TransportError;

/// Errors surfaced by the channel engine.
///
/// Apart from configuration and start-up failures, these are reported as
/// [`Event::Error`](crate::Event::Error) notifications and never stop the
/// processing of the remaining messages in a batch.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// A message's channel cannot be determined although its action requires one.
    #[error("cannot route '{action}' message: {reason}")]
    Routing { action: String, reason: String },

    /// The referenced channel is not part of the configured channel set.
    #[error("unknown channel: {0}")]
    UnknownChannel(String),

    /// A row could not be formatted (usually because its schema has not arrived).
    #[error("format error: {0}")]
    Format(#[from] FormatError),

    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// The server broke the channel protocol; the connection is restarted.
    #[error("protocol violation on channel {channel}: {reason}")]
    ProtocolViolation { channel: String, reason: String },

    /// Wire encoding/decoding error.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// Invalid or unusable configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// Authentication failed or no session is available.
    #[error("authentication error: {0}")]
    Auth(String),

    /// I/O error while reading or persisting configuration.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, EngineError>;
