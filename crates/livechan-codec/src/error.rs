/// Errors that can occur while encoding or decoding wire messages.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// The frame or envelope is not valid JSON.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// The inbound frame is valid JSON but not an array of messages.
    #[error("inbound frame is not a message batch (found {0})")]
    NotABatch(&'static str),

    /// One message inside a batch could not be decoded.
    #[error("invalid message at batch index {index}: {reason}")]
    InvalidMessage { index: usize, reason: String },
}

pub type Result<T> = std::result::Result<T, CodecError>;
