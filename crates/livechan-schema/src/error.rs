/// Errors that can occur while storing bonds or formatting rows.
#[derive(Debug, thiserror::Error)]
pub enum FormatError {
    /// No bond has been received for the channel yet, so its rows are not formattable.
    #[error("no schema received for channel {0}")]
    NoSchema(String),

    /// The bond payload is not an array of labels.
    #[error("invalid schema for channel {channel}: {reason}")]
    InvalidSchema { channel: String, reason: String },

    /// The row payload is not a positional array.
    #[error("invalid row for channel {channel}: {reason}")]
    InvalidRow { channel: String, reason: String },
}

pub type Result<T> = std::result::Result<T, FormatError>;
