/// Errors that can occur in transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Failed to connect to the specified address.
    #[error("failed to connect to {address}: {reason}")]
    Connect { address: String, reason: String },

    /// A frame could not be handed to the socket.
    #[error("failed to send frame: {0}")]
    Send(String),

    /// The socket reported an error.
    #[error("socket error: {0}")]
    Socket(String),

    /// The transport is not connected or has been closed.
    #[error("transport closed")]
    Closed,

    /// An I/O error occurred on the underlying socket.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, TransportError>;
