//! Duplex message transport abstraction.
//!
//! The engine never opens sockets itself. It talks to a [`Transport`]
//! (connect, send, close) and is fed [`TransportEvent`]s (open, message,
//! error, close) by whoever owns the socket.
//!
//! This is the lowest layer of livechan. Everything else builds on top of
//! the traits provided here.

pub mod error;
pub mod memory;
pub mod traits;

pub use error::{Result, TransportError};
pub use memory::{MemoryHandle, MemoryTransport};
pub use traits::{Connector, Transport, TransportEvent};
