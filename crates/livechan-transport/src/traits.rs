use bytes::Bytes;

use crate::error::Result;

/// A message-oriented duplex connection.
///
/// Sends are fire-and-forget from the engine's point of view: `send` hands
/// the frame to the socket and any later failure comes back as a
/// [`TransportEvent::Error`] or [`TransportEvent::Close`].
pub trait Transport: Send {
    /// Open the connection to `address`.
    fn connect(&mut self, address: &str) -> Result<()>;

    /// Queue one complete frame for sending.
    fn send(&mut self, frame: Bytes) -> Result<()>;

    /// Close the connection. Closing twice is not an error.
    fn close(&mut self) -> Result<()>;

    /// Transport name for diagnostics.
    fn transport_name(&self) -> &'static str {
        "transport"
    }
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn connect(&mut self, address: &str) -> Result<()> {
        (**self).connect(address)
    }

    fn send(&mut self, frame: Bytes) -> Result<()> {
        (**self).send(frame)
    }

    fn close(&mut self) -> Result<()> {
        (**self).close()
    }

    fn transport_name(&self) -> &'static str {
        (**self).transport_name()
    }
}

/// Connection-lifecycle notifications delivered by the socket owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// The socket finished opening.
    Open,
    /// One inbound frame.
    Message(Bytes),
    /// A socket-level error. The socket may still be open.
    Error(String),
    /// The socket closed.
    Close { reason: Option<String> },
}

/// Produces a fresh, unconnected transport for every new connection instance.
///
/// `generation` numbers the connection instance the transport belongs to.
/// Socket owners that report events asynchronously tag them with it so that
/// late events of a replaced socket can be told apart. Any `FnMut() -> T`
/// closure is a connector that ignores the generation.
pub trait Connector {
    type Transport: Transport;

    fn transport(&mut self, generation: u64) -> Self::Transport;
}

impl<F, T> Connector for F
where
    F: FnMut() -> T,
    T: Transport,
{
    type Transport = T;

    fn transport(&mut self, _generation: u64) -> T {
        self()
    }
}
