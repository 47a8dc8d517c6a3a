use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::Bytes;
use tracing::debug;

use crate::error::{Result, TransportError};
use crate::traits::Transport;

#[derive(Debug, Default)]
struct MemoryLog {
    address: Option<String>,
    connects: usize,
    closes: usize,
    open: bool,
    fail_sends: bool,
    sent: Vec<Bytes>,
}

/// In-process transport that records every outbound frame.
///
/// Used for replaying captured sessions and for tests. All clones of a
/// [`MemoryHandle`] observe the same log.
#[derive(Debug, Default)]
pub struct MemoryTransport {
    log: Arc<Mutex<MemoryLog>>,
}

/// Observer side of a [`MemoryTransport`].
#[derive(Debug, Clone, Default)]
pub struct MemoryHandle {
    log: Arc<Mutex<MemoryLog>>,
}

impl MemoryTransport {
    /// Create a transport and the handle that observes it.
    pub fn new() -> (Self, MemoryHandle) {
        let log = Arc::new(Mutex::new(MemoryLog::default()));
        (
            Self { log: log.clone() },
            MemoryHandle { log },
        )
    }

    fn log(&self) -> MutexGuard<'_, MemoryLog> {
        self.log.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Transport for MemoryTransport {
    fn connect(&mut self, address: &str) -> Result<()> {
        let mut log = self.log();
        log.address = Some(address.to_string());
        log.connects += 1;
        log.open = true;
        debug!(address, "memory transport connected");
        Ok(())
    }

    fn send(&mut self, frame: Bytes) -> Result<()> {
        let mut log = self.log();
        if !log.open {
            return Err(TransportError::Closed);
        }
        if log.fail_sends {
            return Err(TransportError::Send("send failure injected".to_string()));
        }
        log.sent.push(frame);
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        let mut log = self.log();
        if log.open {
            log.open = false;
            log.closes += 1;
        }
        Ok(())
    }

    fn transport_name(&self) -> &'static str {
        "memory"
    }
}

impl MemoryHandle {
    fn log(&self) -> MutexGuard<'_, MemoryLog> {
        self.log.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// A new transport writing to this handle's log.
    ///
    /// Lets a connector hand out one transport per connection while a single
    /// handle observes all of them.
    pub fn transport(&self) -> MemoryTransport {
        MemoryTransport {
            log: self.log.clone(),
        }
    }

    /// Every frame sent so far.
    pub fn sent(&self) -> Vec<Bytes> {
        self.log().sent.clone()
    }

    /// Drain the recorded frames.
    pub fn take_sent(&mut self) -> Vec<Bytes> {
        std::mem::take(&mut self.log().sent)
    }

    /// Last address passed to `connect`.
    pub fn address(&self) -> Option<String> {
        self.log().address.clone()
    }

    /// Number of `connect` calls.
    pub fn connects(&self) -> usize {
        self.log().connects
    }

    /// Number of transitions from open to closed.
    pub fn closes(&self) -> usize {
        self.log().closes
    }

    /// Whether the transport is currently open.
    pub fn is_open(&self) -> bool {
        self.log().open
    }

    /// Make every subsequent `send` fail.
    pub fn fail_sends(&self, fail: bool) {
        self.log().fail_sends = fail;
    }
}
