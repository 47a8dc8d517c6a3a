//! Client engine for live-data servers that multiplex many logical channels
//! over one persistent connection.
//!
//! # Crate Structure
//!
//! - [`transport`] — Transport seam and the in-memory transport
//! - [`codec`] — Outbound envelopes and inbound batch decoding
//! - [`schema`] — Per-channel schemas and row formatting
//! - [`engine`] — Channel lifecycle, heartbeats, live cache and reconnection
//!   (tokio driver behind the `async` feature)

/// Re-export transport types.
pub mod transport {
    pub use livechan_transport::*;
}

/// Re-export codec types.
pub mod codec {
    pub use livechan_codec::*;
}

/// Re-export schema types.
pub mod schema {
    pub use livechan_schema::*;
}

/// Re-export engine types.
pub mod engine {
    pub use livechan_engine::*;
}

pub use livechan_engine::{EngineConfig, EngineError, Event, Synchronizer};
