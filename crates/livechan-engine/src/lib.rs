//! Channel engine for a single livechan connection.
//!
//! One [`Connection`] multiplexes any number of channels over one transport:
//! it authenticates, joins the configured channel groups, requests bootstrap
//! snapshots, keeps per-channel heartbeats running and turns positional row
//! payloads into [`Record`](livechan_schema::Record)s.
//!
//! The [`Synchronizer`] owns the current connection together with the
//! [`LiveCache`], applies bootstraps and incremental mutations in order, and
//! replaces the connection with a fresh instance whenever it closes.
//!
//! Everything here is sans-IO and single-threaded: the socket owner feeds
//! [`TransportEvent`](livechan_transport::TransportEvent)s and clock ticks in,
//! and drains [`Event`]s out. The `async` feature adds a tokio [`driver`].

pub mod cache;
pub mod config;
pub mod connection;
mod dispatch;
#[cfg(feature = "async")]
pub mod driver;
pub mod error;
pub mod event;
pub mod heartbeat;
pub mod registry;
pub mod session;
pub mod sync;

pub use cache::{CacheOutcome, LiveCache, LiveChannelCache, MAX_ROW_GAP};
pub use config::{
    ChannelSet, ChannelSetConfig, ConfigStore, EngineConfig, EnvironmentConfig, HeartbeatConfig,
    JsonFileStore, MemoryStore, ReconnectPolicy,
};
pub use connection::{Connection, ConnectionState, Output};
pub use error::{EngineError, Result};
pub use event::Event;
pub use heartbeat::{HeartbeatScheduler, TimerKind, MIN_TIMER_PERIOD};
pub use registry::{ChannelKind, ChannelPhase, ChannelRegistry, ChannelState, LockOutcome};
pub use session::{AuthGrant, Authenticator, Credentials, Session};
pub use sync::Synchronizer;
