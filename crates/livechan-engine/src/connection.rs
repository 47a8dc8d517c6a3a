use std::collections::VecDeque;
use std::time::Instant;

use livechan_codec::{decode_batch, Encoder, Outbound, QueryDefaults};
use livechan_schema::{BondRegistry, Record};
use livechan_transport::{Transport, TransportError, TransportEvent};
use tracing::{debug, info, warn};

use crate::config::{ChannelSet, HeartbeatConfig};
use crate::error::{EngineError, Result};
use crate::event::Event;
use crate::heartbeat::{HeartbeatScheduler, TimerKind};
use crate::registry::{ChannelRegistry, LockOutcome};
use crate::session::Session;

/// Socket-level state of a connection instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Open,
    Authenticated,
    Closed,
}

/// What a connection hands upward, in order.
///
/// Events go straight to the consumer; the other variants are applied to the
/// live cache first.
#[derive(Debug)]
pub enum Output {
    Event(Event),
    /// Formatted bootstrap snapshot of a channel that just became done.
    ChannelReady { channel: String, records: Vec<Record> },
    /// Formatted incremental record for a done channel.
    Delivered { channel: String, record: Record },
    /// The channel's record collection must be emptied.
    Cleared { channel: String },
}

/// One connection instance: a transport plus every piece of per-connection
/// channel state.
///
/// Never reused. Reconnection builds a fresh instance, which is what resets
/// the outbound sequence counter, the channel registry and the schemas.
#[derive(Debug)]
pub struct Connection<T: Transport> {
    pub(crate) generation: u64,
    pub(crate) transport: T,
    pub(crate) session: Session,
    pub(crate) query: QueryDefaults,
    pub(crate) encoder: Encoder,
    pub(crate) registry: ChannelRegistry,
    pub(crate) bonds: BondRegistry,
    pub(crate) heartbeat: HeartbeatScheduler,
    pub(crate) outbox: VecDeque<Output>,
    pub(crate) state: ConnectionState,
    pub(crate) failed: Option<String>,
}

impl<T: Transport> Connection<T> {
    pub fn new(
        generation: u64,
        transport: T,
        session: Session,
        channels: ChannelSet,
        heartbeat: &HeartbeatConfig,
        query: QueryDefaults,
    ) -> Self {
        Self {
            generation,
            transport,
            session,
            query,
            encoder: Encoder::new(),
            registry: ChannelRegistry::new(channels),
            bonds: BondRegistry::new(),
            heartbeat: HeartbeatScheduler::new(heartbeat),
            outbox: VecDeque::new(),
            state: ConnectionState::Idle,
            failed: None,
        }
    }

    /// Open the transport towards the session's server address.
    pub fn start(&mut self) -> Result<()> {
        self.state = ConnectionState::Connecting;
        info!(
            generation = self.generation,
            transport = self.transport.transport_name(),
            address = %self.session.server_address,
            "connecting"
        );
        self.transport.connect(&self.session.server_address)?;
        Ok(())
    }

    /// Feed one transport notification.
    pub fn handle_event(&mut self, event: TransportEvent, now: Instant) {
        match event {
            TransportEvent::Open => self.handle_open(),
            TransportEvent::Message(frame) => self.handle_message(&frame, now),
            TransportEvent::Error(reason) => self.handle_error(reason),
            TransportEvent::Close { reason } => self.handle_close(reason),
        }
    }

    /// Socket opened: authenticate with the session token.
    pub fn handle_open(&mut self) {
        self.state = ConnectionState::Open;
        self.emit(Event::SocketOpened);

        let Some(token) = self.session.session_id.clone() else {
            self.emit(Event::error(EngineError::Auth(
                "no session id to authenticate with".to_string(),
            )));
            return;
        };
        self.send(&Outbound::Authenticate { token: &token }, None);
    }

    /// One inbound frame. Each message of the batch is handled in arrival
    /// order; a bad message never stops the rest.
    pub fn handle_message(&mut self, frame: &[u8], now: Instant) {
        let batch = match decode_batch(frame) {
            Ok(batch) => batch,
            Err(err) => {
                warn!(error = %err, "dropping undecodable frame");
                self.emit(Event::error(err));
                return;
            }
        };
        for rejected in batch.rejected {
            self.emit(Event::error(rejected));
        }
        self.process_batch(batch.messages, now);
    }

    pub fn handle_error(&mut self, reason: String) {
        warn!(generation = self.generation, reason = %reason, "socket error");
        self.fail(reason.clone());
        self.emit(Event::error(TransportError::Socket(reason)));
    }

    pub fn handle_close(&mut self, reason: Option<String>) {
        info!(generation = self.generation, reason = ?reason, "connection closed");
        self.dump();
        self.state = ConnectionState::Closed;
        self.fail(reason.clone().unwrap_or_else(|| "connection closed".to_string()));
        self.emit(Event::ConnectionClosed { reason });
    }

    /// Send one join per non-empty group.
    ///
    /// Join-only channels are done as soon as their join is sent; bootstrap
    /// channels wait for the server's acknowledgement.
    pub fn join_channels(&mut self) {
        let join_only = self.registry.join_only().to_vec();
        if !join_only.is_empty()
            && self
                .send(&Outbound::Join { channels: &join_only }, None)
                .is_some()
        {
            for channel in &join_only {
                if let Err(err) = self.registry.mark_joined(channel) {
                    self.emit(Event::error(err));
                    continue;
                }
                self.emit(Event::ChannelJoined {
                    channel: channel.clone(),
                });
                self.lock(channel);
            }
        }

        let bootstrap = self.registry.bootstrap().to_vec();
        if !bootstrap.is_empty() {
            self.send(&Outbound::Join { channels: &bootstrap }, None);
        }
    }

    /// Send the boot message of a bootstrap channel once.
    pub(crate) fn request_boot(&mut self, channel: &str) {
        match self.registry.get(channel).map(|state| state.boot_sent) {
            Ok(true) => return,
            Ok(false) => {}
            Err(err) => {
                self.emit(Event::error(err));
                return;
            }
        }

        let query = self.query.clone();
        if self
            .send(&Outbound::Subscribe { channel, query: &query }, Some(channel))
            .is_none()
        {
            return;
        }
        if matches!(self.registry.mark_boot_sent(channel), Ok(true)) && self.registry.all_booted() {
            info!(trigger = channel, "all bootstrap channels booted");
            self.emit(Event::AllChannelsBooted {
                trigger: channel.to_string(),
            });
        }
    }

    /// Lock a channel, emitting the matching signal.
    pub(crate) fn lock(&mut self, channel: &str) -> LockOutcome {
        match self.registry.lock(channel) {
            Ok(LockOutcome::Locked) => {
                self.emit(Event::ChannelLoaded {
                    channel: channel.to_string(),
                });
                LockOutcome::Locked
            }
            Ok(LockOutcome::BootingInProgress) => {
                self.emit(Event::BootingInProgress {
                    channel: channel.to_string(),
                });
                LockOutcome::BootingInProgress
            }
            Ok(LockOutcome::AlreadyLocked) => LockOutcome::AlreadyLocked,
            Err(err) => {
                self.emit(Event::error(err));
                LockOutcome::BootingInProgress
            }
        }
    }

    /// Fire every heartbeat and health check due at `now`.
    pub fn tick(&mut self, now: Instant) {
        for (channel, kind) in self.heartbeat.due(now) {
            match kind {
                TimerKind::Beat => self.send_heartbeat(&channel),
                TimerKind::HealthCheck => self.send_health_check(&channel),
            }
        }
    }

    fn send_heartbeat(&mut self, channel: &str) {
        let seq = match self.registry.next_heartbeat_seq(channel) {
            Ok(seq) => seq,
            Err(err) => return self.emit(Event::error(err)),
        };
        let query = self.query.clone();
        let beat = Outbound::Heartbeat {
            channel,
            query: &query,
            seq,
        };
        if self.send(&beat, Some(channel)).is_some() {
            self.emit(Event::HeartbeatSent {
                channel: channel.to_string(),
                seq,
            });
        }
    }

    fn send_health_check(&mut self, channel: &str) {
        let seq = match self.registry.next_health_check_seq(channel) {
            Ok(seq) => seq,
            Err(err) => return self.emit(Event::error(err)),
        };
        if self
            .send(&Outbound::HealthCheck { channel, seq }, Some(channel))
            .is_some()
        {
            self.emit(Event::HealthCheckSent {
                channel: channel.to_string(),
                seq,
            });
        }
    }

    /// Encode and send, returning the envelope's sequence number.
    ///
    /// A failed send is reported and marks the connection for restart.
    pub(crate) fn send(&mut self, command: &Outbound<'_>, channel: Option<&str>) -> Option<u64> {
        let (frame, seq) = match self.encoder.encode(command, self.session.session_id()) {
            Ok(encoded) => encoded,
            Err(err) => {
                self.emit(Event::error(err));
                return None;
            }
        };
        if let Err(err) = self.transport.send(frame) {
            warn!(kind = ?command.kind(), seq, error = %err, "send failed");
            self.fail(err.to_string());
            self.emit(Event::error(err));
            return None;
        }
        debug!(kind = ?command.kind(), seq, channel, "sent");
        self.emit(Event::OutboundSent {
            kind: command.kind(),
            seq,
            channel: channel.map(str::to_string),
        });
        Some(seq)
    }

    /// Cancel a channel's timers and return it to its created form.
    pub fn dump_channel(&mut self, channel: &str) -> Result<()> {
        self.heartbeat.cancel(channel);
        self.registry.reset(channel)
    }

    /// Dump every channel.
    pub fn dump(&mut self) {
        let channels: Vec<String> = self
            .registry
            .channel_set()
            .iter()
            .map(|(name, _)| name.to_string())
            .collect();
        for channel in channels {
            if let Err(err) = self.dump_channel(&channel) {
                warn!(channel = %channel, error = %err, "dump failed");
            }
        }
        self.heartbeat.clear();
    }

    /// Dump everything and close the transport.
    pub fn teardown(&mut self) {
        self.dump();
        if let Err(err) = self.transport.close() {
            warn!(generation = self.generation, error = %err, "close failed");
        }
        self.state = ConnectionState::Closed;
        debug!(generation = self.generation, "connection torn down");
    }

    pub fn subscribe(&mut self, channel: &str, user: &str) -> Result<bool> {
        self.registry.subscribe(channel, user)
    }

    pub fn unsubscribe(&mut self, channel: &str, user: &str) -> Result<bool> {
        self.registry.unsubscribe(channel, user)
    }

    pub(crate) fn emit(&mut self, event: Event) {
        self.outbox.push_back(Output::Event(event));
    }

    pub(crate) fn push(&mut self, output: Output) {
        self.outbox.push_back(output);
    }

    fn fail(&mut self, reason: String) {
        if self.failed.is_none() {
            self.failed = Some(reason);
        }
    }

    /// Next pending output.
    pub fn poll_output(&mut self) -> Option<Output> {
        self.outbox.pop_front()
    }

    /// Reason the connection must be replaced, if it failed.
    pub fn needs_restart(&self) -> Option<&str> {
        self.failed.as_deref()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn registry(&self) -> &ChannelRegistry {
        &self.registry
    }

    pub fn bonds(&self) -> &BondRegistry {
        &self.bonds
    }

    pub fn heartbeat(&self) -> &HeartbeatScheduler {
        &self.heartbeat
    }

    /// Sequence number the next outbound envelope will carry.
    pub fn next_seq(&self) -> u64 {
        self.encoder.next_seq()
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.heartbeat.next_deadline()
    }
}
