use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::time::Instant;

use livechan_codec::normalize_channel;
use livechan_schema::Record;
use livechan_transport::{Connector, TransportEvent};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::cache::{CacheOutcome, LiveCache};
use crate::config::{ChannelSet, ConfigStore, EngineConfig};
use crate::connection::{Connection, Output};
use crate::error::{EngineError, Result};
use crate::event::Event;
use crate::session::{Authenticator, Credentials, Session};

/// Owns the live cache and the current connection, and replaces the
/// connection whenever it fails.
///
/// Single-threaded: feed transport events with [`handle`](Self::handle),
/// advance time with [`tick`](Self::tick) and drain [`Event`]s.
pub struct Synchronizer<C: Connector> {
    config: EngineConfig,
    channels: ChannelSet,
    connector: C,
    connection: Option<Connection<C::Transport>>,
    session: Session,
    cache: LiveCache,
    subscriptions: BTreeMap<String, BTreeSet<String>>,
    store: Option<Box<dyn ConfigStore>>,
    authenticator: Option<(Box<dyn Authenticator>, Credentials)>,
    events: VecDeque<Event>,
    generation: u64,
    attempts: u32,
    pending_reconnect: Option<Instant>,
    abandoned: bool,
    shut_down: bool,
}

impl<C: Connector> Synchronizer<C> {
    pub fn new(config: EngineConfig, connector: C) -> Result<Self> {
        config.validate()?;
        let channels = config.channel_set()?;
        let session = Session::from_config(&config)?;
        let cache = LiveCache::new(channels.iter().map(|(name, _)| name.to_string()));
        Ok(Self {
            config,
            channels,
            connector,
            connection: None,
            session,
            cache,
            subscriptions: BTreeMap::new(),
            store: None,
            authenticator: None,
            events: VecDeque::new(),
            generation: 0,
            attempts: 0,
            pending_reconnect: None,
            abandoned: false,
            shut_down: false,
        })
    }

    /// Load configuration from `store` and persist session ids back to it.
    pub fn from_store(store: impl ConfigStore + 'static, connector: C) -> Result<Self> {
        let config = store.load()?;
        Ok(Self::new(config, connector)?.with_store(store))
    }

    pub fn with_store(mut self, store: impl ConfigStore + 'static) -> Self {
        self.store = Some(Box::new(store));
        self
    }

    /// Used at start-up when no session id is stored, and on shutdown.
    pub fn with_authenticator(
        mut self,
        authenticator: impl Authenticator + 'static,
        credentials: Credentials,
    ) -> Self {
        self.authenticator = Some((Box::new(authenticator), credentials));
        self
    }

    /// Authenticate if needed and forge the first connection.
    pub fn start(&mut self, now: Instant) -> Result<()> {
        if self.session.session_id.is_none() {
            self.authenticate()?;
        }
        self.forge(now);
        Ok(())
    }

    fn authenticate(&mut self) -> Result<()> {
        let Some((authenticator, credentials)) = self.authenticator.as_mut() else {
            return Err(EngineError::Auth(
                "no stored session id and no authenticator".to_string(),
            ));
        };
        let grant = authenticator.open(credentials)?;
        info!(login = %credentials.login, "authenticated");
        self.session.update(&grant.session_id);
        self.persist_session();
        Ok(())
    }

    fn persist_session(&mut self) {
        let (Some(store), Some(session_id)) = (self.store.as_mut(), self.session.session_id()) else {
            return;
        };
        if let Err(err) = store.persist_session_id(session_id) {
            warn!(error = %err, "failed to persist session id");
            self.events.push_back(Event::error(err));
        }
    }

    /// Tear down the current connection, if any, and build a fresh one.
    fn forge(&mut self, now: Instant) {
        if let Some(mut old) = self.connection.take() {
            old.teardown();
        }
        self.generation += 1;
        let mut connection = Connection::new(
            self.generation,
            self.connector.transport(self.generation),
            self.session.clone(),
            self.channels.clone(),
            &self.config.heartbeat,
            self.config.query.clone(),
        );
        connection
            .registry
            .restore_subscriptions(self.subscriptions.clone());
        self.cache.reset();
        info!(generation = self.generation, "connection forged");
        self.events.push_back(Event::ConnectionForged {
            generation: self.generation,
        });

        let started = connection.start();
        self.connection = Some(connection);
        if let Err(err) = started {
            warn!(generation = self.generation, error = %err, "connect failed");
            let reason = err.to_string();
            self.events.push_back(Event::error(err));
            self.schedule_reconnect(now, &reason);
        }
    }

    /// Feed one transport notification from the socket of connection
    /// `generation`.
    ///
    /// Events from a socket the engine has already replaced are dropped, so a
    /// late close of a torn-down socket never restarts its successor.
    pub fn handle(&mut self, generation: u64, event: TransportEvent, now: Instant) {
        if self.shut_down || self.abandoned {
            return;
        }
        if generation != self.generation {
            debug!(
                generation,
                current = self.generation,
                ?event,
                "dropping event of a replaced connection"
            );
            return;
        }
        let Some(connection) = self.connection.as_mut() else {
            debug!(?event, "no live connection, dropping transport event");
            return;
        };
        connection.handle_event(event, now);
        self.pump(now);
        self.settle(now);
    }

    /// Advance time: forge a pending reconnect and fire due heartbeats.
    pub fn tick(&mut self, now: Instant) {
        if self.shut_down || self.abandoned {
            return;
        }
        self.settle(now);
        if let Some(connection) = self.connection.as_mut() {
            connection.tick(now);
            self.pump(now);
            self.settle(now);
        }
    }

    fn settle(&mut self, now: Instant) {
        if self.pending_reconnect.is_some_and(|due| due <= now) {
            self.pending_reconnect = None;
            self.forge(now);
        }
    }

    fn pump(&mut self, now: Instant) {
        let mut restart = None;
        while let Some(output) = self.connection.as_mut().and_then(Connection::poll_output) {
            if let Some(reason) = self.apply(output) {
                restart = Some(reason);
                break;
            }
        }
        let restart = restart.or_else(|| {
            self.connection
                .as_ref()
                .and_then(|connection| connection.needs_restart().map(str::to_string))
        });
        if let Some(reason) = restart {
            self.schedule_reconnect(now, &reason);
        }
    }

    /// Apply one connection output. Returns a restart reason when the
    /// connection has to be replaced.
    fn apply(&mut self, output: Output) -> Option<String> {
        match output {
            Output::Event(event) => {
                let authenticated = matches!(event, Event::Authenticated);
                self.events.push_back(event);
                if authenticated {
                    self.on_authenticated();
                }
                None
            }
            Output::ChannelReady { channel, records } => {
                let outcome = self.cache.apply_ready(&channel, &records);
                self.report(channel, None, outcome)
            }
            Output::Delivered { channel, record } => {
                let outcome = self.cache.apply(&channel, &record);
                self.report(channel, Some(record), outcome)
            }
            Output::Cleared { channel } => {
                let outcome = self.cache.clear(&channel);
                self.report(channel, None, outcome)
            }
        }
    }

    fn report(&mut self, channel: String, record: Option<Record>, outcome: CacheOutcome) -> Option<String> {
        let event = match (outcome, record) {
            (CacheOutcome::Ready(records), _) => Event::ChannelSnapshotReady { channel, records },
            (CacheOutcome::Created { row_id }, Some(record)) => Event::RecordCreated {
                channel,
                row_id,
                record,
            },
            (CacheOutcome::Updated { row_id }, Some(record)) => Event::RecordUpdated {
                channel,
                row_id,
                record,
            },
            (CacheOutcome::Deleted { row_id, data }, _) => Event::RecordDeleted {
                channel,
                row_id,
                data,
            },
            (CacheOutcome::Cleared, _) => Event::ChannelCleared { channel },
            (CacheOutcome::Ignored(reason), _) => {
                debug!(channel = %channel, reason = %reason, "record ignored");
                Event::RecordIgnored { channel, reason }
            }
            (CacheOutcome::Restart(reason), _) => {
                self.events.push_back(Event::error(EngineError::ProtocolViolation {
                    channel,
                    reason: reason.clone(),
                }));
                return Some(reason);
            }
            (CacheOutcome::Created { .. } | CacheOutcome::Updated { .. }, None) => return None,
        };
        self.events.push_back(event);
        None
    }

    fn on_authenticated(&mut self) {
        if let Some(connection) = &self.connection {
            self.session = connection.session().clone();
        }
        self.attempts = 0;
        self.persist_session();
    }

    /// Drop the current connection and plan its replacement.
    fn schedule_reconnect(&mut self, now: Instant, reason: &str) {
        if let Some(mut old) = self.connection.take() {
            old.teardown();
        }
        self.cache.reset();

        self.attempts += 1;
        if let Some(max_attempts) = self.config.reconnect.max_attempts {
            if self.attempts > max_attempts {
                warn!(attempts = max_attempts, reason, "giving up on reconnecting");
                self.abandoned = true;
                self.pending_reconnect = None;
                self.events.push_back(Event::ReconnectAbandoned {
                    attempts: max_attempts,
                });
                return;
            }
        }
        let delay = self.config.reconnect.delay();
        info!(attempt = self.attempts, ?delay, reason, "reconnect scheduled");
        self.pending_reconnect = Some(now + delay);
    }

    /// Add a subscriber to a configured channel.
    pub fn subscribe(&mut self, channel: &str, user: &str) -> Result<bool> {
        let channel = self.known_channel(channel)?;
        if let Some(connection) = self.connection.as_mut() {
            connection.subscribe(&channel, user)?;
        }
        Ok(self
            .subscriptions
            .entry(channel)
            .or_default()
            .insert(user.to_string()))
    }

    pub fn unsubscribe(&mut self, channel: &str, user: &str) -> Result<bool> {
        let channel = self.known_channel(channel)?;
        if let Some(connection) = self.connection.as_mut() {
            connection.unsubscribe(&channel, user)?;
        }
        let Some(users) = self.subscriptions.get_mut(&channel) else {
            return Ok(false);
        };
        let removed = users.remove(user);
        if users.is_empty() {
            self.subscriptions.remove(&channel);
        }
        Ok(removed)
    }

    fn known_channel(&self, channel: &str) -> Result<String> {
        let channel = normalize_channel(channel);
        match self.channels.kind_of(&channel) {
            Some(_) => Ok(channel),
            None => Err(EngineError::UnknownChannel(channel)),
        }
    }

    pub fn subscribers(&self, channel: &str) -> Option<&BTreeSet<String>> {
        self.subscriptions.get(&normalize_channel(channel))
    }

    /// Materialized records of a channel.
    pub fn snapshot(&self, channel: &str) -> Option<&[Value]> {
        self.cache.snapshot(&normalize_channel(channel))
    }

    pub fn is_ready(&self, channel: &str) -> bool {
        self.cache.is_ready(&normalize_channel(channel))
    }

    pub fn poll_event(&mut self) -> Option<Event> {
        self.events.pop_front()
    }

    pub fn drain_events(&mut self) -> Vec<Event> {
        self.events.drain(..).collect()
    }

    /// Tear everything down and end the session with the authenticator.
    pub fn shutdown(&mut self) -> Result<()> {
        if self.shut_down {
            return Ok(());
        }
        self.shut_down = true;
        self.pending_reconnect = None;
        if let Some(mut connection) = self.connection.take() {
            connection.teardown();
        }
        self.events.push_back(Event::ConnectionClosed {
            reason: Some("shutdown".to_string()),
        });

        if let (Some((authenticator, _)), Some(session_id)) =
            (self.authenticator.as_mut(), self.session.session_id())
        {
            let logged_out = authenticator.shut(session_id)?;
            info!(logged_out, "session shut");
        }
        Ok(())
    }

    /// When [`tick`](Self::tick) next has work to do.
    pub fn next_deadline(&self) -> Option<Instant> {
        let heartbeat = self
            .connection
            .as_ref()
            .and_then(Connection::next_deadline);
        match (self.pending_reconnect, heartbeat) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    pub fn connection(&self) -> Option<&Connection<C::Transport>> {
        self.connection.as_ref()
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn cache(&self) -> &LiveCache {
        &self.cache
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Normalized channel set the synchronizer was built with.
    pub fn channels(&self) -> &ChannelSet {
        &self.channels
    }

    /// Number of connections forged so far.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_abandoned(&self) -> bool {
        self.abandoned
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down
    }

    pub fn reconnect_pending(&self) -> bool {
        self.pending_reconnect.is_some()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use bytes::Bytes;
    use livechan_transport::{MemoryHandle, MemoryTransport};
    use serde_json::json;

    use super::*;
    use crate::config::ReconnectPolicy;
    use crate::session::AuthGrant;

    #[derive(Default, Clone)]
    struct Recorder {
        calls: Arc<Mutex<Vec<String>>>,
    }

    impl Recorder {
        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl ConfigStore for Recorder {
        fn load(&self) -> Result<EngineConfig> {
            Ok(config(None))
        }

        fn persist_session_id(&mut self, session_id: &str) -> Result<()> {
            self.calls.lock().unwrap().push(format!("persist:{session_id}"));
            Ok(())
        }
    }

    impl Authenticator for Recorder {
        fn open(&mut self, credentials: &Credentials) -> Result<AuthGrant> {
            self.calls.lock().unwrap().push(format!("open:{}", credentials.login));
            Ok(AuthGrant {
                session_id: "granted".to_string(),
                data: json!({}),
            })
        }

        fn shut(&mut self, session_id: &str) -> Result<bool> {
            self.calls.lock().unwrap().push(format!("shut:{session_id}"));
            Ok(true)
        }
    }

    fn config(session_id: Option<&str>) -> EngineConfig {
        let mut config: EngineConfig = serde_json::from_value(json!({
            "environment": "test",
            "environments": { "test": { "host": "wss://live.test" } },
            "channel_sets": { "join_only": ["presence"], "join_and_bootstrap": ["calls"] }
        }))
        .unwrap();
        config.stored_session_id = session_id.map(str::to_string);
        config
    }

    fn synchronizer(
        config: EngineConfig,
    ) -> (Synchronizer<impl Connector<Transport = MemoryTransport>>, MemoryHandle) {
        let (_, handle) = MemoryTransport::new();
        let source = handle.clone();
        let sync = Synchronizer::new(config, move || source.transport()).unwrap();
        (sync, handle)
    }

    fn close(sync: &mut Synchronizer<impl Connector<Transport = MemoryTransport>>, now: Instant) {
        let generation = sync.generation();
        sync.handle(generation, TransportEvent::Close { reason: None }, now);
    }

    #[test]
    fn start_without_session_or_authenticator_fails() {
        let (mut sync, _handle) = synchronizer(config(None));
        let err = sync.start(Instant::now()).unwrap_err();
        assert!(matches!(err, EngineError::Auth(_)));
        assert_eq!(sync.generation(), 0);
    }

    #[test]
    fn start_authenticates_and_persists_when_no_session_is_stored() {
        let recorder = Recorder::default();
        let (sync, handle) = synchronizer(config(None));
        let mut sync = sync
            .with_store(recorder.clone())
            .with_authenticator(recorder.clone(), Credentials::new("agent", "pw"));

        sync.start(Instant::now()).unwrap();
        assert_eq!(sync.session().session_id(), Some("granted"));
        assert_eq!(recorder.calls(), vec!["open:agent", "persist:granted"]);
        assert_eq!(handle.connects(), 1);
        assert!(matches!(
            sync.poll_event(),
            Some(Event::ConnectionForged { generation: 1 })
        ));
    }

    #[test]
    fn connect_ack_persists_server_session_id() {
        let recorder = Recorder::default();
        let (sync, _handle) = synchronizer(config(Some("stored")));
        let mut sync = sync.with_store(recorder.clone());
        let now = Instant::now();
        sync.start(now).unwrap();
        sync.handle(1, TransportEvent::Open, now);
        sync.handle(
            1,
            TransportEvent::Message(Bytes::from(
                json!([{ "cmd": "CONNECT", "sessid": "fresh" }]).to_string(),
            )),
            now,
        );

        assert_eq!(sync.session().session_id(), Some("fresh"));
        assert_eq!(recorder.calls(), vec!["persist:fresh"]);
    }

    #[test]
    fn close_reconnects_immediately_by_default() {
        let (mut sync, handle) = synchronizer(config(Some("stored")));
        let now = Instant::now();
        sync.start(now).unwrap();
        close(&mut sync, now);

        assert_eq!(sync.generation(), 2);
        assert_eq!(handle.connects(), 2);
        let names: Vec<&str> = sync.drain_events().iter().map(Event::name).collect();
        assert_eq!(
            names,
            vec!["connection_forged", "connection_closed", "connection_forged"]
        );
    }

    #[test]
    fn late_events_of_replaced_connection_are_dropped() {
        let (mut sync, handle) = synchronizer(config(Some("stored")));
        let now = Instant::now();
        sync.start(now).unwrap();
        close(&mut sync, now);
        assert_eq!(sync.generation(), 2);
        sync.drain_events();

        sync.handle(
            1,
            TransportEvent::Close {
                reason: Some("closed by client".into()),
            },
            now,
        );
        sync.handle(1, TransportEvent::Error("reset".into()), now);
        sync.handle(1, TransportEvent::Open, now);

        assert_eq!(sync.generation(), 2);
        assert_eq!(handle.connects(), 2);
        assert!(sync.drain_events().is_empty());
        assert!(handle.sent().is_empty());

        sync.handle(2, TransportEvent::Open, now);
        assert_eq!(handle.sent().len(), 1);
    }

    #[test]
    fn delayed_reconnect_waits_for_tick() {
        let mut config = config(Some("stored"));
        config.reconnect = ReconnectPolicy {
            delay_ms: 1_000,
            max_attempts: None,
        };
        let (mut sync, _handle) = synchronizer(config);
        let now = Instant::now();
        sync.start(now).unwrap();
        close(&mut sync, now);

        assert!(sync.reconnect_pending());
        assert!(sync.connection().is_none());
        assert_eq!(sync.next_deadline(), Some(now + Duration::from_secs(1)));

        sync.tick(now + Duration::from_millis(999));
        assert_eq!(sync.generation(), 1);
        sync.tick(now + Duration::from_secs(1));
        assert_eq!(sync.generation(), 2);
        assert!(!sync.reconnect_pending());
    }

    #[test]
    fn bounded_policy_abandons() {
        let mut config = config(Some("stored"));
        config.reconnect.max_attempts = Some(1);
        let (mut sync, _handle) = synchronizer(config);
        let now = Instant::now();
        sync.start(now).unwrap();
        close(&mut sync, now);
        close(&mut sync, now);

        assert!(sync.is_abandoned());
        assert_eq!(sync.generation(), 2);
        let events = sync.drain_events();
        assert!(matches!(
            events.last(),
            Some(Event::ReconnectAbandoned { attempts: 1 })
        ));

        // nothing happens after giving up
        sync.tick(now + Duration::from_secs(60));
        assert_eq!(sync.generation(), 2);
    }

    #[test]
    fn subscriptions_survive_reconnect() {
        let (mut sync, _handle) = synchronizer(config(Some("stored")));
        let now = Instant::now();
        sync.start(now).unwrap();
        assert!(sync.subscribe("Calls", "agent-7").unwrap());
        close(&mut sync, now);

        let registry = sync.connection().unwrap().registry();
        assert!(registry.get("calls").unwrap().subscribed_users.contains("agent-7"));
        assert!(sync.unsubscribe("calls", "agent-7").unwrap());
        assert!(sync.subscribers("calls").is_none());
    }

    #[test]
    fn subscribe_to_unknown_channel_fails() {
        let (mut sync, _handle) = synchronizer(config(Some("stored")));
        let err = sync.subscribe("ghost", "agent").unwrap_err();
        assert!(matches!(err, EngineError::UnknownChannel(name) if name == "ghost"));
    }

    #[test]
    fn shutdown_closes_and_shuts_session() {
        let recorder = Recorder::default();
        let (sync, handle) = synchronizer(config(Some("stored")));
        let mut sync = sync.with_authenticator(recorder.clone(), Credentials::new("a", "b"));
        let now = Instant::now();
        sync.start(now).unwrap();
        sync.shutdown().unwrap();
        sync.shutdown().unwrap();

        assert!(sync.is_shut_down());
        assert!(!handle.is_open());
        assert_eq!(recorder.calls(), vec!["shut:stored"]);

        // no reconnect after shutdown
        sync.handle(1, TransportEvent::Close { reason: None }, now);
        assert_eq!(sync.generation(), 1);
    }
}
