use std::collections::{BTreeMap, BTreeSet, HashMap};

use tracing::debug;

use crate::config::ChannelSet;
use crate::error::{EngineError, Result};

/// Channel group membership.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelKind {
    /// Done as soon as it is joined.
    JoinOnly,
    /// Needs a boot message, a schema and a snapshot before it is done.
    Bootstrap,
}

/// Lifecycle phase of one channel. Phases only move forward until a reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ChannelPhase {
    Created,
    Joined,
    SchemaReceived,
    SnapshotReceived,
    Done,
}

/// Per-channel lifecycle state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelState {
    pub kind: ChannelKind,
    pub phase: ChannelPhase,
    /// Whether the boot message went out. Join-only channels never send one.
    pub boot_sent: bool,
    pub heartbeat_seq: u64,
    pub health_check_seq: u64,
    pub subscribed_users: BTreeSet<String>,
    /// Set by the per-batch clear rule; an `init` on such a channel triggers
    /// an empty bootstrap.
    pub no_calls: bool,
}

impl ChannelState {
    pub fn new(kind: ChannelKind) -> Self {
        Self {
            kind,
            phase: ChannelPhase::Created,
            boot_sent: kind == ChannelKind::JoinOnly,
            heartbeat_seq: 0,
            health_check_seq: 0,
            subscribed_users: BTreeSet::new(),
            no_calls: false,
        }
    }

    pub fn is_done(&self) -> bool {
        self.phase == ChannelPhase::Done
    }

    pub fn is_joined(&self) -> bool {
        self.phase >= ChannelPhase::Joined
    }

    fn advance(&mut self, phase: ChannelPhase) {
        if phase > self.phase {
            self.phase = phase;
        }
    }
}

/// Result of [`ChannelRegistry::lock`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockOutcome {
    Locked,
    AlreadyLocked,
    /// Bootstrap channel whose boot message has not been sent; nothing changed.
    BootingInProgress,
}

/// Every configured channel's lifecycle state, owned by one connection.
#[derive(Debug, Clone)]
pub struct ChannelRegistry {
    set: ChannelSet,
    states: HashMap<String, ChannelState>,
}

impl ChannelRegistry {
    pub fn new(set: ChannelSet) -> Self {
        let states = set
            .iter()
            .map(|(name, kind)| (name.to_string(), ChannelState::new(kind)))
            .collect();
        Self { set, states }
    }

    pub fn channel_set(&self) -> &ChannelSet {
        &self.set
    }

    pub fn contains(&self, channel: &str) -> bool {
        self.states.contains_key(channel)
    }

    pub fn get(&self, channel: &str) -> Result<&ChannelState> {
        self.states
            .get(channel)
            .ok_or_else(|| EngineError::UnknownChannel(channel.to_string()))
    }

    pub fn get_mut(&mut self, channel: &str) -> Result<&mut ChannelState> {
        self.states
            .get_mut(channel)
            .ok_or_else(|| EngineError::UnknownChannel(channel.to_string()))
    }

    /// Join-only group in configured order.
    pub fn join_only(&self) -> &[String] {
        self.set.join_only()
    }

    /// Join-and-bootstrap group in configured order.
    pub fn bootstrap(&self) -> &[String] {
        self.set.join_and_bootstrap()
    }

    pub fn is_done(&self, channel: &str) -> bool {
        self.states.get(channel).is_some_and(ChannelState::is_done)
    }

    /// Channels not joined yet, in configured order.
    pub fn unjoined(&self) -> Vec<String> {
        self.set
            .iter()
            .filter(|(name, _)| !self.states.get(*name).is_some_and(ChannelState::is_joined))
            .map(|(name, _)| name.to_string())
            .collect()
    }

    /// Record a join acknowledgement. Returns the channel kind.
    pub fn mark_joined(&mut self, channel: &str) -> Result<ChannelKind> {
        let state = self.get_mut(channel)?;
        state.advance(ChannelPhase::Joined);
        Ok(state.kind)
    }

    /// Record that the boot message was sent. Returns false when it already was.
    pub fn mark_boot_sent(&mut self, channel: &str) -> Result<bool> {
        let state = self.get_mut(channel)?;
        if state.boot_sent {
            return Ok(false);
        }
        state.boot_sent = true;
        Ok(true)
    }

    /// True when every bootstrap channel has sent its boot message.
    pub fn all_booted(&self) -> bool {
        self.bootstrap()
            .iter()
            .all(|name| self.states.get(name).is_some_and(|state| state.boot_sent))
    }

    pub fn mark_schema_received(&mut self, channel: &str) -> Result<()> {
        self.get_mut(channel)?.advance(ChannelPhase::SchemaReceived);
        Ok(())
    }

    pub fn mark_snapshot_received(&mut self, channel: &str) -> Result<()> {
        self.get_mut(channel)?.advance(ChannelPhase::SnapshotReceived);
        Ok(())
    }

    /// Move a channel to done.
    pub fn lock(&mut self, channel: &str) -> Result<LockOutcome> {
        let state = self.get_mut(channel)?;
        if state.is_done() {
            return Ok(LockOutcome::AlreadyLocked);
        }
        if !state.boot_sent {
            debug!(channel, "lock deferred: boot not sent");
            return Ok(LockOutcome::BootingInProgress);
        }
        state.phase = ChannelPhase::Done;
        debug!(channel, "channel locked");
        Ok(LockOutcome::Locked)
    }

    /// Return a channel to its freshly created form. Subscribers are kept.
    pub fn reset(&mut self, channel: &str) -> Result<()> {
        let state = self.get_mut(channel)?;
        let subscribed_users = std::mem::take(&mut state.subscribed_users);
        *state = ChannelState {
            subscribed_users,
            ..ChannelState::new(state.kind)
        };
        Ok(())
    }

    pub fn next_heartbeat_seq(&mut self, channel: &str) -> Result<u64> {
        let state = self.get_mut(channel)?;
        state.heartbeat_seq += 1;
        Ok(state.heartbeat_seq)
    }

    pub fn next_health_check_seq(&mut self, channel: &str) -> Result<u64> {
        let state = self.get_mut(channel)?;
        state.health_check_seq += 1;
        Ok(state.health_check_seq)
    }

    pub fn set_no_calls(&mut self, channel: &str, no_calls: bool) -> Result<()> {
        self.get_mut(channel)?.no_calls = no_calls;
        Ok(())
    }

    pub fn no_calls(&self, channel: &str) -> bool {
        self.states.get(channel).is_some_and(|state| state.no_calls)
    }

    /// Add a subscriber. Returns false if it was already subscribed.
    pub fn subscribe(&mut self, channel: &str, user: &str) -> Result<bool> {
        Ok(self.get_mut(channel)?.subscribed_users.insert(user.to_string()))
    }

    /// Remove a subscriber. Returns false if it was not subscribed.
    pub fn unsubscribe(&mut self, channel: &str, user: &str) -> Result<bool> {
        Ok(self.get_mut(channel)?.subscribed_users.remove(user))
    }

    /// Carry subscribers over from a previous connection.
    pub fn restore_subscriptions(&mut self, subscriptions: BTreeMap<String, BTreeSet<String>>) {
        for (channel, users) in subscriptions {
            if let Some(state) = self.states.get_mut(&channel) {
                state.subscribed_users.extend(users);
            }
        }
    }
}
