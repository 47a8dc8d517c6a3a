use std::collections::BTreeMap;
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use livechan_codec::{normalize_channel, QueryDefaults};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::error::{EngineError, Result};
use crate::registry::ChannelKind;

/// Per-environment connection settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentConfig {
    /// Server address handed to the transport.
    pub host: String,
}

/// Channel groups as they appear in configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelSetConfig {
    #[serde(default)]
    pub join_only: Vec<String>,
    #[serde(default)]
    pub join_and_bootstrap: Vec<String>,
}

/// Heartbeat cadence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeartbeatConfig {
    pub beat_interval_ms: u64,
    pub health_check_interval_ms: u64,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            beat_interval_ms: 5_000,
            health_check_interval_ms: 30_000,
        }
    }
}

impl HeartbeatConfig {
    pub fn beat_interval(&self) -> Duration {
        Duration::from_millis(self.beat_interval_ms)
    }

    pub fn health_check_interval(&self) -> Duration {
        Duration::from_millis(self.health_check_interval_ms)
    }
}

/// What to do after a connection closes.
///
/// The default reconnects immediately and forever.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectPolicy {
    /// Delay before the replacement connection is forged.
    pub delay_ms: u64,
    /// Give up after this many consecutive reconnects without a successful
    /// authentication. `None` never gives up.
    pub max_attempts: Option<u32>,
}

impl ReconnectPolicy {
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }
}

/// Engine configuration loaded at start-up.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Active environment name; must be a key of `environments`.
    pub environment: String,
    #[serde(default)]
    pub environments: BTreeMap<String, EnvironmentConfig>,
    #[serde(default)]
    pub channel_sets: ChannelSetConfig,
    /// Session id from the previous successful authentication.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stored_session_id: Option<String>,
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,
    #[serde(default)]
    pub query: QueryDefaults,
    #[serde(default)]
    pub reconnect: ReconnectPolicy,
}

impl fmt::Debug for EngineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut dbg = f.debug_struct("EngineConfig");
        dbg.field("environment", &self.environment)
            .field("environments", &self.environments)
            .field("channel_sets", &self.channel_sets);
        if let Some(id) = &self.stored_session_id {
            dbg.field(
                "stored_session_id",
                &format_args!("<redacted:{} bytes>", id.len()),
            );
        } else {
            dbg.field("stored_session_id", &Option::<String>::None);
        }
        dbg.field("heartbeat", &self.heartbeat)
            .field("query", &self.query)
            .field("reconnect", &self.reconnect)
            .finish()
    }
}

impl EngineConfig {
    /// Parse a configuration from JSON text.
    pub fn from_json(text: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Check everything the engine relies on at start-up.
    pub fn validate(&self) -> Result<()> {
        self.server_address()?;
        self.channel_set()?;
        if self.heartbeat.beat_interval_ms == 0 || self.heartbeat.health_check_interval_ms == 0 {
            return Err(EngineError::Config(
                "heartbeat intervals must be non-zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Host of the active environment.
    pub fn server_address(&self) -> Result<&str> {
        self.environments
            .get(&self.environment)
            .map(|env| env.host.as_str())
            .ok_or_else(|| {
                EngineError::Config(format!("unknown environment '{}'", self.environment))
            })
    }

    /// Validated, case-normalized channel groups.
    pub fn channel_set(&self) -> Result<ChannelSet> {
        ChannelSet::new(
            &self.channel_sets.join_only,
            &self.channel_sets.join_and_bootstrap,
        )
    }
}

/// The two disjoint channel groups, fixed for the life of the process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChannelSet {
    join_only: Vec<String>,
    join_and_bootstrap: Vec<String>,
}

impl ChannelSet {
    /// Normalize both groups, dropping duplicates while keeping order.
    ///
    /// A name present in both groups is rejected.
    pub fn new<S: AsRef<str>>(join_only: &[S], join_and_bootstrap: &[S]) -> Result<Self> {
        let join_only = dedup(join_only)?;
        let join_and_bootstrap = dedup(join_and_bootstrap)?;

        let bootstrap: HashSet<&str> = join_and_bootstrap.iter().map(String::as_str).collect();
        if let Some(shared) = join_only.iter().find(|name| bootstrap.contains(name.as_str())) {
            return Err(EngineError::Config(format!(
                "channel '{shared}' is in both the join-only and join-and-bootstrap groups"
            )));
        }

        Ok(Self {
            join_only,
            join_and_bootstrap,
        })
    }

    pub fn join_only(&self) -> &[String] {
        &self.join_only
    }

    pub fn join_and_bootstrap(&self) -> &[String] {
        &self.join_and_bootstrap
    }

    /// Every channel with its kind, join-only group first.
    pub fn iter(&self) -> impl Iterator<Item = (&str, ChannelKind)> {
        self.join_only
            .iter()
            .map(|name| (name.as_str(), ChannelKind::JoinOnly))
            .chain(
                self.join_and_bootstrap
                    .iter()
                    .map(|name| (name.as_str(), ChannelKind::Bootstrap)),
            )
    }

    pub fn kind_of(&self, name: &str) -> Option<ChannelKind> {
        self.iter()
            .find(|(candidate, _)| *candidate == name)
            .map(|(_, kind)| kind)
    }

    pub fn len(&self) -> usize {
        self.join_only.len() + self.join_and_bootstrap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn dedup<S: AsRef<str>>(names: &[S]) -> Result<Vec<String>> {
    let mut seen = HashSet::with_capacity(names.len());
    let mut out = Vec::with_capacity(names.len());
    for name in names {
        let name = normalize_channel(name.as_ref());
        if name.is_empty() {
            return Err(EngineError::Config("empty channel name".to_string()));
        }
        if seen.insert(name.clone()) {
            out.push(name);
        }
    }
    Ok(out)
}

/// Persisted configuration collaborator.
pub trait ConfigStore: Send {
    /// Load the configuration.
    fn load(&self) -> Result<EngineConfig>;

    /// Persist the session id obtained by the latest authentication.
    fn persist_session_id(&mut self, session_id: &str) -> Result<()>;
}

/// JSON file on disk.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_value(&self) -> Result<Value> {
        let text = std::fs::read_to_string(&self.path).map_err(|err| {
            EngineError::Config(format!("failed reading {}: {err}", self.path.display()))
        })?;
        Ok(serde_json::from_str(&text)?)
    }
}

impl ConfigStore for JsonFileStore {
    fn load(&self) -> Result<EngineConfig> {
        let value = self.read_value()?;
        let config: EngineConfig = serde_json::from_value(value)?;
        config.validate()?;
        debug!(path = %self.path.display(), "configuration loaded");
        Ok(config)
    }

    fn persist_session_id(&mut self, session_id: &str) -> Result<()> {
        let mut value = self.read_value()?;
        let object = value.as_object_mut().ok_or_else(|| {
            EngineError::Config(format!("{} is not a JSON object", self.path.display()))
        })?;
        object.insert(
            "stored_session_id".to_string(),
            Value::String(session_id.to_string()),
        );
        let text = serde_json::to_string_pretty(&value)?;
        std::fs::write(&self.path, text)?;
        info!(path = %self.path.display(), "session id persisted");
        Ok(())
    }
}

/// In-memory store; records every persisted session id.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    config: EngineConfig,
    persisted: Vec<String>,
}

impl MemoryStore {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            persisted: Vec::new(),
        }
    }

    /// Session ids persisted so far, oldest first.
    pub fn persisted(&self) -> &[String] {
        &self.persisted
    }
}

impl ConfigStore for MemoryStore {
    fn load(&self) -> Result<EngineConfig> {
        self.config.validate()?;
        Ok(self.config.clone())
    }

    fn persist_session_id(&mut self, session_id: &str) -> Result<()> {
        self.config.stored_session_id = Some(session_id.to_string());
        self.persisted.push(session_id.to_string());
        Ok(())
    }
}
