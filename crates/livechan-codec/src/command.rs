//! Command names and channel actions.
//!
//! Command names double as reserved labels: an inbound message whose raw
//! label is one of them is a control message and never reaches the cache.

use serde::{Deserialize, Serialize};

/// Outbound/inbound command names carried in the `cmd` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CommandName {
    /// Authenticate the socket with a session token.
    Connect,
    /// Join a group of channels.
    Join,
    /// Channel-scoped query (bootstrap request, heartbeat).
    Broadcast,
    /// Session health check.
    Check,
}

impl CommandName {
    pub const ALL: [CommandName; 4] = [
        CommandName::Connect,
        CommandName::Join,
        CommandName::Broadcast,
        CommandName::Check,
    ];

    /// Wire spelling of the command.
    pub fn as_str(self) -> &'static str {
        match self {
            CommandName::Connect => "CONNECT",
            CommandName::Join => "JOIN",
            CommandName::Broadcast => "BROADCAST",
            CommandName::Check => "CHECK",
        }
    }

    /// Parse a raw label, ignoring ASCII case.
    pub fn parse(label: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|name| name.as_str().eq_ignore_ascii_case(label))
    }
}

/// Returns true if `label` is a reserved command name.
pub fn is_reserved(label: &str) -> bool {
    CommandName::parse(label).is_some()
}

/// Channel action carried in the `action` field of an inbound message.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Action {
    /// Schema (bond) delivery.
    Init,
    /// Full snapshot delivery.
    BootstrapData,
    /// Terminal bootstrap marker; also the formatter's default label.
    Bootstrap,
    /// Reset the channel's record collection.
    Clear,
    Add,
    Modify,
    Del,
    /// Anything else, kept verbatim.
    Other(String),
}

impl Action {
    /// Label used when a message carries no action.
    pub const DEFAULT_LABEL: &'static str = "bootstrap";

    pub fn parse(raw: Option<&str>) -> Self {
        match raw.unwrap_or(Self::DEFAULT_LABEL) {
            "init" => Action::Init,
            "bootstrap_data" => Action::BootstrapData,
            "bootstrap" => Action::Bootstrap,
            "clear" => Action::Clear,
            "add" => Action::Add,
            "modify" => Action::Modify,
            "del" => Action::Del,
            other => Action::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Action::Init => "init",
            Action::BootstrapData => "bootstrap_data",
            Action::Bootstrap => "bootstrap",
            Action::Clear => "clear",
            Action::Add => "add",
            Action::Modify => "modify",
            Action::Del => "del",
            Action::Other(other) => other,
        }
    }

    /// Definitive actions require a resolvable channel.
    pub fn is_definitive(&self) -> bool {
        matches!(self, Action::Clear)
    }

    /// Both spellings of a snapshot delivery.
    pub fn is_bootstrap(&self) -> bool {
        matches!(self, Action::Bootstrap | Action::BootstrapData)
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
