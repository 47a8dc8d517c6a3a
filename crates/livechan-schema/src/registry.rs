use std::collections::HashMap;

use serde_json::Value;
use tracing::debug;

use crate::error::{FormatError, Result};
use crate::formatter::format_row;
use crate::record::Record;

/// Ordered column labels for one channel.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Bond {
    labels: Vec<String>,
}

impl Bond {
    pub fn new(labels: Vec<String>) -> Self {
        Self { labels }
    }

    /// Parse a bond from the `data` field of an `init` message.
    pub fn from_value(channel: &str, value: &Value) -> Result<Self> {
        let items = value.as_array().ok_or_else(|| FormatError::InvalidSchema {
            channel: channel.to_string(),
            reason: "expected an array of labels".to_string(),
        })?;

        let labels = items
            .iter()
            .enumerate()
            .map(|(position, item)| match item {
                Value::String(label) => Ok(label.clone()),
                other => Err(FormatError::InvalidSchema {
                    channel: channel.to_string(),
                    reason: format!("label at position {position} is not a string: {other}"),
                }),
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { labels })
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

/// Channel-keyed registry of bonds.
#[derive(Debug, Default)]
pub struct BondRegistry {
    bonds: HashMap<String, Bond>,
}

impl BondRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store the bond for a channel, replacing any previous one.
    pub fn register(&mut self, channel: &str, bond: Bond) {
        debug!(channel, columns = bond.len(), "schema registered");
        self.bonds.insert(channel.to_string(), bond);
    }

    /// Store a bond parsed from an `init` payload.
    pub fn register_value(&mut self, channel: &str, value: &Value) -> Result<()> {
        let bond = Bond::from_value(channel, value)?;
        self.register(channel, bond);
        Ok(())
    }

    /// Check if a channel has a bond.
    pub fn has_bond(&self, channel: &str) -> bool {
        self.bonds.contains_key(channel)
    }

    pub fn bond(&self, channel: &str) -> Option<&Bond> {
        self.bonds.get(channel)
    }

    /// Channels that have a bond, sorted.
    pub fn channels(&self) -> Vec<&str> {
        let mut channels: Vec<&str> = self.bonds.keys().map(String::as_str).collect();
        channels.sort_unstable();
        channels
    }

    /// Format a positional row for `channel`.
    ///
    /// Returns [`FormatError::NoSchema`] when the channel has no bond yet. Callers
    /// treat that as "not formattable" and skip the row.
    pub fn format(
        &self,
        channel: &str,
        row: &[Value],
        row_id: Option<u64>,
        action: &str,
    ) -> Result<Record> {
        let bond = self
            .bonds
            .get(channel)
            .ok_or_else(|| FormatError::NoSchema(channel.to_string()))?;
        if row_id == Some(u64::MAX) {
            return Err(FormatError::InvalidRow {
                channel: channel.to_string(),
                reason: format!("row_id {} has no successor id", u64::MAX),
            });
        }
        Ok(format_row(bond.labels(), row, row_id, action))
    }

    /// Format a row given as a JSON value. `null` is an empty row.
    pub fn format_value(
        &self,
        channel: &str,
        row: &Value,
        row_id: Option<u64>,
        action: &str,
    ) -> Result<Record> {
        match row {
            Value::Array(values) => self.format(channel, values, row_id, action),
            Value::Null => self.format(channel, &[], row_id, action),
            other => Err(FormatError::InvalidRow {
                channel: channel.to_string(),
                reason: format!("expected a positional array, found {other}"),
            }),
        }
    }
}
