use std::collections::BTreeMap;

use livechan_codec::Action;
use livechan_schema::Record;
use serde_json::Value;
use tracing::{debug, warn};

/// Largest run of `null` padding an add or modify beyond the end may create.
pub const MAX_ROW_GAP: usize = 1024;

/// Materialized records of one channel, indexed by row id.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LiveChannelCache {
    pub records: Vec<Value>,
    pub ready: bool,
}

/// Result of applying one ready snapshot or delivered record.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheOutcome {
    /// Snapshot applied; the full collection.
    Ready(Vec<Value>),
    Created { row_id: u64 },
    Updated { row_id: u64 },
    Deleted { row_id: u64, data: Value },
    Cleared,
    /// Not applied; reported but harmless.
    Ignored(String),
    /// The connection must be torn down and reopened.
    Restart(String),
}

/// Per-channel record collections for every watched channel.
#[derive(Debug, Clone, Default)]
pub struct LiveCache {
    channels: BTreeMap<String, LiveChannelCache>,
}

impl LiveCache {
    pub fn new<I, S>(channels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            channels: channels
                .into_iter()
                .map(|name| (name.into(), LiveChannelCache::default()))
                .collect(),
        }
    }

    pub fn is_watched(&self, channel: &str) -> bool {
        self.channels.contains_key(channel)
    }

    /// Empty every collection and mark every channel not ready.
    pub fn reset(&mut self) {
        for cache in self.channels.values_mut() {
            *cache = LiveChannelCache::default();
        }
        debug!(channels = self.channels.len(), "live cache reset");
    }

    /// Replace a channel's collection with a bootstrap snapshot.
    ///
    /// A second snapshot on a ready channel means the upstream connection
    /// lost track of it.
    pub fn apply_ready(&mut self, channel: &str, records: &[Record]) -> CacheOutcome {
        let Some(cache) = self.channels.get_mut(channel) else {
            return CacheOutcome::Ignored(format!("channel '{channel}' is not watched"));
        };
        if cache.ready {
            warn!(channel, "second bootstrap on ready channel");
            return CacheOutcome::Restart(format!("second bootstrap on ready channel '{channel}'"));
        }
        cache.records = records.iter().map(Record::data_value).collect();
        cache.ready = true;
        CacheOutcome::Ready(cache.records.clone())
    }

    /// Apply one incremental record.
    pub fn apply(&mut self, channel: &str, record: &Record) -> CacheOutcome {
        let Some(cache) = self.channels.get_mut(channel) else {
            return CacheOutcome::Ignored(format!("channel '{channel}' is not watched"));
        };

        let action = Action::parse(Some(record.action.as_str()));
        if action.is_bootstrap() {
            if cache.ready {
                warn!(channel, "bootstrap action on ready channel");
                return CacheOutcome::Restart(format!(
                    "bootstrap action on ready channel '{channel}'"
                ));
            }
            return CacheOutcome::Ignored(format!("'{action}' outside of a snapshot"));
        }
        if action == Action::Clear {
            cache.records.clear();
            return CacheOutcome::Cleared;
        }

        let Some(row_id) = record.row_id else {
            return CacheOutcome::Ignored(format!("'{action}' without row_id"));
        };
        let Ok(index) = usize::try_from(row_id) else {
            return CacheOutcome::Ignored(format!("row_id {row_id} out of range"));
        };

        match &action {
            Action::Add | Action::Modify => {
                if index - index.min(cache.records.len()) > MAX_ROW_GAP {
                    warn!(channel, row_id, rows = cache.records.len(), "row_id too far beyond end");
                    return CacheOutcome::Ignored(format!(
                        "row_id {row_id} is more than {MAX_ROW_GAP} rows past the end"
                    ));
                }
                if index >= cache.records.len() {
                    cache.records.resize(index + 1, Value::Null);
                }
                cache.records[index] = record.data_value();
                if action == Action::Add {
                    CacheOutcome::Created { row_id }
                } else {
                    CacheOutcome::Updated { row_id }
                }
            }
            Action::Del => {
                if index < cache.records.len() {
                    let data = cache.records.remove(index);
                    CacheOutcome::Deleted { row_id, data }
                } else {
                    CacheOutcome::Ignored(format!("del of missing row {row_id}"))
                }
            }
            other => CacheOutcome::Ignored(format!("unknown action '{other}'")),
        }
    }

    /// Empty one channel's collection. Readiness is kept.
    pub fn clear(&mut self, channel: &str) -> CacheOutcome {
        match self.channels.get_mut(channel) {
            Some(cache) => {
                cache.records.clear();
                CacheOutcome::Cleared
            }
            None => CacheOutcome::Ignored(format!("channel '{channel}' is not watched")),
        }
    }

    pub fn snapshot(&self, channel: &str) -> Option<&[Value]> {
        self.channels
            .get(channel)
            .map(|cache| cache.records.as_slice())
    }

    pub fn is_ready(&self, channel: &str) -> bool {
        self.channels.get(channel).is_some_and(|cache| cache.ready)
    }

    pub fn channel(&self, channel: &str) -> Option<&LiveChannelCache> {
        self.channels.get(channel)
    }
}

#[cfg(test)]
mod tests {
    use livechan_schema::format_row;
    use serde_json::json;

    use super::*;

    fn labels() -> Vec<String> {
        vec!["a_id".to_string(), "status".to_string()]
    }

    fn record(row: Value, row_id: Option<u64>, action: &str) -> Record {
        let values = row.as_array().cloned().unwrap_or_default();
        format_row(&labels(), &values, row_id, action)
    }

    fn ready_cache() -> LiveCache {
        let mut cache = LiveCache::new(["calls"]);
        let snapshot = [
            record(json!([1, "up"]), Some(0), "bootstrap_data"),
            record(json!([2, "up"]), Some(1), "bootstrap_data"),
        ];
        assert!(matches!(cache.apply_ready("calls", &snapshot), CacheOutcome::Ready(rows) if rows.len() == 2));
        cache
    }

    #[test]
    fn modify_overwrites_only_its_row() {
        let mut cache = ready_cache();
        let outcome = cache.apply("calls", &record(json!([2, "down"]), Some(1), "modify"));

        assert_eq!(outcome, CacheOutcome::Updated { row_id: 1 });
        let rows = cache.snapshot("calls").unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["status"], "up");
        assert_eq!(rows[1]["status"], "down");
    }

    #[test]
    fn del_shifts_later_rows() {
        let mut cache = ready_cache();
        let outcome = cache.apply("calls", &record(json!([]), Some(0), "del"));

        assert!(matches!(outcome, CacheOutcome::Deleted { row_id: 0, data } if data["a_id"] == 1));
        let rows = cache.snapshot("calls").unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["a_id"], 2);
    }

    #[test]
    fn add_beyond_end_pads_with_null() {
        let mut cache = ready_cache();
        let outcome = cache.apply("calls", &record(json!([9, "ringing"]), Some(3), "add"));

        assert_eq!(outcome, CacheOutcome::Created { row_id: 3 });
        let rows = cache.snapshot("calls").unwrap();
        assert_eq!(rows.len(), 4);
        assert!(rows[2].is_null());
        assert_eq!(rows[3]["id"], "4");
    }

    #[test]
    fn far_row_id_is_ignored() {
        let mut cache = ready_cache();
        let far = 2 + MAX_ROW_GAP as u64 + 1;
        let outcome = cache.apply("calls", &record(json!([9, "ringing"]), Some(far), "add"));
        assert!(matches!(outcome, CacheOutcome::Ignored(reason) if reason.contains("past the end")));

        let outcome = cache.apply("calls", &record(json!([9, "ringing"]), Some(1 << 33), "modify"));
        assert!(matches!(outcome, CacheOutcome::Ignored(_)));
        let outcome = cache.apply("calls", &record(json!([9, "ringing"]), Some(u64::MAX), "add"));
        assert!(matches!(outcome, CacheOutcome::Ignored(_)));
        assert_eq!(cache.snapshot("calls").unwrap().len(), 2);

        let edge = 2 + MAX_ROW_GAP as u64;
        let outcome = cache.apply("calls", &record(json!([9, "ringing"]), Some(edge), "add"));
        assert_eq!(outcome, CacheOutcome::Created { row_id: edge });
        assert_eq!(cache.snapshot("calls").unwrap().len(), 2 + MAX_ROW_GAP + 1);
    }

    #[test]
    fn second_snapshot_requests_restart() {
        let mut cache = ready_cache();
        assert!(matches!(cache.apply_ready("calls", &[]), CacheOutcome::Restart(_)));
        assert!(matches!(
            cache.apply("calls", &record(json!([]), None, "bootstrap_data")),
            CacheOutcome::Restart(_)
        ));
    }

    #[test]
    fn unknown_action_is_ignored() {
        let mut cache = ready_cache();
        let outcome = cache.apply("calls", &record(json!([1]), Some(0), "rename"));
        assert!(matches!(outcome, CacheOutcome::Ignored(reason) if reason.contains("rename")));
        assert_eq!(cache.snapshot("calls").unwrap().len(), 2);
    }

    #[test]
    fn missing_row_id_is_ignored() {
        let mut cache = ready_cache();
        assert!(matches!(
            cache.apply("calls", &record(json!([1, "x"]), None, "add")),
            CacheOutcome::Ignored(_)
        ));
    }

    #[test]
    fn clear_keeps_readiness() {
        let mut cache = ready_cache();
        assert_eq!(cache.clear("calls"), CacheOutcome::Cleared);
        assert!(cache.snapshot("calls").unwrap().is_empty());
        assert!(cache.is_ready("calls"));
    }

    #[test]
    fn reset_returns_every_channel_to_empty() {
        let mut cache = ready_cache();
        cache.reset();
        assert_eq!(cache.channel("calls"), Some(&LiveChannelCache::default()));
        assert!(!cache.is_ready("calls"));
    }

    #[test]
    fn unwatched_channel_is_ignored() {
        let mut cache = LiveCache::new(["calls"]);
        assert!(!cache.is_watched("queues"));
        assert!(matches!(cache.apply_ready("queues", &[]), CacheOutcome::Ignored(_)));
        assert!(matches!(cache.clear("queues"), CacheOutcome::Ignored(_)));
    }
}
