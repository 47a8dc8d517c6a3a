use serde_json::{Map, Value};

use crate::record::Record;

/// Label recorded when a row has more values than its bond has labels.
pub const MISSING_LABEL: &str = "FAILED";

/// A call-leg routing rule: labels starting with `prefix` go into the `leg`
/// sub-object under the remainder of the label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LegRule {
    pub prefix: &'static str,
    pub leg: &'static str,
}

/// The two-leg call convention.
pub const LEG_RULES: &[LegRule] = &[
    LegRule {
        prefix: "a_",
        leg: "aleg",
    },
    LegRule {
        prefix: "b_",
        leg: "bleg",
    },
];

fn leg_for(label: &str) -> Option<(&'static str, &str)> {
    LEG_RULES.iter().find_map(|rule| {
        label
            .strip_prefix(rule.prefix)
            .map(|remainder| (rule.leg, remainder))
    })
}

/// Map a positional row onto named fields.
///
/// Values beyond the end of `labels` are recorded under [`MISSING_LABEL`].
/// When `row_id` is present the record gains a string `id` of `row_id + 1`;
/// a `row_id` of `u64::MAX` has no such id and is left without one.
pub fn format_row(labels: &[String], row: &[Value], row_id: Option<u64>, action: &str) -> Record {
    let mut data = Map::new();
    let mut call = Map::new();
    let mut legs: Vec<(&'static str, Map<String, Value>)> =
        LEG_RULES.iter().map(|rule| (rule.leg, Map::new())).collect();

    for (position, value) in row.iter().enumerate() {
        let label = labels
            .get(position)
            .map(String::as_str)
            .unwrap_or(MISSING_LABEL);

        match leg_for(label) {
            Some((leg, remainder)) => {
                if let Some((_, fields)) = legs.iter_mut().find(|(name, _)| *name == leg) {
                    fields.insert(remainder.to_string(), value.clone());
                }
            }
            None => {
                call.insert(label.to_string(), value.clone());
            }
        }
        data.insert(label.to_string(), value.clone());
    }

    for (leg, fields) in legs {
        call.insert(leg.to_string(), Value::Object(fields));
    }

    if let Some(id) = row_id.and_then(|row_id| row_id.checked_add(1)) {
        data.insert("id".to_string(), Value::String(id.to_string()));
    }

    Record {
        action: action.to_string(),
        row_id,
        data,
        call,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn labels(names: &[&str]) -> Vec<String> {
        names.iter().map(|name| name.to_string()).collect()
    }

    #[test]
    fn legs_are_hoisted() {
        let record = format_row(
            &labels(&["a_id", "b_id", "status"]),
            &[json!(1), json!(2), json!("up")],
            Some(1),
            "add",
        );

        assert_eq!(
            Value::Object(record.data.clone()),
            json!({ "a_id": 1, "b_id": 2, "status": "up", "id": "2" })
        );
        assert_eq!(
            Value::Object(record.call.clone()),
            json!({ "aleg": { "id": 1 }, "bleg": { "id": 2 }, "status": "up" })
        );
    }

    #[test]
    fn id_only_derived_from_row_id() {
        let record = format_row(&labels(&["status"]), &[json!("up")], None, "add");
        assert!(record.id().is_none());
        assert!(!record.data.contains_key("id"));
    }

    #[test]
    fn last_row_id_gets_no_id() {
        let record = format_row(&labels(&["status"]), &[json!("up")], Some(u64::MAX), "add");
        assert_eq!(record.row_id, Some(u64::MAX));
        assert!(!record.data.contains_key("id"));
    }

    #[test]
    fn extra_values_use_missing_label() {
        let record = format_row(&labels(&["status"]), &[json!("up"), json!(99)], None, "add");
        assert_eq!(record.data["FAILED"], json!(99));
        assert_eq!(record.call["FAILED"], json!(99));
    }

    #[test]
    fn prefix_must_be_exact() {
        let record = format_row(
            &labels(&["A_id", "ab_id", "c_id"]),
            &[json!(1), json!(2), json!(3)],
            None,
            "add",
        );
        assert_eq!(record.aleg().unwrap().len(), 0);
        assert_eq!(record.bleg().unwrap().len(), 0);
        assert_eq!(record.call["A_id"], json!(1));
        assert_eq!(record.call["ab_id"], json!(2));
        assert_eq!(record.call["c_id"], json!(3));
    }

    #[test]
    fn short_row_leaves_later_labels_unset() {
        let record = format_row(&labels(&["a_uuid", "b_uuid", "state"]), &[json!("u1")], Some(0), "modify");
        assert_eq!(record.aleg().unwrap()["uuid"], json!("u1"));
        assert!(!record.data.contains_key("state"));
        assert_eq!(record.id(), Some("1"));
        assert_eq!(record.action, "modify");
    }
}
