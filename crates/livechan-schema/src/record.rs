use serde::Serialize;
use serde_json::{Map, Value};

/// A formatted row.
///
/// `data` holds every value under its literal label plus the derived `id`.
/// `call` holds the same values reshaped: leg-prefixed labels are hoisted into
/// the `aleg`/`bleg` sub-objects, everything else sits at the top level.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Record {
    pub action: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub row_id: Option<u64>,
    pub data: Map<String, Value>,
    pub call: Map<String, Value>,
}

impl Record {
    /// The derived `id` (`row_id + 1`), if a row id was present.
    pub fn id(&self) -> Option<&str> {
        self.data.get("id").and_then(Value::as_str)
    }

    /// The `aleg` sub-object of the call view.
    pub fn aleg(&self) -> Option<&Map<String, Value>> {
        self.call.get("aleg").and_then(Value::as_object)
    }

    /// The `bleg` sub-object of the call view.
    pub fn bleg(&self) -> Option<&Map<String, Value>> {
        self.call.get("bleg").and_then(Value::as_object)
    }

    /// The flat data payload as a JSON object.
    pub fn data_value(&self) -> Value {
        Value::Object(self.data.clone())
    }
}
