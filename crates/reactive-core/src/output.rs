//! The MIME-style `Output` bundle emitted by the executor and propagated unchanged
//! through the kernel, the coordinator, and the gateway.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

/// A single displayable result produced by a cell.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Output {
    pub mime_type: String,
    pub data: OutputData,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Map<String, Value>>,
}

impl Output {
    pub fn text(mime_type: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            mime_type: mime_type.into(),
            data: OutputData::Text(text.into()),
            metadata: None,
        }
    }

    pub fn table(columns: Vec<String>, rows: Vec<Vec<Value>>) -> Self {
        Self {
            mime_type: "application/json".to_string(),
            data: OutputData::Table { columns, rows },
            metadata: None,
        }
    }

    pub fn json(mime_type: impl Into<String>, value: Value) -> Self {
        Self {
            mime_type: mime_type.into(),
            data: OutputData::Json(value),
            metadata: None,
        }
    }
}

/// `data` is a string, a structured table, or an opaque JSON value, per the
/// data model's `Output.data` definition. On the wire a `Table` is a plain
/// object carrying a `"type": "table"` discriminant so client renderers can
/// distinguish it from an arbitrary JSON blob without extra metadata.
#[derive(Debug, Clone)]
pub enum OutputData {
    Text(String),
    Table {
        columns: Vec<String>,
        rows: Vec<Vec<Value>>,
    },
    Json(Value),
}

impl Serialize for OutputData {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            OutputData::Text(s) => serializer.serialize_str(s),
            OutputData::Table { columns, rows } => {
                use serde::ser::SerializeMap;
                let mut map = serializer.serialize_map(Some(3))?;
                map.serialize_entry("type", "table")?;
                map.serialize_entry("columns", columns)?;
                map.serialize_entry("rows", rows)?;
                map.end()
            }
            OutputData::Json(value) => value.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for OutputData {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;
        Ok(match value {
            Value::String(s) => OutputData::Text(s),
            Value::Object(ref map) if map.get("type").and_then(Value::as_str) == Some("table") => {
                let columns = map
                    .get("columns")
                    .and_then(|v| v.as_array())
                    .map(|arr| {
                        arr.iter()
                            .map(|c| c.as_str().unwrap_or_default().to_string())
                            .collect()
                    })
                    .unwrap_or_default();
                let rows = map
                    .get("rows")
                    .and_then(|v| v.as_array())
                    .map(|arr| {
                        arr.iter()
                            .map(|row| row.as_array().cloned().unwrap_or_default())
                            .collect()
                    })
                    .unwrap_or_default();
                OutputData::Table { columns, rows }
            }
            other => OutputData::Json(other),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_output_round_trips_through_json() {
        let out = Output::table(vec!["a".into()], vec![vec![Value::from(1)]]);
        let json = serde_json::to_value(&out).unwrap();
        assert_eq!(json["data"]["type"], "table");
        assert_eq!(json["data"]["columns"][0], "a");

        let back: Output = serde_json::from_value(json).unwrap();
        match back.data {
            OutputData::Table { columns, rows } => {
                assert_eq!(columns, vec!["a".to_string()]);
                assert_eq!(rows, vec![vec![Value::from(1)]]);
            }
            _ => panic!("expected table"),
        }
    }

    #[test]
    fn text_output_serializes_as_bare_string() {
        let out = Output::text("text/plain", "hello");
        let json = serde_json::to_value(&out).unwrap();
        assert_eq!(json["data"], "hello");
    }
}
