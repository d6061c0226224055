//! Record, catalog and query result shapes shared across the engine

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Source file format as recognized by the sniffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileFormat {
    #[serde(rename = "csv")]
    Csv,
    #[serde(rename = "ndjson")]
    Ndjson,
    #[serde(rename = "json-array")]
    JsonArray,
    #[serde(rename = "vcf")]
    Vcf,
}

impl FileFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileFormat::Csv => "csv",
            FileFormat::Ndjson => "ndjson",
            FileFormat::JsonArray => "json-array",
            FileFormat::Vcf => "vcf",
        }
    }

    pub fn parse(s: &str) -> Option<FileFormat> {
        match s {
            "csv" => Some(FileFormat::Csv),
            "ndjson" => Some(FileFormat::Ndjson),
            "json-array" => Some(FileFormat::JsonArray),
            "vcf" => Some(FileFormat::Vcf),
            _ => None,
        }
    }
}

impl fmt::Display for FileFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Dynamically typed record value.
///
/// Non-primitive JSON fields are carried as serialized strings (`Json`)
/// so the variant set stays closed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DataValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Json(String),
}

impl DataValue {
    /// Convert a decoded JSON value. Arrays are re-serialized; objects are
    /// not representable and yield `None` (callers drop the field).
    pub fn from_json(value: &serde_json::Value) -> Option<DataValue> {
        match value {
            serde_json::Value::Null => Some(DataValue::Null),
            serde_json::Value::Bool(b) => Some(DataValue::Bool(*b)),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Some(DataValue::Int(i))
                } else {
                    Some(DataValue::Float(n.as_f64().unwrap_or(f64::NAN)))
                }
            }
            serde_json::Value::String(s) => Some(DataValue::Str(s.clone())),
            serde_json::Value::Array(_) => {
                Some(DataValue::Json(serde_json::to_string(value).ok()?))
            }
            serde_json::Value::Object(_) => None,
        }
    }

    /// Plain text rendering used for projections and export.
    pub fn to_text(&self) -> String {
        match self {
            DataValue::Null => String::new(),
            DataValue::Bool(b) => b.to_string(),
            DataValue::Int(i) => i.to_string(),
            DataValue::Float(f) => f.to_string(),
            DataValue::Str(s) => s.clone(),
            DataValue::Json(s) => s.clone(),
        }
    }
}

/// A decoded record: column name to value, plus the `_index` marker
/// (and `_exact` when produced by a search).
pub type RecordMap = BTreeMap<String, DataValue>;

/// One catalog entry per indexed file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub file_id: String,
    pub path: String,
    pub name: String,
    pub size: u64,
    pub format: FileFormat,
    #[serde(default)]
    pub delimiter: Option<String>,
    pub indexed_at: i64,
    pub total_records: u64,
    pub columns: Vec<String>,
    pub searchable_columns: Vec<String>,
    /// Whether the file currently has a committed index. Only meaningful on
    /// API responses; not persisted.
    #[serde(default)]
    pub indexed: bool,
}

/// A value with its occurrence count in the top-values distribution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValueCount {
    pub value: String,
    pub count: u64,
}

/// Per-column statistics gathered while streaming.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnStats {
    pub name: String,
    /// Declared type; always "string" in v1.
    pub declared_type: String,
    /// Approximate distinct count (working set is capped during streaming).
    pub distinct_values: u64,
    pub top_values: Vec<ValueCount>,
}

/// Statistics for one indexed file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileStats {
    pub file_id: String,
    pub columns: Vec<ColumnStats>,
}

/// Search operator set. There is no query language beyond these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SearchOperator {
    Contains,
    Equals,
    StartsWith,
    EndsWith,
    Not,
    Regex,
}

/// One field condition of a search request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchField {
    pub value: String,
    pub operator: SearchOperator,
}

/// A row located by the secondary index: its ordinal and its byte position
/// in the source file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowLocation {
    pub row_index: u64,
    pub position: u64,
}

/// Result of a `page` call.
#[derive(Debug, Clone, Serialize)]
pub struct PageResult {
    /// Decoded records; `None` marks a row whose bytes could not be read
    /// (the caller renders a placeholder).
    pub records: Vec<Option<RecordMap>>,
    pub total: u64,
    pub page: u32,
    pub limit: u32,
}

/// Result of a `search` call.
#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    pub records: Vec<Option<RecordMap>>,
    pub total: u64,
    pub page: u32,
    pub limit: u32,
    pub elapsed_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_round_trip() {
        for f in [
            FileFormat::Csv,
            FileFormat::Ndjson,
            FileFormat::JsonArray,
            FileFormat::Vcf,
        ] {
            assert_eq!(FileFormat::parse(f.as_str()), Some(f));
        }
        assert_eq!(FileFormat::parse("parquet"), None);
    }

    #[test]
    fn test_data_value_from_json() {
        let v: serde_json::Value = serde_json::from_str(r#"{"a":1,"b":[1,2],"c":{"x":1}}"#).unwrap();
        assert_eq!(DataValue::from_json(&v["a"]), Some(DataValue::Int(1)));
        assert_eq!(
            DataValue::from_json(&v["b"]),
            Some(DataValue::Json("[1,2]".to_string()))
        );
        assert_eq!(DataValue::from_json(&v["c"]), None);
    }

    #[test]
    fn test_data_value_serializes_untagged() {
        let mut record = RecordMap::new();
        record.insert("n".to_string(), DataValue::Int(2));
        record.insert("s".to_string(), DataValue::Str("{".to_string()));
        record.insert("z".to_string(), DataValue::Null);
        let json = serde_json::to_string(&record).unwrap();
        assert_eq!(json, r#"{"n":2,"s":"{","z":null}"#);
    }
}
