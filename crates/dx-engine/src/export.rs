//! Export of indexed (optionally filtered) records to CSV or JSON

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use dx_core::types::{DataValue, RecordMap, SearchField};

use crate::EngineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Csv,
    Json,
}

impl ExportFormat {
    pub fn parse(s: &str) -> Option<ExportFormat> {
        match s {
            "csv" => Some(ExportFormat::Csv),
            "json" => Some(ExportFormat::Json),
            _ => None,
        }
    }
}

/// What to export and where to put it.
#[derive(Debug, Clone)]
pub struct ExportOptions {
    pub format: ExportFormat,
    /// Destination chosen by the user through the shell's file dialog.
    pub destination: PathBuf,
    /// Substring filters, as for `page`.
    pub filters: Option<HashMap<String, String>>,
    /// Operator conditions, as for `search`. Applied instead of `filters`
    /// when both are present.
    pub search: Option<HashMap<String, SearchField>>,
    /// Cap on exported records.
    pub limit: Option<u64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExportReport {
    pub records: u64,
    pub destination: PathBuf,
}

/// Incremental writer over the chosen format. Only declared columns are
/// written; the `_index` / `_exact` markers stay internal.
pub(crate) struct ExportSink {
    inner: SinkInner,
    columns: Vec<String>,
    written: u64,
}

enum SinkInner {
    Csv(csv::Writer<File>),
    Json { out: BufWriter<File>, first: bool },
}

impl ExportSink {
    pub(crate) fn create(
        format: ExportFormat,
        destination: &PathBuf,
        columns: &[String],
    ) -> Result<Self, EngineError> {
        let inner = match format {
            ExportFormat::Csv => {
                let mut writer = csv::Writer::from_path(destination)
                    .map_err(|e| EngineError::Message(format!("export failed: {}", e)))?;
                writer
                    .write_record(columns)
                    .map_err(|e| EngineError::Message(format!("export failed: {}", e)))?;
                SinkInner::Csv(writer)
            }
            ExportFormat::Json => {
                let file = File::create(destination).map_err(dx_data::DataError::from)?;
                let mut out = BufWriter::new(file);
                out.write_all(b"[").map_err(dx_data::DataError::from)?;
                SinkInner::Json { out, first: true }
            }
        };
        Ok(Self {
            inner,
            columns: columns.to_vec(),
            written: 0,
        })
    }

    pub(crate) fn write(&mut self, record: &RecordMap) -> Result<(), EngineError> {
        match &mut self.inner {
            SinkInner::Csv(writer) => {
                let row: Vec<String> = self
                    .columns
                    .iter()
                    .map(|c| record.get(c).map(DataValue::to_text).unwrap_or_default())
                    .collect();
                writer
                    .write_record(&row)
                    .map_err(|e| EngineError::Message(format!("export failed: {}", e)))?;
            }
            SinkInner::Json { out, first } => {
                if !*first {
                    out.write_all(b",").map_err(dx_data::DataError::from)?;
                }
                *first = false;
                let mut object = serde_json::Map::new();
                for column in &self.columns {
                    if let Some(value) = record.get(column) {
                        object.insert(column.clone(), serde_json::to_value(value).map_err(dx_data::DataError::from)?);
                    }
                }
                serde_json::to_writer(&mut *out, &serde_json::Value::Object(object))
                    .map_err(dx_data::DataError::from)?;
            }
        }
        self.written += 1;
        Ok(())
    }

    pub(crate) fn finish(self) -> Result<u64, EngineError> {
        match self.inner {
            SinkInner::Csv(mut writer) => {
                writer
                    .flush()
                    .map_err(|e| EngineError::Message(format!("export failed: {}", e)))?;
            }
            SinkInner::Json { mut out, .. } => {
                out.write_all(b"]").map_err(dx_data::DataError::from)?;
                out.flush().map_err(dx_data::DataError::from)?;
            }
        }
        Ok(self.written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(pairs: &[(&str, DataValue)]) -> RecordMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_csv_sink_quotes_and_headers() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("out.csv");
        let columns = vec!["name".to_string(), "email".to_string()];
        let mut sink = ExportSink::create(ExportFormat::Csv, &dest, &columns).unwrap();
        sink.write(&record(&[
            ("name", DataValue::Str("Doe, John".to_string())),
            ("email", DataValue::Str("a@x".to_string())),
            ("_index", DataValue::Int(0)),
        ]))
        .unwrap();
        assert_eq!(sink.finish().unwrap(), 1);

        let written = std::fs::read_to_string(&dest).unwrap();
        assert_eq!(written, "name,email\n\"Doe, John\",a@x\n");
    }

    #[test]
    fn test_json_sink_is_an_array_of_declared_columns() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("out.json");
        let columns = vec!["u".to_string(), "n".to_string()];
        let mut sink = ExportSink::create(ExportFormat::Json, &dest, &columns).unwrap();
        sink.write(&record(&[
            ("u", DataValue::Str("al".to_string())),
            ("n", DataValue::Int(1)),
            ("_index", DataValue::Int(0)),
        ]))
        .unwrap();
        sink.write(&record(&[("u", DataValue::Str("bo".to_string()))]))
            .unwrap();
        sink.finish().unwrap();

        let written = std::fs::read_to_string(&dest).unwrap();
        assert_eq!(written, r#"[{"u":"al","n":1},{"u":"bo"}]"#);
    }

    #[test]
    fn test_missing_column_exports_empty_csv_field() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("gap.csv");
        let columns = vec!["a".to_string(), "b".to_string()];
        let mut sink = ExportSink::create(ExportFormat::Csv, &dest, &columns).unwrap();
        sink.write(&record(&[("a", DataValue::Int(5))])).unwrap();
        sink.finish().unwrap();
        let written = std::fs::read_to_string(&dest).unwrap();
        assert_eq!(written, "a,b\n5,\n");
    }

    #[test]
    fn test_format_parse() {
        assert_eq!(ExportFormat::parse("csv"), Some(ExportFormat::Csv));
        assert_eq!(ExportFormat::parse("json"), Some(ExportFormat::Json));
        assert_eq!(ExportFormat::parse("xlsx"), None);
    }
}
