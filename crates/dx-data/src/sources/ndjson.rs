//! Newline-delimited JSON scanner
//!
//! No header pass: the declared columns are fixed by the first line that
//! decodes to an object, taking its top-level keys whose values are null,
//! primitive or array (nested objects are excluded), capped at 20.

use serde_json::Value;

use super::{FormatScanner, LineAssembler, ProjectedRecord, MAX_DECLARED_COLUMNS, STATS_COLUMNS};

/// Declared columns of a decoded object, in key order.
pub(crate) fn declared_columns(obj: &serde_json::Map<String, Value>) -> Vec<String> {
    obj.iter()
        .filter(|(_, v)| !v.is_object())
        .map(|(k, _)| k.clone())
        .take(MAX_DECLARED_COLUMNS)
        .collect()
}

/// Stringify a JSON value for projection and stats. Missing, null and
/// object values have no text form.
pub(crate) fn value_text(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::Null | Value::Object(_) => None,
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::String(s) => Some(s.clone()),
        array @ Value::Array(_) => serde_json::to_string(array).ok(),
    }
}

/// Project one decoded object onto the leading declared columns.
pub(crate) fn project_object(
    obj: &serde_json::Map<String, Value>,
    columns: &[String],
) -> Vec<Option<String>> {
    columns
        .iter()
        .take(STATS_COLUMNS)
        .map(|col| value_text(obj.get(col)))
        .collect()
}

/// Streaming NDJSON scanner.
pub struct NdjsonScanner {
    lines: LineAssembler,
    columns: Option<Vec<String>>,
    warnings: u64,
}

impl NdjsonScanner {
    pub fn new() -> Self {
        Self {
            lines: LineAssembler::new(),
            columns: None,
            warnings: 0,
        }
    }
}

impl Default for NdjsonScanner {
    fn default() -> Self {
        Self::new()
    }
}

fn handle_line(
    columns: &mut Option<Vec<String>>,
    warnings: &mut u64,
    offset: u64,
    raw: &[u8],
    out: &mut Vec<ProjectedRecord>,
) {
    let first = raw.iter().copied().find(|b| !b.is_ascii_whitespace());
    if first != Some(b'{') {
        return;
    }
    let obj = match serde_json::from_slice::<Value>(raw) {
        Ok(Value::Object(obj)) => obj,
        _ => {
            *warnings += 1;
            return;
        }
    };
    let declared = columns.get_or_insert_with(|| declared_columns(&obj));
    let values = project_object(&obj, declared);
    out.push(ProjectedRecord { offset, values });
}

impl FormatScanner for NdjsonScanner {
    fn feed(&mut self, data: &[u8], base: u64, out: &mut Vec<ProjectedRecord>) {
        let NdjsonScanner {
            lines,
            columns,
            warnings,
        } = self;
        lines.feed(data, base);
        lines.drain(|offset, raw| handle_line(columns, warnings, offset, raw, out));
    }

    fn finish(&mut self, out: &mut Vec<ProjectedRecord>) {
        let NdjsonScanner {
            lines,
            columns,
            warnings,
        } = self;
        lines.finish(|offset, raw| handle_line(columns, warnings, offset, raw, out));
    }

    fn columns(&self) -> Option<&[String]> {
        self.columns.as_deref()
    }

    fn warnings(&self) -> u64 {
        self.warnings
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scan(input: &[u8]) -> (NdjsonScanner, Vec<ProjectedRecord>) {
        let mut scanner = NdjsonScanner::new();
        let mut out = Vec::new();
        scanner.feed(input, 0, &mut out);
        scanner.finish(&mut out);
        (scanner, out)
    }

    #[test]
    fn test_columns_from_first_object_excluding_nested() {
        let (scanner, records) =
            scan(b"{\"u\":\"al\",\"n\":1,\"meta\":{\"x\":1}}\n{\"u\":\"bo\",\"n\":2}\n");
        assert_eq!(
            scanner.columns(),
            Some(&["u".to_string(), "n".to_string()][..])
        );
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].offset, 0);
        assert_eq!(records[1].offset, 32);
        assert_eq!(
            records[1].values,
            vec![Some("bo".to_string()), Some("2".to_string())]
        );
    }

    #[test]
    fn test_arrays_stringify_nulls_vanish() {
        let (_, records) = scan(b"{\"a\":[1,2],\"b\":null,\"c\":true}\n");
        assert_eq!(
            records[0].values,
            vec![Some("[1,2]".to_string()), None, Some("true".to_string())]
        );
    }

    #[test]
    fn test_non_object_lines_are_ignored() {
        let (scanner, records) = scan(b"\n# comment\n{\"a\":1}\n[1,2]\n");
        assert_eq!(records.len(), 1);
        assert_eq!(scanner.warnings(), 0);
    }

    #[test]
    fn test_decode_failures_counted() {
        let (scanner, records) = scan(b"{\"a\":1}\n{broken\n{\"a\":2}\n");
        assert_eq!(records.len(), 2);
        assert_eq!(scanner.warnings(), 1);
    }

    #[test]
    fn test_declared_column_cap() {
        let mut line = String::from("{");
        for i in 0..25 {
            if i > 0 {
                line.push(',');
            }
            line.push_str(&format!("\"k{:02}\":{}", i, i));
        }
        line.push_str("}\n");
        let (scanner, _) = scan(line.as_bytes());
        assert_eq!(scanner.columns().unwrap().len(), MAX_DECLARED_COLUMNS);
    }

    #[test]
    fn test_later_keys_are_not_added() {
        let (scanner, records) = scan(b"{\"a\":1}\n{\"a\":2,\"b\":3}\n");
        assert_eq!(scanner.columns(), Some(&["a".to_string()][..]));
        assert_eq!(records[1].values, vec![Some("2".to_string())]);
    }
}
