//! Line-oriented CSV scanner with an RFC-4180-style field parser
//!
//! The first record is the header and defines the declared columns.
//! Malformed lines (unbalanced quotes, wrong arity) are skipped and
//! counted; they never reach the position table.

use super::{FormatScanner, LineAssembler, ProjectedRecord, STATS_COLUMNS};

/// Split one CSV line into fields.
///
/// Double quotes open and close a quoted field, `""` inside quotes yields a
/// literal quote, the delimiter outside quotes ends a field, and whitespace
/// outside quotes on field boundaries is trimmed. Returns `None` when a
/// quote is left unbalanced.
pub fn parse_line(line: &str, delimiter: char) -> Option<Vec<String>> {
    let mut fields = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut was_quoted = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        if in_quotes {
            if c == '"' {
                if chars.peek() == Some(&'"') {
                    chars.next();
                    field.push('"');
                } else {
                    in_quotes = false;
                }
            } else {
                field.push(c);
            }
        } else if c == delimiter {
            fields.push(end_field(&mut field, was_quoted));
            was_quoted = false;
        } else if c == '"' && !was_quoted && field.trim().is_empty() {
            field.clear();
            in_quotes = true;
            was_quoted = true;
        } else if was_quoted && c.is_whitespace() {
            // Padding between a closing quote and the next delimiter
        } else {
            field.push(c);
        }
    }

    if in_quotes {
        return None;
    }
    fields.push(end_field(&mut field, was_quoted));
    Some(fields)
}

fn end_field(field: &mut String, was_quoted: bool) -> String {
    let value = if was_quoted {
        field.clone()
    } else {
        field.trim().to_string()
    };
    field.clear();
    value
}

/// Streaming CSV scanner.
pub struct CsvScanner {
    delimiter: char,
    lines: LineAssembler,
    columns: Option<Vec<String>>,
    warnings: u64,
}

impl CsvScanner {
    pub fn new(delimiter: char) -> Self {
        Self {
            delimiter,
            lines: LineAssembler::new(),
            columns: None,
            warnings: 0,
        }
    }
}

fn handle_line(
    delimiter: char,
    columns: &mut Option<Vec<String>>,
    warnings: &mut u64,
    offset: u64,
    raw: &[u8],
    out: &mut Vec<ProjectedRecord>,
) {
    let mut raw = raw;
    if raw.last() == Some(&b'\r') {
        raw = &raw[..raw.len() - 1];
    }
    let text = String::from_utf8_lossy(raw);

    let Some(declared) = columns else {
        // Header row: an unbalanced header falls back to a naive split so
        // the file still gets column names.
        let headers = parse_line(&text, delimiter)
            .unwrap_or_else(|| text.split(delimiter).map(|s| s.trim().to_string()).collect());
        *columns = Some(headers);
        return;
    };

    let Some(fields) = parse_line(&text, delimiter) else {
        *warnings += 1;
        return;
    };
    if fields.len() != declared.len() {
        *warnings += 1;
        return;
    }

    let values = fields
        .into_iter()
        .take(STATS_COLUMNS)
        .map(Some)
        .collect();
    out.push(ProjectedRecord { offset, values });
}

impl FormatScanner for CsvScanner {
    fn feed(&mut self, data: &[u8], base: u64, out: &mut Vec<ProjectedRecord>) {
        let CsvScanner {
            delimiter,
            lines,
            columns,
            warnings,
        } = self;
        lines.feed(data, base);
        lines.drain(|offset, raw| handle_line(*delimiter, columns, warnings, offset, raw, out));
    }

    fn finish(&mut self, out: &mut Vec<ProjectedRecord>) {
        let CsvScanner {
            delimiter,
            lines,
            columns,
            warnings,
        } = self;
        lines.finish(|offset, raw| handle_line(*delimiter, columns, warnings, offset, raw, out));
    }

    fn columns(&self) -> Option<&[String]> {
        self.columns.as_deref()
    }

    fn warnings(&self) -> u64 {
        self.warnings
    }
}
