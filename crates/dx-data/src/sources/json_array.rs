//! JSON-array scanner
//!
//! A byte-level state machine tracks `{depth, in_string, escape_next}` so
//! braces inside strings or behind escapes never move the depth counter.
//! Records are the depth-1 objects of the outer array; offsets point at
//! each object's opening `{`.

use serde_json::Value;

use super::ndjson::{declared_columns, project_object};
use super::{FormatScanner, ProjectedRecord};

/// Find the index of the `}` closing the object that starts at `slice[0]`.
/// Used by the record reader to bound a single-record decode.
pub fn object_end(slice: &[u8]) -> Option<usize> {
    if slice.first() != Some(&b'{') {
        return None;
    }
    let mut depth = 0u32;
    let mut in_string = false;
    let mut escape_next = false;
    for (i, &b) in slice.iter().enumerate() {
        if in_string {
            if escape_next {
                escape_next = false;
            } else if b == b'\\' {
                escape_next = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

/// Streaming scanner over one outer JSON array of objects.
pub struct JsonArrayScanner {
    depth: u32,
    in_string: bool,
    escape_next: bool,
    seen_array: bool,
    in_record: bool,
    record: Vec<u8>,
    record_start: u64,
    columns: Option<Vec<String>>,
    warnings: u64,
}

impl JsonArrayScanner {
    pub fn new() -> Self {
        Self {
            depth: 0,
            in_string: false,
            escape_next: false,
            seen_array: false,
            in_record: false,
            record: Vec::new(),
            record_start: 0,
            columns: None,
            warnings: 0,
        }
    }

    fn close_record(&mut self, out: &mut Vec<ProjectedRecord>) {
        let obj = match serde_json::from_slice::<Value>(&self.record) {
            Ok(Value::Object(obj)) => obj,
            _ => {
                self.warnings += 1;
                self.record.clear();
                return;
            }
        };
        let declared = self
            .columns
            .get_or_insert_with(|| declared_columns(&obj));
        out.push(ProjectedRecord {
            offset: self.record_start,
            values: project_object(&obj, declared),
        });
        self.record.clear();
    }
}

impl Default for JsonArrayScanner {
    fn default() -> Self {
        Self::new()
    }
}

impl FormatScanner for JsonArrayScanner {
    fn feed(&mut self, data: &[u8], base: u64, out: &mut Vec<ProjectedRecord>) {
        for (i, &b) in data.iter().enumerate() {
            if self.in_string {
                if self.in_record {
                    self.record.push(b);
                }
                if self.escape_next {
                    self.escape_next = false;
                } else if b == b'\\' {
                    self.escape_next = true;
                } else if b == b'"' {
                    self.in_string = false;
                }
                continue;
            }
            match b {
                b'"' => {
                    self.in_string = true;
                    if self.in_record {
                        self.record.push(b);
                    }
                }
                b'[' => {
                    if !self.seen_array {
                        // The outer array puts the machine at depth 1
                        self.seen_array = true;
                        self.depth = 1;
                    } else {
                        self.depth += 1;
                        if self.in_record {
                            self.record.push(b);
                        }
                    }
                }
                b']' => {
                    self.depth = self.depth.saturating_sub(1);
                    if self.in_record {
                        self.record.push(b);
                    }
                }
                b'{' => {
                    if self.depth == 1 && !self.in_record {
                        self.in_record = true;
                        self.record_start = base + i as u64;
                        self.record.clear();
                    }
                    self.depth += 1;
                    if self.in_record {
                        self.record.push(b);
                    }
                }
                b'}' => {
                    self.depth = self.depth.saturating_sub(1);
                    if self.in_record {
                        self.record.push(b);
                        if self.depth == 1 {
                            self.in_record = false;
                            self.close_record(out);
                        }
                    }
                }
                _ => {
                    if self.in_record {
                        self.record.push(b);
                    }
                }
            }
        }
    }

    fn finish(&mut self, _out: &mut Vec<ProjectedRecord>) {
        // A record still open at EOF never saw its closing brace
        if self.in_record {
            self.in_record = false;
            self.record.clear();
            self.warnings += 1;
        }
    }

    fn columns(&self) -> Option<&[String]> {
        self.columns.as_deref()
    }

    fn warnings(&self) -> u64 {
        self.warnings
    }
}
