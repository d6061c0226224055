//! vCard scanner
//!
//! Records span `BEGIN:VCARD` through the matching `END:VCARD`. The
//! declared columns are a canonical fixed list; continuation lines (folded
//! with a leading space or tab) extend the previous property's value.

use ahash::AHashMap;

use super::{FormatScanner, LineAssembler, ProjectedRecord, STATS_COLUMNS};

/// Canonical vCard columns; the first six are searchable.
pub const VCARD_COLUMNS: [&str; 10] = [
    "FN", "N", "EMAIL", "TEL", "ORG", "ADR", "NOTE", "URL", "BDAY", "TITLE",
];

/// Properties that accumulate as a `", "`-joined list instead of
/// first-occurrence-wins.
const ACCUMULATING: [&str; 2] = ["EMAIL", "TEL"];

/// Split a property line into its uppercased name (parameters stripped)
/// and raw value. Returns `None` for lines without a `:`.
pub fn parse_property(line: &str) -> Option<(String, &str)> {
    let colon = line.find(':')?;
    let name = line[..colon]
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_uppercase();
    Some((name, &line[colon + 1..]))
}

/// Fold a property into the card map: first occurrence wins, except the
/// accumulating properties which join with `", "`.
pub fn fold_property(props: &mut AHashMap<String, String>, name: &str, value: &str) {
    if ACCUMULATING.contains(&name) {
        props
            .entry(name.to_string())
            .and_modify(|existing| {
                existing.push_str(", ");
                existing.push_str(value);
            })
            .or_insert_with(|| value.to_string());
    } else {
        props.entry(name.to_string()).or_insert_with(|| value.to_string());
    }
}

/// Unfold continuation lines: a line break followed by one space or tab
/// joins with its predecessor through a single space.
pub fn unfold(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\r' && chars.peek() == Some(&'\n') {
            continue;
        }
        if c == '\n' {
            if matches!(chars.peek(), Some(' ') | Some('\t')) {
                chars.next();
                out.push(' ');
                continue;
            }
            out.push('\n');
            continue;
        }
        out.push(c);
    }
    out
}

/// Streaming vCard scanner.
pub struct VcardScanner {
    lines: LineAssembler,
    columns: Vec<String>,
    warnings: u64,
    state: CardState,
}

struct CardState {
    in_card: bool,
    card_start: u64,
    props: AHashMap<String, String>,
    /// Property receiving continuation lines; `None` after skipped lines.
    last_key: Option<String>,
}

impl VcardScanner {
    pub fn new() -> Self {
        Self {
            lines: LineAssembler::new(),
            columns: VCARD_COLUMNS.iter().map(|c| c.to_string()).collect(),
            warnings: 0,
            state: CardState {
                in_card: false,
                card_start: 0,
                props: AHashMap::new(),
                last_key: None,
            },
        }
    }
}

impl Default for VcardScanner {
    fn default() -> Self {
        Self::new()
    }
}

fn handle_line(
    state: &mut CardState,
    warnings: &mut u64,
    offset: u64,
    raw: &[u8],
    out: &mut Vec<ProjectedRecord>,
) {
    let mut raw = raw;
    if raw.last() == Some(&b'\r') {
        raw = &raw[..raw.len() - 1];
    }
    let line = String::from_utf8_lossy(raw);

    if line.trim() == "BEGIN:VCARD" {
        if state.in_card {
            // The previous card never closed
            *warnings += 1;
        }
        state.in_card = true;
        state.card_start = offset;
        state.props.clear();
        state.last_key = None;
        return;
    }
    if !state.in_card {
        return;
    }
    if line.trim() == "END:VCARD" {
        let values = VCARD_COLUMNS
            .iter()
            .take(STATS_COLUMNS)
            .map(|col| state.props.get(*col).cloned())
            .collect();
        out.push(ProjectedRecord {
            offset: state.card_start,
            values,
        });
        state.in_card = false;
        state.props.clear();
        state.last_key = None;
        return;
    }

    // Continuation line: one leading space or tab is consumed, the rest
    // joins the previous value through a single space
    if line.starts_with(' ') || line.starts_with('\t') {
        if let Some(key) = &state.last_key {
            if let Some(value) = state.props.get_mut(key) {
                value.push(' ');
                value.push_str(&line[1..]);
            }
        }
        return;
    }

    match parse_property(&line) {
        Some((name, _)) if name == "VERSION" || name == "BEGIN" || name == "END" => {
            state.last_key = None;
        }
        Some((name, value)) => {
            fold_property(&mut state.props, &name, value);
            // Continuations extend EMAIL/TEL only while theirs is the
            // latest value, which the join above already handles
            state.last_key = Some(name);
        }
        None => {
            state.last_key = None;
        }
    }
}

impl FormatScanner for VcardScanner {
    fn feed(&mut self, data: &[u8], base: u64, out: &mut Vec<ProjectedRecord>) {
        let VcardScanner {
            lines,
            warnings,
            state,
            ..
        } = self;
        lines.feed(data, base);
        lines.drain(|offset, raw| handle_line(state, warnings, offset, raw, out));
    }

    fn finish(&mut self, out: &mut Vec<ProjectedRecord>) {
        let VcardScanner {
            lines,
            warnings,
            state,
            ..
        } = self;
        lines.finish(|offset, raw| handle_line(state, warnings, offset, raw, out));
        if state.in_card {
            state.in_card = false;
            state.props.clear();
            *warnings += 1;
        }
    }

    fn columns(&self) -> Option<&[String]> {
        Some(&self.columns)
    }

    fn warnings(&self) -> u64 {
        self.warnings
    }
}
