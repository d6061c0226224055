//! Column statistics gathered while the parser streams
//!
//! Counts value distributions for the leading declared columns. The
//! working set is capped per column; values first seen after the cap are
//! dropped, so distinct counts and top values carry a documented skew
//! toward early data.

use ahash::AHashMap;

use dx_core::types::{ColumnStats, FileStats, ValueCount};

use crate::sources::STATS_COLUMNS;

/// Distinct values tracked per column while streaming.
pub const WORKING_SET_CAP: usize = 100;
/// Top values emitted per column.
pub const TOP_VALUES: usize = 30;

/// Streaming accumulator over up to the first ten declared columns.
pub struct StatsAccumulator {
    columns: Vec<ColumnAcc>,
}

struct ColumnAcc {
    name: String,
    counts: AHashMap<String, u64>,
    capped: bool,
}

impl StatsAccumulator {
    pub fn new() -> Self {
        Self {
            columns: Vec::new(),
        }
    }

    /// Fix the observed columns. Called once, when the scanner discovers
    /// the declared list; later calls are ignored.
    pub fn set_columns(&mut self, names: &[String]) {
        if !self.columns.is_empty() {
            return;
        }
        self.columns = names
            .iter()
            .take(STATS_COLUMNS)
            .map(|name| ColumnAcc {
                name: name.clone(),
                counts: AHashMap::new(),
                capped: false,
            })
            .collect();
    }

    /// Observe one record's values, positionally aligned with the columns.
    pub fn observe(&mut self, values: &[Option<String>]) {
        for (acc, value) in self.columns.iter_mut().zip(values) {
            let Some(value) = value else { continue };
            if let Some(count) = acc.counts.get_mut(value) {
                *count += 1;
            } else if acc.counts.len() < WORKING_SET_CAP {
                acc.counts.insert(value.clone(), 1);
            } else {
                acc.capped = true;
            }
        }
    }

    /// Whether any column hit its working-set cap.
    pub fn any_capped(&self) -> bool {
        self.columns.iter().any(|c| c.capped)
    }

    pub fn finish(self, file_id: &str) -> FileStats {
        let columns = self
            .columns
            .into_iter()
            .map(|acc| {
                let distinct = acc.counts.len() as u64;
                let mut top: Vec<ValueCount> = acc
                    .counts
                    .into_iter()
                    .map(|(value, count)| ValueCount { value, count })
                    .collect();
                // Highest count first; ties ordered by value for determinism
                top.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.value.cmp(&b.value)));
                top.truncate(TOP_VALUES);
                ColumnStats {
                    name: acc.name,
                    declared_type: "string".to_string(),
                    distinct_values: distinct,
                    top_values: top,
                }
            })
            .collect();
        FileStats {
            file_id: file_id.to_string(),
            columns,
        }
    }
}

impl Default for StatsAccumulator {
    fn default() -> Self {
        Self::new()
    }
}
