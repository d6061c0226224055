//! Relational secondary index
//!
//! Three tables in one SQLite database: `catalog` (one row per indexed
//! file), `stats` (its streaming statistics) and `search` (one row per
//! record with the lowercased projections of the searchable columns and
//! the record's byte position). Readers share one connection; each
//! indexing job writes through its own connection inside a single
//! transaction, so a partially indexed file is never visible.

pub mod migrate;

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};

use dx_core::types::{CatalogEntry, FileFormat, FileStats, RowLocation, SearchField, SearchOperator};

use crate::sources::SEARCHABLE_COLUMNS;
use crate::DataError;

/// Busy timeout for the shared reader connection.
const READ_BUSY_TIMEOUT: Duration = Duration::from_millis(5_000);
/// Busy timeout for job connections, which may queue behind a long-running
/// sibling job's transaction.
const JOB_BUSY_TIMEOUT: Duration = Duration::from_millis(60_000);
/// Rows per batched insert statement loop.
pub const INSERT_BATCH: usize = 1000;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS catalog (
    file_id TEXT PRIMARY KEY,
    path TEXT NOT NULL,
    name TEXT NOT NULL,
    size INTEGER NOT NULL,
    type TEXT NOT NULL,
    format TEXT NOT NULL,
    delimiter TEXT,
    indexed_at INTEGER NOT NULL,
    total_records INTEGER NOT NULL,
    columns TEXT NOT NULL,
    searchable_columns TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS stats (
    file_id TEXT PRIMARY KEY,
    stats_json TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS search (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    file_id TEXT NOT NULL,
    row_index INTEGER NOT NULL,
    position INTEGER NOT NULL,
    col0 TEXT,
    col1 TEXT,
    col2 TEXT,
    col3 TEXT,
    col4 TEXT,
    col5 TEXT
);
CREATE INDEX IF NOT EXISTS idx_search_file ON search(file_id);
CREATE INDEX IF NOT EXISTS idx_search_file_row ON search(file_id, row_index);
CREATE INDEX IF NOT EXISTS idx_search_col0 ON search(col0);
CREATE INDEX IF NOT EXISTS idx_search_col1 ON search(col1);
CREATE INDEX IF NOT EXISTS idx_search_col2 ON search(col2);
";

fn configure(conn: &Connection, busy: Duration) -> Result<(), rusqlite::Error> {
    // journal_mode returns a result row, so query_row instead of execute
    conn.query_row("PRAGMA journal_mode=WAL", [], |_| Ok(()))?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.busy_timeout(busy)?;
    Ok(())
}

/// One projected row headed for the `search` table.
#[derive(Debug, Clone)]
pub struct SearchRow {
    pub row_index: u64,
    pub position: u64,
    pub cols: [Option<String>; SEARCHABLE_COLUMNS],
}

/// Shared read/maintenance handle over `search.db`.
pub struct SearchStore {
    conn: Mutex<Connection>,
}

impl SearchStore {
    pub fn open(path: &Path) -> Result<Self, DataError> {
        let conn = Connection::open(path)?;
        configure(&conn, READ_BUSY_TIMEOUT)?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn catalog_get(&self, file_id: &str) -> Result<Option<CatalogEntry>, DataError> {
        let conn = self.conn.lock();
        let row = conn
            .query_row(
                "SELECT file_id, path, name, size, format, delimiter, indexed_at,
                        total_records, columns, searchable_columns
                 FROM catalog WHERE file_id = ?1",
                params![file_id],
                row_to_entry,
            )
            .optional()?;
        row.map(decode_entry).transpose()
    }

    pub fn catalog_list(&self) -> Result<Vec<CatalogEntry>, DataError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT file_id, path, name, size, format, delimiter, indexed_at,
                    total_records, columns, searchable_columns
             FROM catalog ORDER BY indexed_at DESC",
        )?;
        let rows = stmt.query_map([], row_to_entry)?;
        let mut entries = Vec::new();
        for row in rows {
            entries.push(decode_entry(row?)?);
        }
        Ok(entries)
    }

    pub fn has_file(&self, file_id: &str) -> Result<bool, DataError> {
        let conn = self.conn.lock();
        let found: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM catalog WHERE file_id = ?1",
                params![file_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    pub fn stats_get(&self, file_id: &str) -> Result<Option<FileStats>, DataError> {
        let conn = self.conn.lock();
        let json: Option<String> = conn
            .query_row(
                "SELECT stats_json FROM stats WHERE file_id = ?1",
                params![file_id],
                |row| row.get(0),
            )
            .optional()?;
        match json {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    /// Insert or replace a catalog entry outside a job transaction.
    /// Used by the legacy migration only.
    pub fn catalog_put(&self, entry: &CatalogEntry) -> Result<(), DataError> {
        let conn = self.conn.lock();
        insert_catalog(&conn, entry)?;
        Ok(())
    }

    pub fn stats_put(&self, stats: &FileStats) -> Result<(), DataError> {
        let conn = self.conn.lock();
        insert_stats(&conn, stats)?;
        Ok(())
    }

    /// Delete every row belonging to one file id.
    pub fn remove_file(&self, file_id: &str) -> Result<(), DataError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM search WHERE file_id = ?1", params![file_id])?;
        tx.execute("DELETE FROM stats WHERE file_id = ?1", params![file_id])?;
        tx.execute("DELETE FROM catalog WHERE file_id = ?1", params![file_id])?;
        tx.commit()?;
        Ok(())
    }

    /// Empty the entire store.
    pub fn clear(&self) -> Result<(), DataError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM search", [])?;
        tx.execute("DELETE FROM stats", [])?;
        tx.execute("DELETE FROM catalog", [])?;
        tx.commit()?;
        Ok(())
    }

    /// Count rows matching substring filters over the searchable columns.
    pub fn count(
        &self,
        file_id: &str,
        filters: &HashMap<String, String>,
        searchable: &[String],
    ) -> Result<u64, DataError> {
        let (clauses, values) = filter_clauses(filters, searchable);
        let sql = format!("SELECT COUNT(*) FROM search WHERE file_id = ?1{}", clauses);
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&sql)?;
        let params = build_params(file_id, &values);
        let count: i64 = stmt.query_row(rusqlite::params_from_iter(params), |row| row.get(0))?;
        Ok(count as u64)
    }

    /// One page of `(row_index, position)` pairs under substring filters,
    /// ordered by row index.
    pub fn page(
        &self,
        file_id: &str,
        page: u32,
        limit: u32,
        filters: &HashMap<String, String>,
        searchable: &[String],
    ) -> Result<Vec<RowLocation>, DataError> {
        let (clauses, values) = filter_clauses(filters, searchable);
        let sql = format!(
            "SELECT row_index, position FROM search WHERE file_id = ?1{}
             ORDER BY row_index LIMIT {} OFFSET {}",
            clauses,
            limit,
            (page as u64 - 1) * limit as u64,
        );
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&sql)?;
        let params = build_params(file_id, &values);
        let rows = stmt.query_map(rusqlite::params_from_iter(params), |row| {
            Ok(RowLocation {
                row_index: row.get::<_, i64>(0)? as u64,
                position: row.get::<_, i64>(1)? as u64,
            })
        })?;
        let mut locations = Vec::new();
        for row in rows {
            locations.push(row?);
        }
        Ok(locations)
    }

    /// Operator-based search. Fields on unknown columns or with empty
    /// values contribute nothing; when no usable condition remains the
    /// result is empty rather than a full scan.
    pub fn search(
        &self,
        file_id: &str,
        fields: &HashMap<String, SearchField>,
        searchable: &[String],
        page: u32,
        limit: u32,
    ) -> Result<(Vec<RowLocation>, u64), DataError> {
        let mut clauses = String::new();
        let mut values: Vec<String> = Vec::new();
        let mut usable = 0usize;
        for (column, field) in fields {
            let Some(k) = searchable.iter().position(|c| c == column) else {
                continue;
            };
            if k >= SEARCHABLE_COLUMNS {
                continue;
            }
            let Some(clause) = operator_clause(k, field, &mut values) else {
                continue;
            };
            clauses.push_str(" AND ");
            clauses.push_str(&clause);
            usable += 1;
        }
        if usable == 0 {
            return Ok((Vec::new(), 0));
        }

        let conn = self.conn.lock();
        let count_sql = format!("SELECT COUNT(*) FROM search WHERE file_id = ?1{}", clauses);
        let total: i64 = conn.prepare(&count_sql)?.query_row(
            rusqlite::params_from_iter(build_params(file_id, &values)),
            |row| row.get(0),
        )?;

        let page_sql = format!(
            "SELECT row_index, position FROM search WHERE file_id = ?1{}
             ORDER BY row_index LIMIT {} OFFSET {}",
            clauses,
            limit,
            (page as u64 - 1) * limit as u64,
        );
        let mut stmt = conn.prepare(&page_sql)?;
        let rows = stmt.query_map(
            rusqlite::params_from_iter(build_params(file_id, &values)),
            |row| {
                Ok(RowLocation {
                    row_index: row.get::<_, i64>(0)? as u64,
                    position: row.get::<_, i64>(1)? as u64,
                })
            },
        )?;
        let mut locations = Vec::new();
        for row in rows {
            locations.push(row?);
        }
        Ok((locations, total as u64))
    }
}

fn build_params<'a>(file_id: &'a str, values: &'a [String]) -> Vec<&'a str> {
    let mut params: Vec<&str> = Vec::with_capacity(values.len() + 1);
    params.push(file_id);
    params.extend(values.iter().map(|s| s.as_str()));
    params
}

fn filter_clauses(
    filters: &HashMap<String, String>,
    searchable: &[String],
) -> (String, Vec<String>) {
    let mut clauses = String::new();
    let mut values = Vec::new();
    for (column, value) in filters {
        let Some(k) = searchable.iter().position(|c| c == column) else {
            continue;
        };
        if k >= SEARCHABLE_COLUMNS {
            continue;
        }
        clauses.push_str(&format!(" AND col{} LIKE ?", k));
        values.push(format!("%{}%", value.to_lowercase()));
    }
    (clauses, values)
}

/// Translate one search field into SQL. Projections were lowercased at
/// index time, so lowering the query value makes every comparison
/// case-insensitive.
fn operator_clause(k: usize, field: &SearchField, values: &mut Vec<String>) -> Option<String> {
    let value = field.value.to_lowercase();
    if value.is_empty() {
        return None;
    }
    let clause = match field.operator {
        SearchOperator::Contains => {
            values.push(format!("%{}%", value));
            format!("col{} LIKE ?", k)
        }
        SearchOperator::Equals => {
            values.push(value);
            format!("col{} = ?", k)
        }
        SearchOperator::StartsWith => {
            values.push(format!("{}%", value));
            format!("col{} LIKE ?", k)
        }
        SearchOperator::EndsWith => {
            values.push(format!("%{}", value));
            format!("col{} LIKE ?", k)
        }
        SearchOperator::Not => {
            values.push(format!("%{}%", value));
            format!("(col{k} IS NULL OR col{k} NOT LIKE ?)", k = k)
        }
        SearchOperator::Regex => {
            values.push(regex_to_like(&value));
            format!("col{} LIKE ?", k)
        }
    };
    Some(clause)
}

/// Reduce a regex-lite pattern to a LIKE pattern: anchors stripped,
/// `.*` becomes `%`, remaining `.` becomes `_`; a pattern left without
/// wildcards is wrapped in `%…%`.
fn regex_to_like(value: &str) -> String {
    let value = value.strip_prefix('^').unwrap_or(value);
    let value = value.strip_suffix('$').unwrap_or(value);
    let replaced = value.replace(".*", "%").replace('.', "_");
    if replaced.contains('%') || replaced.contains('_') {
        replaced
    } else {
        format!("%{}%", replaced)
    }
}

type RawEntry = (CatalogEntry, String, String);

fn row_to_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawEntry> {
    let format: String = row.get(4)?;
    let entry = CatalogEntry {
        file_id: row.get(0)?,
        path: row.get(1)?,
        name: row.get(2)?,
        size: row.get::<_, i64>(3)? as u64,
        format: FileFormat::parse(&format).unwrap_or(FileFormat::Csv),
        delimiter: row.get(5)?,
        indexed_at: row.get(6)?,
        total_records: row.get::<_, i64>(7)? as u64,
        columns: Vec::new(),
        searchable_columns: Vec::new(),
        indexed: true,
    };
    let columns: String = row.get(8)?;
    let searchable: String = row.get(9)?;
    Ok((entry, columns, searchable))
}

fn decode_entry((mut entry, columns, searchable): RawEntry) -> Result<CatalogEntry, DataError> {
    entry.columns = serde_json::from_str(&columns)?;
    entry.searchable_columns = serde_json::from_str(&searchable)?;
    Ok(entry)
}

fn insert_catalog(conn: &Connection, entry: &CatalogEntry) -> Result<(), DataError> {
    conn.execute(
        "INSERT OR REPLACE INTO catalog
         (file_id, path, name, size, type, format, delimiter, indexed_at,
          total_records, columns, searchable_columns)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        params![
            entry.file_id,
            entry.path,
            entry.name,
            entry.size as i64,
            entry.format.as_str(),
            entry.format.as_str(),
            entry.delimiter,
            entry.indexed_at,
            entry.total_records as i64,
            serde_json::to_string(&entry.columns)?,
            serde_json::to_string(&entry.searchable_columns)?,
        ],
    )?;
    Ok(())
}

fn insert_stats(conn: &Connection, stats: &FileStats) -> Result<(), DataError> {
    conn.execute(
        "INSERT OR REPLACE INTO stats (file_id, stats_json) VALUES (?1, ?2)",
        params![stats.file_id, serde_json::to_string(stats)?],
    )?;
    Ok(())
}

/// Write half of one indexing job: its own connection, one transaction.
/// Dropping the writer without committing rolls everything back.
pub struct JobWriter {
    conn: Connection,
    file_id: String,
    finished: bool,
}

impl JobWriter {
    pub fn open(db_path: &Path, file_id: &str) -> Result<Self, DataError> {
        let conn = Connection::open(db_path)?;
        configure(&conn, JOB_BUSY_TIMEOUT)?;
        conn.execute_batch(SCHEMA)?;
        conn.execute_batch("BEGIN IMMEDIATE")?;
        // Re-indexing replaces whatever the id had before
        conn.execute("DELETE FROM search WHERE file_id = ?1", params![file_id])?;
        conn.execute("DELETE FROM stats WHERE file_id = ?1", params![file_id])?;
        conn.execute("DELETE FROM catalog WHERE file_id = ?1", params![file_id])?;
        Ok(Self {
            conn,
            file_id: file_id.to_string(),
            finished: false,
        })
    }

    pub fn insert_rows(&mut self, rows: &[SearchRow]) -> Result<(), DataError> {
        let mut stmt = self.conn.prepare_cached(
            "INSERT INTO search
             (file_id, row_index, position, col0, col1, col2, col3, col4, col5)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        )?;
        for row in rows {
            stmt.execute(params![
                self.file_id,
                row.row_index as i64,
                row.position as i64,
                row.cols[0],
                row.cols[1],
                row.cols[2],
                row.cols[3],
                row.cols[4],
                row.cols[5],
            ])?;
        }
        Ok(())
    }

    /// Commit the job: catalog and stats land last, so the entry only
    /// becomes visible with all of its rows.
    pub fn commit(&mut self, entry: &CatalogEntry, stats: &FileStats) -> Result<(), DataError> {
        insert_catalog(&self.conn, entry)?;
        insert_stats(&self.conn, stats)?;
        self.conn.execute_batch("COMMIT")?;
        self.finished = true;
        Ok(())
    }

    pub fn rollback(&mut self) -> Result<(), DataError> {
        if !self.finished {
            self.conn.execute_batch("ROLLBACK")?;
            self.finished = true;
        }
        Ok(())
    }
}

impl Drop for JobWriter {
    fn drop(&mut self) {
        if !self.finished {
            let _ = self.conn.execute_batch("ROLLBACK");
        }
    }
}
