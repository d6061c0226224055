//! The engine facade
//!
//! One instance per host process. Construction opens the store, runs the
//! legacy migration and loads the recent list, so by the time `new`
//! returns every query path is ready; `page`/`search` never observe a
//! half-initialized store. In-flight indexing jobs stay invisible until
//! their transaction commits.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc;
use tracing::warn;

use dx_core::events::{IndexEvent, JobState};
use dx_core::fingerprint::fingerprint_file;
use dx_core::limits::{
    validate_file_id, validate_filters, validate_limit, validate_page, validate_path,
};
use dx_core::types::{
    CatalogEntry, DataValue, FileStats, PageResult, RecordMap, RowLocation, SearchField,
    SearchResult,
};
use dx_data::sniff::sniff_path;
use dx_data::sources::scanner_for;
use dx_data::store::migrate::migrate;
use dx_data::{DataError, EngineCaches, EngineConfig, IndexPaths, RecentList, RecordReader, SearchStore};

use crate::coordinator::IndexCoordinator;
use crate::export::{ExportOptions, ExportReport, ExportSink};
use crate::EngineError;

/// Bytes peeked when describing a file that has no index yet.
const PREVIEW_BYTES: usize = 256 * 1024;
/// Rows fetched per export batch.
const EXPORT_BATCH: u32 = 1000;

pub struct Engine {
    config: EngineConfig,
    paths: IndexPaths,
    store: Arc<SearchStore>,
    caches: Arc<EngineCaches>,
    reader: Arc<RecordReader>,
    recent: Arc<RecentList>,
    coordinator: IndexCoordinator,
}

impl Engine {
    pub async fn new(config: EngineConfig) -> Result<Self, EngineError> {
        let paths = IndexPaths::new(&config.data_dir);
        paths.ensure().map_err(DataError::from)?;

        let store = {
            let paths = paths.clone();
            tokio::task::spawn_blocking(move || -> Result<Arc<SearchStore>, DataError> {
                let store = Arc::new(SearchStore::open(&paths.db())?);
                migrate(&store, &paths)?;
                Ok(store)
            })
            .await
            .map_err(DataError::from)??
        };

        let caches = Arc::new(EngineCaches::new(
            config.meta_cache_files,
            config.position_cache_files,
            config.record_cache_entries,
        ));
        let reader = Arc::new(RecordReader::new(paths.clone(), store.clone(), caches.clone()));
        let recent = Arc::new(RecentList::load(paths.recent()));

        Ok(Self {
            config,
            paths,
            store,
            caches,
            reader,
            recent,
            coordinator: IndexCoordinator::new(),
        })
    }

    /// Describe a file: its catalog entry when indexed, otherwise a
    /// preview built from a sniff and a header peek.
    pub async fn open_file_info(&self, path: &str) -> Result<CatalogEntry, EngineError> {
        validate_path(path)?;
        let source = PathBuf::from(path);
        let (size, file_id) = self.checked_source(&source).await?;

        if let Some(entry) = self.lookup(&file_id).await? {
            if self.paths.position_table(&file_id).exists() {
                return Ok(entry);
            }
            // Catalog row without its position table: stale, purge it
            warn!(%file_id, "purging stale catalog entry on open");
            self.purge(&file_id).await?;
        }

        let preview = tokio::task::spawn_blocking(move || -> Result<_, DataError> {
            let sniffed = sniff_path(&source)?;
            let columns = peek_columns(&source, sniffed)?;
            Ok((sniffed, columns))
        })
        .await
        .map_err(DataError::from)??;
        let (sniffed, columns) = preview;

        let searchable = columns
            .iter()
            .take(dx_data::sources::SEARCHABLE_COLUMNS)
            .cloned()
            .collect();
        Ok(CatalogEntry {
            file_id,
            path: path.to_string(),
            name: Path::new(path)
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or("unknown")
                .to_string(),
            size,
            format: sniffed.format,
            delimiter: sniffed.delimiter.map(|d| d.to_string()),
            indexed_at: 0,
            total_records: 0,
            columns,
            searchable_columns: searchable,
            indexed: false,
        })
    }

    pub fn list_recent(&self) -> Vec<CatalogEntry> {
        self.recent.list()
    }

    /// Drop one indexed file: store rows, on-disk artifacts, caches,
    /// pooled handle and its recent entry.
    pub async fn forget_recent(&self, file_id: &str) -> Result<(), EngineError> {
        validate_file_id(file_id)?;
        self.purge(file_id).await?;
        Ok(())
    }

    /// Remove every index artifact and empty the recent list.
    pub async fn clear_all(&self) -> Result<(), EngineError> {
        let store = self.store.clone();
        let paths = self.paths.clone();
        tokio::task::spawn_blocking(move || -> Result<(), DataError> {
            store.clear()?;
            for entry in std::fs::read_dir(paths.root())? {
                let entry = entry?;
                let name = entry.file_name().to_string_lossy().into_owned();
                if name.ends_with(".index.bin")
                    || name.ends_with(".meta.json")
                    || name.ends_with(".stats.json")
                {
                    std::fs::remove_file(entry.path())?;
                }
            }
            Ok(())
        })
        .await
        .map_err(DataError::from)??;

        self.caches.invalidate_all();
        self.reader.drop_all_handles();
        self.recent.clear().map_err(EngineError::from)?;
        Ok(())
    }

    /// Start indexing. Returns the file id and the progress event stream;
    /// the stream ends with exactly one terminal event.
    pub async fn start_index(
        &self,
        path: &str,
    ) -> Result<(String, mpsc::Receiver<IndexEvent>), EngineError> {
        validate_path(path)?;
        let source = PathBuf::from(path);
        self.checked_source(&source).await?;

        let (file_id, mut inner) = self
            .coordinator
            .start(source, self.paths.clone(), self.config.chunk_size)
            .await?;

        // Relay events so a completed index lands in the recent list and
        // flushes any cached state from a previous generation of the id
        let (tx, rx) = mpsc::channel(64);
        let caches = self.caches.clone();
        let reader = self.reader.clone();
        let recent = self.recent.clone();
        let id = file_id.clone();
        tokio::spawn(async move {
            while let Some(event) = inner.recv().await {
                if let IndexEvent::Complete { entry, .. } = &event {
                    caches.invalidate(&id);
                    reader.drop_handle(&id);
                    if let Err(e) = recent.push(entry.clone()) {
                        warn!(file_id = %id, error = %e, "recent list update failed");
                    }
                }
                if tx.send(event).await.is_err() {
                    break;
                }
            }
        });
        Ok((file_id, rx))
    }

    /// Lifecycle state of the indexing job for a file id: `Idle` when the
    /// id never had a job this session, the terminal state of its last
    /// job otherwise.
    pub fn index_state(&self, file_id: &str) -> Result<JobState, EngineError> {
        validate_file_id(file_id)?;
        Ok(self.coordinator.state(file_id))
    }

    /// Flag an active indexing job for cancellation.
    pub fn cancel_index(&self, file_id: &str) -> Result<(), EngineError> {
        validate_file_id(file_id)?;
        if self.coordinator.cancel(file_id) {
            Ok(())
        } else {
            Err(EngineError::Message(format!(
                "no active indexing job for '{}'",
                file_id
            )))
        }
    }

    /// One page of records under optional substring filters, ordered by
    /// row index.
    pub async fn page(
        &self,
        file_id: &str,
        page: u32,
        limit: u32,
        filters: &HashMap<String, String>,
    ) -> Result<PageResult, EngineError> {
        validate_file_id(file_id)?;
        validate_page(page)?;
        validate_limit(limit)?;
        validate_filters(filters)?;

        let entry = self.reader.entry(file_id).await?;
        let store = self.store.clone();
        let id = file_id.to_string();
        let query_filters = filters.clone();
        let searchable = entry.searchable_columns.clone();
        let (mut total, mut locations) = tokio::task::spawn_blocking(
            move || -> Result<(u64, Vec<RowLocation>), DataError> {
                let total = store.count(&id, &query_filters, &searchable)?;
                let rows = store.page(&id, page, limit, &query_filters, &searchable)?;
                Ok((total, rows))
            },
        )
        .await
        .map_err(DataError::from)??;

        // A legacy-imported entry has a catalog row and position table but
        // no search rows yet; an unfiltered page can still be served
        // straight from the table
        if locations.is_empty() && filters.is_empty() && entry.total_records > 0 && total == 0 {
            locations = self.page_from_positions(file_id, &entry, page, limit).await?;
            total = entry.total_records;
        }

        let records = self.resolve(file_id, &locations, None).await?;
        Ok(PageResult {
            records,
            total,
            page,
            limit,
        })
    }

    /// Operator-based search over the searchable columns.
    pub async fn search(
        &self,
        file_id: &str,
        fields: &HashMap<String, SearchField>,
        exact: bool,
        page: u32,
        limit: u32,
    ) -> Result<SearchResult, EngineError> {
        validate_file_id(file_id)?;
        validate_page(page)?;
        validate_limit(limit)?;
        let shapes: HashMap<String, String> = fields
            .iter()
            .map(|(k, f)| (k.clone(), f.value.clone()))
            .collect();
        validate_filters(&shapes)?;

        let started = Instant::now();
        let entry = self.reader.entry(file_id).await?;
        let store = self.store.clone();
        let id = file_id.to_string();
        let query_fields = fields.clone();
        let searchable = entry.searchable_columns.clone();
        let (locations, total) = tokio::task::spawn_blocking(
            move || store.search(&id, &query_fields, &searchable, page, limit),
        )
        .await
        .map_err(DataError::from)??;

        let records = self.resolve(file_id, &locations, Some(exact)).await?;
        Ok(SearchResult {
            records,
            total,
            page,
            limit,
            elapsed_ms: started.elapsed().as_millis() as u64,
        })
    }

    /// Decode a single record by row index.
    pub async fn get_record(
        &self,
        file_id: &str,
        row_index: u64,
    ) -> Result<Option<RecordMap>, EngineError> {
        validate_file_id(file_id)?;
        Ok(self.reader.read(file_id, row_index).await?)
    }

    /// Streaming statistics captured at indexing time.
    pub async fn stats(&self, file_id: &str) -> Result<FileStats, EngineError> {
        validate_file_id(file_id)?;
        let store = self.store.clone();
        let id = file_id.to_string();
        let stats = tokio::task::spawn_blocking(move || store.stats_get(&id))
            .await
            .map_err(DataError::from)??;
        stats.ok_or_else(|| EngineError::Message(format!("no statistics for '{}'", file_id)))
    }

    /// Export matching records to a user-chosen destination.
    pub async fn export(
        &self,
        file_id: &str,
        options: ExportOptions,
    ) -> Result<ExportReport, EngineError> {
        validate_file_id(file_id)?;
        if let Some(filters) = &options.filters {
            validate_filters(filters)?;
        }

        let entry = self.reader.entry(file_id).await?;
        let mut sink = ExportSink::create(options.format, &options.destination, &entry.columns)?;
        let limit = options.limit.unwrap_or(u64::MAX);
        let mut written = 0u64;
        let mut page = 1u32;

        'pages: loop {
            let store = self.store.clone();
            let id = file_id.to_string();
            let searchable = entry.searchable_columns.clone();
            let filters = options.filters.clone().unwrap_or_default();
            let search = options.search.clone();
            let locations = tokio::task::spawn_blocking(
                move || -> Result<Vec<RowLocation>, DataError> {
                    match search {
                        Some(fields) => {
                            Ok(store.search(&id, &fields, &searchable, page, EXPORT_BATCH)?.0)
                        }
                        None => store.page(&id, page, EXPORT_BATCH, &filters, &searchable),
                    }
                },
            )
            .await
            .map_err(DataError::from)??;
            let batch_len = locations.len();

            for location in &locations {
                if written >= limit {
                    break 'pages;
                }
                if let Some(record) = self.reader.read(file_id, location.row_index).await? {
                    sink.write(&record)?;
                    written += 1;
                }
            }
            if batch_len < EXPORT_BATCH as usize {
                break;
            }
            page += 1;
        }

        let records = sink.finish()?;
        Ok(ExportReport {
            records,
            destination: options.destination,
        })
    }

    /// Resolve row locations into decoded records, tagging search results
    /// with the caller's exact flag.
    async fn resolve(
        &self,
        file_id: &str,
        locations: &[RowLocation],
        exact: Option<bool>,
    ) -> Result<Vec<Option<RecordMap>>, EngineError> {
        let mut records = Vec::with_capacity(locations.len());
        for location in locations {
            let record = self.reader.read(file_id, location.row_index).await?;
            records.push(record.map(|mut r| {
                if let Some(exact) = exact {
                    r.insert("_exact".to_string(), DataValue::Bool(exact));
                }
                r
            }));
        }
        Ok(records)
    }

    async fn page_from_positions(
        &self,
        file_id: &str,
        entry: &CatalogEntry,
        page: u32,
        limit: u32,
    ) -> Result<Vec<RowLocation>, EngineError> {
        let table = self.reader.positions(file_id, entry).await?;
        let start = (page as u64 - 1) * limit as u64;
        let end = (start + limit as u64).min(entry.total_records);
        let mut locations = Vec::new();
        for row_index in start..end {
            if let Some(position) = table.get(row_index) {
                locations.push(RowLocation {
                    row_index,
                    position,
                });
            }
        }
        Ok(locations)
    }

    async fn lookup(&self, file_id: &str) -> Result<Option<CatalogEntry>, EngineError> {
        let store = self.store.clone();
        let id = file_id.to_string();
        Ok(tokio::task::spawn_blocking(move || store.catalog_get(&id))
            .await
            .map_err(DataError::from)??)
    }

    /// Validate that the source exists and is a regular file; returns its
    /// size and fingerprint.
    async fn checked_source(&self, source: &Path) -> Result<(u64, String), EngineError> {
        let source = source.to_path_buf();
        tokio::task::spawn_blocking(move || -> Result<(u64, String), EngineError> {
            let meta = std::fs::metadata(&source)
                .map_err(|_| EngineError::validation(format!("file '{}' does not exist", source.display())))?;
            if !meta.is_file() {
                return Err(EngineError::validation(format!(
                    "'{}' is not a regular file",
                    source.display()
                )));
            }
            let file_id = fingerprint_file(&source).map_err(DataError::from)?;
            Ok((meta.len(), file_id))
        })
        .await
        .map_err(DataError::from)?
    }

    async fn purge(&self, file_id: &str) -> Result<(), EngineError> {
        let store = self.store.clone();
        let paths = self.paths.clone();
        let id = file_id.to_string();
        tokio::task::spawn_blocking(move || -> Result<(), DataError> {
            store.remove_file(&id)?;
            paths.remove_artifacts(&id)?;
            Ok(())
        })
        .await
        .map_err(DataError::from)??;

        self.caches.invalidate(file_id);
        self.reader.drop_handle(file_id);
        self.recent.remove(file_id)?;
        Ok(())
    }
}

/// Discover column names from the head of an unindexed file.
fn peek_columns(
    source: &Path,
    sniffed: dx_data::sniff::SniffResult,
) -> Result<Vec<String>, DataError> {
    use std::io::Read;
    let mut head = vec![0u8; PREVIEW_BYTES];
    let mut file = std::fs::File::open(source)?;
    let mut filled = 0;
    while filled < head.len() {
        let n = file.read(&mut head[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    head.truncate(filled);

    let mut scanner = scanner_for(sniffed.format, sniffed.delimiter);
    let mut discard = Vec::new();
    scanner.feed(&head, 0, &mut discard);
    scanner.finish(&mut discard);
    Ok(scanner.columns().unwrap_or_default().to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use dx_core::types::{FileFormat, SearchOperator};
    use tempfile::TempDir;

    struct Fixture {
        dir: TempDir,
        engine: Engine,
    }

    async fn fixture() -> Fixture {
        fixture_with_chunk(dx_data::config::DEFAULT_CHUNK_SIZE).await
    }

    async fn fixture_with_chunk(chunk_size: usize) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let mut config = EngineConfig::with_data_dir(dir.path().join("indexes"));
        config.chunk_size = chunk_size;
        let engine = Engine::new(config).await.unwrap();
        Fixture { dir, engine }
    }

    impl Fixture {
        fn write_source(&self, name: &str, contents: &[u8]) -> String {
            let path = self.dir.path().join(name);
            std::fs::write(&path, contents).unwrap();
            path.to_string_lossy().into_owned()
        }

        async fn index(&self, path: &str) -> CatalogEntry {
            let (_, mut rx) = self.engine.start_index(path).await.unwrap();
            loop {
                match rx.recv().await.expect("stream ended without terminal") {
                    IndexEvent::Complete { entry, .. } => return entry,
                    IndexEvent::Error(e) => panic!("indexing failed: {}", e),
                    IndexEvent::Cancelled => panic!("indexing cancelled"),
                    IndexEvent::Progress(_) => {}
                }
            }
        }
    }

    fn contains(value: &str) -> SearchField {
        SearchField {
            value: value.to_string(),
            operator: SearchOperator::Contains,
        }
    }

    fn text(record: &RecordMap, key: &str) -> String {
        record.get(key).expect(key).to_text()
    }

    #[tokio::test]
    async fn test_csv_with_quotes_and_commas() {
        let fx = fixture().await;
        let path = fx.write_source("people.csv", b"name,email\n\"Doe, John\",\"a@x\"\nJane,b@y");
        let entry = fx.index(&path).await;

        assert_eq!(entry.total_records, 2);
        assert_eq!(entry.columns, vec!["name", "email"]);

        let table_bytes =
            std::fs::read(fx.dir.path().join("indexes").join(format!("{}.index.bin", entry.file_id)))
                .unwrap();
        let mut expected = Vec::new();
        for offset in [11u64, 29] {
            expected.extend_from_slice(&offset.to_le_bytes()[..6]);
        }
        assert_eq!(table_bytes, expected);

        let record = fx.engine.get_record(&entry.file_id, 0).await.unwrap().unwrap();
        assert_eq!(text(&record, "name"), "Doe, John");
        assert_eq!(text(&record, "email"), "a@x");
        assert_eq!(record.get("_index"), Some(&DataValue::Int(0)));

        let mut fields = HashMap::new();
        fields.insert("name".to_string(), contains("doe"));
        let result = fx.engine.search(&entry.file_id, &fields, false, 1, 10).await.unwrap();
        assert_eq!(result.total, 1);
        let hit = result.records[0].as_ref().unwrap();
        assert_eq!(hit.get("_index"), Some(&DataValue::Int(0)));
        assert_eq!(hit.get("_exact"), Some(&DataValue::Bool(false)));
    }

    #[tokio::test]
    async fn test_ndjson_paging_and_filters() {
        let fx = fixture().await;
        let path = fx.write_source(
            "events.json",
            b"{\"u\":\"al\",\"n\":1,\"meta\":{\"x\":1}}\n{\"u\":\"bo\",\"n\":2}\n",
        );
        let entry = fx.index(&path).await;
        assert_eq!(entry.columns, vec!["u", "n"]);

        let result = fx
            .engine
            .page(&entry.file_id, 1, 10, &HashMap::new())
            .await
            .unwrap();
        assert_eq!(result.total, 2);
        let indexes: Vec<i64> = result
            .records
            .iter()
            .map(|r| match r.as_ref().unwrap().get("_index") {
                Some(DataValue::Int(i)) => *i,
                _ => panic!("missing _index"),
            })
            .collect();
        assert_eq!(indexes, vec![0, 1]);

        let mut filters = HashMap::new();
        filters.insert("u".to_string(), "bo".to_string());
        let result = fx.engine.page(&entry.file_id, 1, 10, &filters).await.unwrap();
        assert_eq!(result.total, 1);
        let hit = result.records[0].as_ref().unwrap();
        assert_eq!(text(hit, "u"), "bo");
        assert_eq!(hit.get("n"), Some(&DataValue::Int(2)));
    }

    #[tokio::test]
    async fn test_json_array_with_escaped_braces() {
        let fx = fixture().await;
        let path = fx.write_source("data.json", br#"[ {"s":"a}b","n":1}, {"s":"{","n":2} ]"#);
        let entry = fx.index(&path).await;
        assert_eq!(entry.total_records, 2);

        let table = std::fs::read(
            fx.dir.path().join("indexes").join(format!("{}.index.bin", entry.file_id)),
        )
        .unwrap();
        assert_eq!(table[0], 2); // first object brace
        assert_eq!(table[6], 21); // second object brace

        let record = fx.engine.get_record(&entry.file_id, 1).await.unwrap().unwrap();
        assert_eq!(text(&record, "s"), "{");
        assert_eq!(record.get("n"), Some(&DataValue::Int(2)));
        assert_eq!(record.get("_index"), Some(&DataValue::Int(1)));
    }

    #[tokio::test]
    async fn test_vcard_continuation_and_multi_email() {
        let fx = fixture().await;
        let path = fx.write_source(
            "contacts.vcf",
            b"BEGIN:VCARD\nFN:Al\n Pha\nEMAIL:a@x\nEMAIL:b@y\nEND:VCARD\n",
        );
        let entry = fx.index(&path).await;
        assert_eq!(entry.total_records, 1);

        let record = fx.engine.get_record(&entry.file_id, 0).await.unwrap().unwrap();
        assert_eq!(text(&record, "FN"), "Al Pha");
        assert_eq!(text(&record, "EMAIL"), "a@x, b@y");
    }

    #[tokio::test]
    async fn test_cancellation_leaves_nothing_behind() {
        let fx = fixture_with_chunk(4096).await;
        let mut contents = String::from("name,email\n");
        for i in 0..200_000 {
            contents.push_str(&format!("user{i},u{i}@example.com\n"));
        }
        let path = fx.write_source("big.csv", contents.as_bytes());

        let (file_id, mut rx) = fx.engine.start_index(&path).await.unwrap();
        // Cancel after the first progress event
        let terminal = loop {
            match rx.recv().await.expect("stream ended early") {
                IndexEvent::Progress(_) => {
                    let _ = fx.engine.cancel_index(&file_id);
                }
                event => break event,
            }
        };
        assert!(matches!(terminal, IndexEvent::Cancelled));
        assert_eq!(fx.engine.index_state(&file_id).unwrap(), JobState::Cancelled);

        let index_dir = fx.dir.path().join("indexes");
        assert!(!index_dir.join(format!("{}.index.bin", file_id)).exists());
        let info = fx.engine.open_file_info(&path).await.unwrap();
        assert!(!info.indexed);
        let page = fx.engine.page(&file_id, 1, 10, &HashMap::new()).await;
        assert!(page.is_err());
    }

    #[tokio::test]
    async fn test_search_operators() {
        let fx = fixture().await;
        let path = fx.write_source("names.csv", b"name\nalice\nalicia\nbob\n");
        let entry = fx.index(&path).await;

        let expect = |value: &str, operator: SearchOperator| {
            let mut fields = HashMap::new();
            fields.insert(
                "name".to_string(),
                SearchField {
                    value: value.to_string(),
                    operator,
                },
            );
            fields
        };

        let cases = [
            ("alice", SearchOperator::Equals, 1),
            ("ali", SearchOperator::StartsWith, 2),
            ("ce", SearchOperator::EndsWith, 1),
            ("ali", SearchOperator::Not, 1),
            ("^ali.*", SearchOperator::Regex, 2),
        ];
        for (value, operator, total) in cases {
            let result = fx
                .engine
                .search(&entry.file_id, &expect(value, operator), true, 1, 10)
                .await
                .unwrap();
            assert_eq!(result.total, total, "{:?} {}", operator, value);
        }
    }

    #[tokio::test]
    async fn test_search_with_empty_values_is_empty() {
        let fx = fixture().await;
        let path = fx.write_source("names.csv", b"name\nalice\n");
        let entry = fx.index(&path).await;

        let mut fields = HashMap::new();
        fields.insert("name".to_string(), contains(""));
        let result = fx.engine.search(&entry.file_id, &fields, false, 1, 10).await.unwrap();
        assert_eq!(result.total, 0);
        assert!(result.records.is_empty());
    }

    #[tokio::test]
    async fn test_forget_recent_round_trip() {
        let fx = fixture().await;
        let path = fx.write_source("names.csv", b"name\nalice\n");
        let entry = fx.index(&path).await;

        let info = fx.engine.open_file_info(&path).await.unwrap();
        assert!(info.indexed);
        assert_eq!(fx.engine.list_recent().len(), 1);

        fx.engine.forget_recent(&entry.file_id).await.unwrap();

        let info = fx.engine.open_file_info(&path).await.unwrap();
        assert!(!info.indexed);
        assert!(fx.engine.list_recent().is_empty());
        let residue: Vec<_> = std::fs::read_dir(fx.dir.path().join("indexes"))
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .filter(|n| n.starts_with(&entry.file_id))
            .collect();
        assert!(residue.is_empty(), "found {:?}", residue);
    }

    #[tokio::test]
    async fn test_open_file_info_previews_unindexed() {
        let fx = fixture().await;
        let path = fx.write_source("fresh.csv", b"a;b;c\n1;2;3\n");
        let info = fx.engine.open_file_info(&path).await.unwrap();
        assert!(!info.indexed);
        assert_eq!(info.format, FileFormat::Csv);
        assert_eq!(info.delimiter.as_deref(), Some(";"));
        assert_eq!(info.columns, vec!["a", "b", "c"]);
        assert_eq!(info.total_records, 0);
    }

    #[tokio::test]
    async fn test_validation_errors() {
        let fx = fixture().await;
        let err = fx.engine.open_file_info("notes.txt").await.unwrap_err();
        assert!(err.to_string().starts_with("Validation error:"));

        let missing = fx.dir.path().join("missing.csv");
        let err = fx
            .engine
            .open_file_info(missing.to_str().unwrap())
            .await
            .unwrap_err();
        assert!(err.to_string().starts_with("Validation error:"));

        assert!(fx.engine.page("nothex", 1, 10, &HashMap::new()).await.is_err());
        assert!(fx
            .engine
            .page("aaaabbbbccccdddd", 0, 10, &HashMap::new())
            .await
            .is_err());
        assert!(fx
            .engine
            .page("aaaabbbbccccdddd", 1, 1001, &HashMap::new())
            .await
            .is_err());
        assert!(fx.engine.cancel_index("aaaabbbbccccdddd").is_err());
        assert!(fx.engine.index_state("nothex").is_err());
        assert_eq!(
            fx.engine.index_state("aaaabbbbccccdddd").unwrap(),
            JobState::Idle
        );
    }

    #[tokio::test]
    async fn test_reindex_is_idempotent() {
        let fx = fixture().await;
        let path = fx.write_source("names.csv", b"name\nalice\nbob\n");
        let first = fx.index(&path).await;
        let table_path = fx
            .dir
            .path()
            .join("indexes")
            .join(format!("{}.index.bin", first.file_id));
        let bytes_first = std::fs::read(&table_path).unwrap();

        assert_eq!(fx.engine.index_state(&first.file_id).unwrap(), JobState::Complete);

        let second = fx.index(&path).await;
        assert_eq!(first.file_id, second.file_id);
        assert_eq!(first.total_records, second.total_records);
        assert_eq!(first.columns, second.columns);
        assert_eq!(first.searchable_columns, second.searchable_columns);
        assert_eq!(bytes_first, std::fs::read(&table_path).unwrap());
        // Still exactly one recent entry
        assert_eq!(fx.engine.list_recent().len(), 1);
    }

    #[tokio::test]
    async fn test_stats_endpoint() {
        let fx = fixture().await;
        let path = fx.write_source("cities.csv", b"city\noslo\noslo\nbergen\n");
        let entry = fx.index(&path).await;

        let stats = fx.engine.stats(&entry.file_id).await.unwrap();
        assert_eq!(stats.columns[0].name, "city");
        assert_eq!(stats.columns[0].distinct_values, 2);
        assert_eq!(stats.columns[0].top_values[0].value, "oslo");

        assert!(fx.engine.stats("aaaabbbbccccdddd").await.is_err());
    }

    #[tokio::test]
    async fn test_export_csv_with_filter() {
        let fx = fixture().await;
        let path = fx.write_source("names.csv", b"name,email\nalice,a@x\nbob,b@y\n");
        let entry = fx.index(&path).await;

        let dest = fx.dir.path().join("out.csv");
        let mut filters = HashMap::new();
        filters.insert("name".to_string(), "ali".to_string());
        let report = fx
            .engine
            .export(
                &entry.file_id,
                ExportOptions {
                    format: crate::ExportFormat::Csv,
                    destination: dest.clone(),
                    filters: Some(filters),
                    search: None,
                    limit: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(report.records, 1);
        let written = std::fs::read_to_string(&dest).unwrap();
        assert_eq!(written, "name,email\nalice,a@x\n");
    }

    #[tokio::test]
    async fn test_export_json_with_limit() {
        let fx = fixture().await;
        let path = fx.write_source("names.csv", b"name\nalice\nbob\ncarol\n");
        let entry = fx.index(&path).await;

        let dest = fx.dir.path().join("out.json");
        let report = fx
            .engine
            .export(
                &entry.file_id,
                ExportOptions {
                    format: crate::ExportFormat::Json,
                    destination: dest.clone(),
                    filters: None,
                    search: None,
                    limit: Some(2),
                },
            )
            .await
            .unwrap();
        assert_eq!(report.records, 2);
        let written = std::fs::read_to_string(&dest).unwrap();
        assert_eq!(written, r#"[{"name":"alice"},{"name":"bob"}]"#);
    }

    #[tokio::test]
    async fn test_legacy_entry_pages_from_position_table() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("names.csv");
        std::fs::write(&source, b"name\nalice\nbob\n").unwrap();

        // Artifacts as an earlier release would have left them: a meta
        // json and a position table, no search.db rows
        let index_dir = dir.path().join("indexes");
        let paths = IndexPaths::new(&index_dir);
        paths.ensure().unwrap();
        let file_id = "1234abcd5678ef90";
        dx_data::postable::write_table(&paths.position_table(file_id), &[5, 11]).unwrap();
        let legacy = CatalogEntry {
            file_id: file_id.to_string(),
            path: source.to_string_lossy().into_owned(),
            name: "names.csv".to_string(),
            size: std::fs::metadata(&source).unwrap().len(),
            format: FileFormat::Csv,
            delimiter: Some(",".to_string()),
            indexed_at: 1_600_000_000_000,
            total_records: 2,
            columns: vec!["name".to_string()],
            searchable_columns: vec!["name".to_string()],
            indexed: true,
        };
        std::fs::write(
            paths.legacy_meta(file_id),
            serde_json::to_string(&legacy).unwrap(),
        )
        .unwrap();

        let engine = Engine::new(EngineConfig::with_data_dir(&index_dir)).await.unwrap();
        let result = engine.page(file_id, 1, 10, &HashMap::new()).await.unwrap();
        assert_eq!(result.total, 2);
        assert_eq!(result.records.len(), 2);
        assert_eq!(
            text(result.records[0].as_ref().unwrap(), "name"),
            "alice"
        );
        assert_eq!(text(result.records[1].as_ref().unwrap(), "name"), "bob");
    }

    #[tokio::test]
    async fn test_clear_all() {
        let fx = fixture().await;
        let a = fx.write_source("a.csv", b"x\n1\n");
        let b = fx.write_source("b.csv", b"y\n2\n");
        let entry_a = fx.index(&a).await;
        fx.index(&b).await;

        fx.engine.clear_all().await.unwrap();
        assert!(fx.engine.list_recent().is_empty());
        assert!(fx.engine.page(&entry_a.file_id, 1, 10, &HashMap::new()).await.is_err());
        let leftovers: Vec<_> = std::fs::read_dir(fx.dir.path().join("indexes"))
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .filter(|n| n.ends_with(".index.bin"))
            .collect();
        assert!(leftovers.is_empty());
    }
}
