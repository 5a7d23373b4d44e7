use rowsheet_model::{CellValue, Range, Record, ROW_NUMBER_FIELD};
use std::collections::BTreeSet;

use crate::cache::{join_key, CacheStats, KeyPart, PrimaryKeyIndex, RowCache};
use crate::config::TableOptions;
use crate::error::{Result, TableError};
use crate::header::HeaderResolver;
use crate::model::{FromRecord, SaveItem};
use crate::query::Query;
use crate::retry::retry_with_backoff;
use crate::store::{BackingStore, SheetDirectory, StoreError};
use crate::writer::{apply_diff, FieldChange, WritePlan, WriteStrategy};

/// Outcome of [`Table::save`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SaveReport {
    /// Rows queued for appending.
    pub appended: usize,
    /// Existing rows with at least one changed cell.
    pub updated: usize,
    /// Range writes issued against the store.
    pub write_ops: usize,
    /// Set when the table was in deferred mode and nothing was written.
    pub deferred: bool,
}

/// A keyed record store over one sheet of a [`BackingStore`].
///
/// The table owns its row cache and primary-key index. Every method takes `&mut self` (even
/// reads populate the cache), so a handle is used from one thread at a time.
#[derive(Debug)]
pub struct Table<S: BackingStore> {
    store: S,
    options: TableOptions,
    header: HeaderResolver,
    cache: RowCache,
    /// Primary-key fields, physical names.
    key_fields: Vec<String>,
    /// Read-only fields, physical names.
    read_only: BTreeSet<String>,
    deferred: bool,
    has_read: bool,
}

impl<S: BackingStore> Table<S> {
    pub fn new(store: S, options: TableOptions) -> Result<Self> {
        options.validate()?;
        let key_fields = options
            .primary_key
            .iter()
            .map(|field| options.physical(field).to_string())
            .collect();
        let read_only = options
            .read_only
            .iter()
            .map(|field| options.physical(field).to_string())
            .collect();
        Ok(Self {
            header: HeaderResolver::new(options.header_row, options.aliases.clone()),
            cache: RowCache::new(
                options.header_row,
                PrimaryKeyIndex::new(options.key_separator.clone()),
            ),
            store,
            options,
            key_fields,
            read_only,
            deferred: false,
            has_read: false,
        })
    }

    /// Locate `options.sheet_name` in `directory` and open it.
    ///
    /// Transient discovery failures are retried according to `options.retry`; when the
    /// attempts run out the last failure is returned inside [`TableError::Unavailable`].
    pub fn open<D>(directory: &D, options: TableOptions) -> Result<Self>
    where
        D: SheetDirectory<Sheet = S>,
    {
        const OP: &str = "open table";
        options.validate()?;
        let sheet = retry_with_backoff(&options.retry, StoreError::is_transient, || {
            directory.locate(&options.sheet_name)
        })
        .map_err(|failure| {
            if failure.source.is_transient() {
                TableError::Unavailable {
                    operation: OP,
                    sheet: options.sheet_name.clone(),
                    attempts: failure.attempts,
                    source: failure.source,
                }
            } else {
                TableError::Store {
                    operation: OP,
                    source: failure.source,
                }
            }
        })?;
        log::debug!("opened sheet `{}`", options.sheet_name);
        Self::new(sheet, options)
    }

    pub fn options(&self) -> &TableOptions {
        &self.options
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Direct access to the store. Call [`Table::invalidate`] after changing it behind the
    /// table's back if the change must be visible before the cache expires.
    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    pub fn into_store(self) -> S {
        self.store
    }

    pub fn stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Move the header row. Only allowed before the first read.
    pub fn set_header_row(&mut self, row: u32) -> Result<()> {
        const OP: &str = "set header row";
        if row == 0 {
            return Err(TableError::config(OP, "header row must be a positive integer, got 0"));
        }
        if row == self.options.header_row {
            return Ok(());
        }
        if self.has_read {
            return Err(TableError::config(
                OP,
                format!(
                    "header row of `{}` is already {} and cannot change after the first read",
                    self.store.sheet_name(),
                    self.options.header_row
                ),
            ));
        }
        self.options.header_row = row;
        self.header = HeaderResolver::new(row, self.options.aliases.clone());
        self.cache = RowCache::new(row, PrimaryKeyIndex::new(self.options.key_separator.clone()));
        Ok(())
    }

    /// In deferred mode `save` and `set` plan their changes but never write them.
    pub fn set_deferred(&mut self, deferred: bool) {
        self.deferred = deferred;
    }

    pub fn is_deferred(&self) -> bool {
        self.deferred
    }

    /// Drop every cached row, the index, the header memo and the formula-column set.
    pub fn invalidate(&mut self) {
        log::debug!("`{}`: cache invalidated", self.store.sheet_name());
        self.cache.invalidate();
        self.header.invalidate();
    }

    /// Drop rows and the formula-column set, keeping the header memo.
    fn invalidate_rows(&mut self) {
        self.cache.invalidate();
        self.header.clear_formula_columns();
    }

    fn expire_stale_cache(&mut self) {
        if !self.cache.is_empty() && self.cache.is_stale(self.options.cache_ttl()) {
            log::debug!("`{}`: cache older than {:?}", self.store.sheet_name(), self.options.cache_ttl());
            self.invalidate();
        }
    }

    pub fn is_cache_complete(&self) -> Result<bool> {
        let last_row = self
            .store
            .last_row()
            .map_err(TableError::store("check cache"))?;
        Ok(self.cache.is_complete(last_row))
    }

    /// Read every row of the sheet in one range read and rebuild the index.
    pub fn cache_all(&mut self) -> Result<()> {
        const OP: &str = "cache all rows";
        let last_row = self.store.last_row().map_err(TableError::store(OP))?;
        let last_column = self.store.last_column().map_err(TableError::store(OP))?;
        let rows = match Range::from_dimensions(1, 1, last_row, last_column) {
            Some(range) => self.store.get_range(range).map_err(TableError::store(OP))?,
            None => Vec::new(),
        };
        log::debug!(
            "`{}`: full load of {last_row} row(s) x {last_column} column(s)",
            self.store.sheet_name()
        );
        self.cache.replace_all(rows);
        if let Some(header) = self.cache.row(self.options.header_row) {
            self.header.set_names(header);
        }
        self.ensure_header(OP)?;
        self.cache.rebuild_index();
        Ok(())
    }

    fn cache_all_if_incomplete(&mut self) -> Result<()> {
        if !self.is_cache_complete()? {
            self.cache_all()?;
        }
        Ok(())
    }

    /// Load the header if needed and lay out the primary key over it.
    fn ensure_header(&mut self, operation: &'static str) -> Result<()> {
        self.header
            .load(&self.store)
            .map_err(TableError::store(operation))?;
        let parts = self
            .key_fields
            .iter()
            .map(|field| {
                if field == ROW_NUMBER_FIELD {
                    return Ok(KeyPart::RowNumber);
                }
                self.header
                    .physical_position(field)
                    .map(KeyPart::Column)
                    .ok_or_else(|| {
                        TableError::config(
                            operation,
                            format!(
                                "primary key field `{field}` is not a column of `{}`",
                                self.store.sheet_name()
                            ),
                        )
                    })
            })
            .collect::<Result<Vec<_>>>()?;
        self.cache.set_key_parts(parts);
        self.has_read = true;
        Ok(())
    }

    /// Cached or freshly fetched contents of `row`; `None` when the row holds no data.
    fn fetch_row(&mut self, operation: &'static str, row: u32) -> Result<Option<Vec<CellValue>>> {
        if let Some(data) = self.cache.row(row) {
            return Ok(has_data(data).then(|| data.to_vec()));
        }
        let Some(range) = Range::from_dimensions(row, 1, 1, self.header.width()) else {
            return Ok(None);
        };
        let data = self
            .store
            .get_range(range)
            .map_err(TableError::store(operation))?
            .into_iter()
            .next()
            .unwrap_or_default();
        self.cache.stats_mut().row_fetches += 1;
        if !has_data(&data) {
            return Ok(None);
        }
        self.cache.cache_row(row, data.clone());
        Ok(Some(data))
    }

    /// 1-based column of a (possibly aliased) field, if the header has it.
    pub fn column_position(&mut self, field: &str) -> Result<Option<u32>> {
        self.ensure_header("column position")?;
        Ok(self.header.column_position(field))
    }

    /// Header name at a 1-based column.
    pub fn column_name(&mut self, col: u32) -> Result<String> {
        const OP: &str = "column name";
        self.ensure_header(OP)?;
        self.header
            .column_name(col)
            .map(str::to_string)
            .ok_or_else(|| {
                TableError::lookup(
                    OP,
                    format!(
                        "column {col} is outside the header of `{}` (1..={})",
                        self.store.sheet_name(),
                        self.header.width()
                    ),
                )
            })
    }

    /// Physical header names, in column order.
    pub fn headers(&mut self) -> Result<Vec<String>> {
        self.ensure_header("read header")?;
        Ok(self.header.names().to_vec())
    }

    /// Project stored row data into a logical record (aliased names, row number set).
    ///
    /// Uses the memoized header; columns with a blank header cell are dropped.
    pub fn record_from_row(&self, row: u32, data: &[CellValue]) -> Record {
        let mut record = Record::new().with_row_number(row);
        for (idx, name) in self.header.names().iter().enumerate() {
            if name.is_empty() {
                continue;
            }
            let value = data.get(idx).cloned().unwrap_or_default().normalized();
            record.insert(self.header.logical_name(name), value);
        }
        record
    }

    /// Lay a logical record out as a full row in header order. Unknown fields are dropped.
    pub fn row_data_for_record(&mut self, record: &Record) -> Result<Vec<CellValue>> {
        self.ensure_header("project record")?;
        let physical = self.to_physical(record.clone());
        Ok(self.physical_row(&physical))
    }

    fn to_physical(&self, record: Record) -> Record {
        let row_number = record.row_number;
        let mut physical: Record = record
            .into_fields()
            .into_iter()
            .map(|(field, value)| (self.options.physical(&field).to_string(), value))
            .collect();
        physical.row_number = row_number;
        physical
    }

    fn physical_row(&self, record: &Record) -> Vec<CellValue> {
        let mut data = vec![CellValue::Empty; self.header.width() as usize];
        for (field, value) in record {
            if field == ROW_NUMBER_FIELD {
                continue;
            }
            match self.header.physical_position(field) {
                Some(col) => data[col as usize - 1] = value.clone().normalized(),
                None => log::debug!(
                    "`{}`: dropping field `{field}` with no column",
                    self.store.sheet_name()
                ),
            }
        }
        data
    }

    /// Rows matching a query over physical field names.
    ///
    /// A query pinning every key field goes through the index: a miss against an incomplete
    /// cache reloads everything and looks up once more. Anything else scans the full cache.
    fn locate_rows(&mut self, operation: &'static str, query: &Query, limit: usize) -> Result<Vec<u32>> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        if let Some(segments) = query.key_segments(&self.key_fields) {
            let key = join_key(segments, &self.options.key_separator);
            for attempt in 0..2 {
                let hit = self.cache.lookup(&key).filter(|&row| {
                    self.cache.row(row).is_some_and(|data| {
                        query.matches_row(row, data, |field| self.header.physical_position(field))
                    })
                });
                if let Some(row) = hit {
                    self.cache.stats_mut().index_hits += 1;
                    log::debug!("`{}`: key `{key}` -> row {row}", self.store.sheet_name());
                    return Ok(vec![row]);
                }
                self.cache.stats_mut().index_misses += 1;
                if attempt > 0 || self.is_cache_complete()? {
                    break;
                }
                log::debug!(
                    "`{}`: key `{key}` not cached; reloading",
                    self.store.sheet_name()
                );
                self.cache_all()?;
            }
            return Ok(Vec::new());
        }

        self.cache_all_if_incomplete()?;
        let header = &self.header;
        let rows = self
            .cache
            .data_rows()
            .filter(|(row, data)| {
                has_data(data) && query.matches_row(*row, data, |field| header.physical_position(field))
            })
            .map(|(row, _)| row)
            .take(limit)
            .collect::<Vec<_>>();
        log::debug!(
            "`{}`: {operation} scan matched {} row(s)",
            self.store.sheet_name(),
            rows.len()
        );
        Ok(rows)
    }

    /// Records matching `query`, at most `limit` (default: the configured scan limit).
    ///
    /// With a `hint` only that row is considered: an empty query returns it unconditionally
    /// (failing when it is not a data row or holds nothing), otherwise it is returned only if
    /// it matches.
    pub fn read(&mut self, query: Query, hint: Option<u32>, limit: Option<usize>) -> Result<Vec<Record>> {
        const OP: &str = "read";
        self.expire_stale_cache();
        self.ensure_header(OP)?;

        if let Some(row) = hint {
            if query.is_empty() {
                return Ok(vec![self.read_row(row)?]);
            }
            self.check_data_row(OP, row)?;
            let query = query.rename_fields(|field| self.options.physical(field).to_string());
            return Ok(match self.fetch_row(OP, row)? {
                Some(data)
                    if query.matches_row(row, &data, |field| self.header.physical_position(field)) =>
                {
                    vec![self.record_from_row(row, &data)]
                }
                _ => Vec::new(),
            });
        }

        let query = query.rename_fields(|field| self.options.physical(field).to_string());
        let limit = limit.unwrap_or(self.options.scan_limit);
        let rows = self.locate_rows(OP, &query, limit)?;
        Ok(rows
            .into_iter()
            .filter_map(|row| self.cache.row(row).map(|data| self.record_from_row(row, data)))
            .collect())
    }

    /// First record matching `query`.
    pub fn find(&mut self, query: Query) -> Result<Option<Record>> {
        Ok(self.read(query, None, Some(1))?.into_iter().next())
    }

    /// The record stored at `row`.
    pub fn read_row(&mut self, row: u32) -> Result<Record> {
        const OP: &str = "read row";
        self.expire_stale_cache();
        self.ensure_header(OP)?;
        self.check_data_row(OP, row)?;
        let data = self.fetch_row(OP, row)?.ok_or_else(|| {
            TableError::lookup(
                OP,
                format!("row {row} of `{}` holds no data", self.store.sheet_name()),
            )
        })?;
        Ok(self.record_from_row(row, &data))
    }

    /// [`Table::read`], materialized into domain values that start observing changes.
    pub fn read_as<T: FromRecord>(
        &mut self,
        query: Query,
        hint: Option<u32>,
        limit: Option<usize>,
    ) -> Result<Vec<T>> {
        self.read(query, hint, limit)?
            .into_iter()
            .map(|record| {
                let mut value = T::from_record(record).map_err(|source| TableError::Validation {
                    operation: "read as",
                    source,
                })?;
                value.observe();
                Ok(value)
            })
            .collect()
    }

    fn check_data_row(&self, operation: &'static str, row: u32) -> Result<()> {
        if row <= self.options.header_row {
            return Err(TableError::lookup(
                operation,
                format!(
                    "row {row} is not a data row of `{}` (header is row {})",
                    self.store.sheet_name(),
                    self.options.header_row
                ),
            ));
        }
        Ok(())
    }

    /// Write a batch of records or models.
    ///
    /// Each item is matched to an existing row (row-number hint first, then the primary key)
    /// and diffed against it; unmatched items are appended. Every check runs before the first
    /// write, so a failing batch leaves the store untouched.
    pub fn save<'a, I>(&mut self, items: I) -> Result<SaveReport>
    where
        I: IntoIterator,
        I::Item: Into<SaveItem<'a>>,
    {
        const OP: &str = "save";
        if self.cache.is_stale(self.options.cache_ttl()) {
            self.invalidate();
        }
        self.ensure_header(OP)?;

        let records = items
            .into_iter()
            .map(|item| {
                let item: SaveItem<'a> = item.into();
                let record = item
                    .into_record(
                        |field| self.header.column_position(field).is_some(),
                        |field| self.options.primary_key.iter().any(|key| key == field),
                    )
                    .map_err(|source| TableError::Validation {
                        operation: OP,
                        source,
                    })?;
                Ok(self.to_physical(record))
            })
            .collect::<Result<Vec<_>>>()?;
        if records.is_empty() {
            return Ok(SaveReport {
                deferred: self.deferred,
                ..SaveReport::default()
            });
        }

        let strategy = WriteStrategy::for_batch(records.len(), self.options.bulk_threshold);
        if strategy == WriteStrategy::Bulk {
            self.cache_all_if_incomplete()?;
        }
        let formula_columns = self
            .header
            .formula_columns(&self.store)
            .map_err(TableError::store(OP))?;

        let mut plan = WritePlan::new();
        plan.suppress_columns(&formula_columns);
        if let Err(err) = self.plan_writes(&records, &mut plan) {
            self.invalidate_rows();
            return Err(err);
        }

        let mut report = SaveReport {
            appended: plan.appends().len(),
            updated: plan.updates().len(),
            write_ops: 0,
            deferred: self.deferred,
        };
        if plan.is_empty() {
            log::debug!("`{}`: nothing to save", self.store.sheet_name());
            return Ok(report);
        }
        if self.deferred {
            log::warn!(
                "`{}`: deferred mode, skipping {} append(s) and {} update(s)",
                self.store.sheet_name(),
                report.appended,
                report.updated
            );
            self.invalidate_rows();
            return Ok(report);
        }

        let result = self.write_plan(&plan, strategy, formula_columns.is_empty());
        match result {
            Ok(write_ops) => report.write_ops = write_ops,
            Err(err) => {
                self.invalidate_rows();
                return Err(err);
            }
        }
        Ok(report)
    }

    /// Diff every record against its target row. Rows changed earlier in the batch are diffed
    /// in their queued form, and survive a full reload triggered by a later key miss.
    fn plan_writes(&mut self, records: &[Record], plan: &mut WritePlan) -> Result<()> {
        for record in records {
            let loads = self.cache.stats().full_loads;
            let target = self.resolve_target(record)?;
            if self.cache.stats().full_loads != loads {
                for (row, data) in plan.updates() {
                    self.cache.cache_row(*row, data.clone());
                }
            }
            let Some(row) = target else {
                plan.push_append(self.physical_row(record));
                continue;
            };
            let changes: Vec<FieldChange> = record
                .iter()
                .filter(|(field, _)| field.as_str() != ROW_NUMBER_FIELD)
                .filter_map(|(field, value)| {
                    let col = self.header.physical_position(field)?;
                    Some(FieldChange {
                        field: field.clone(),
                        col,
                        value: value.clone().normalized(),
                        primary_key: self.key_fields.contains(field),
                        read_only: self.read_only.contains(field),
                    })
                })
                .collect();
            let mut data = plan
                .staged(row)
                .or_else(|| self.cache.row(row))
                .map(<[CellValue]>::to_vec)
                .unwrap_or_default();
            if let Some(span) = apply_diff(row, &mut data, &changes)? {
                self.cache.cache_row(row, data.clone());
                plan.push_update(row, data, span);
            }
        }
        Ok(())
    }

    /// Row a record should update, or `None` to append it.
    fn resolve_target(&mut self, record: &Record) -> Result<Option<u32>> {
        const OP: &str = "save";
        if let Some(row) = record.row_number {
            self.check_data_row(OP, row)?;
            return match self.fetch_row(OP, row)? {
                Some(_) => Ok(Some(row)),
                None => Err(TableError::lookup(
                    OP,
                    format!(
                        "row {row} of `{}` holds no record to update",
                        self.store.sheet_name()
                    ),
                )),
            };
        }

        let present: Vec<String> = self
            .key_fields
            .iter()
            .filter(|field| record.get(field).is_some_and(|value| !value.is_empty()))
            .cloned()
            .collect();
        if present.is_empty() {
            if self.key_fields.iter().all(|field| field == ROW_NUMBER_FIELD) {
                return Ok(None);
            }
            return Err(TableError::lookup(
                OP,
                format!(
                    "record has no row number and no value for primary key {:?}",
                    self.key_fields
                ),
            ));
        }

        let full_key = present.len() == self.key_fields.len();
        let query = present.iter().fold(Query::new(), |query, field| {
            query.eq(field.as_str(), record.get(field).cloned().unwrap_or_default())
        });
        let rows = self.locate_rows(OP, &query, if full_key { 1 } else { 2 })?;
        match rows.as_slice() {
            [] => Ok(None),
            [row] => Ok(Some(*row)),
            [first, second, ..] => Err(TableError::integrity(
                OP,
                format!(
                    "key fields {present:?} match more than one row of `{}` (rows {first} and {second})",
                    self.store.sheet_name()
                ),
            )),
        }
    }

    fn write_plan(&mut self, plan: &WritePlan, strategy: WriteStrategy, recache: bool) -> Result<usize> {
        const OP: &str = "save";
        let last_row = self.store.last_row().map_err(TableError::store(OP))?;
        let append_at = last_row.max(self.options.header_row) + 1;
        let blocks = plan.blocks(strategy, append_at, |row| {
            self.cache.row(row).map(<[CellValue]>::to_vec)
        });
        for block in &blocks {
            log::debug!(
                "`{}`: writing {} row(s) at {}",
                self.store.sheet_name(),
                block.values.len(),
                block.start
            );
            self.store
                .set_range(block.start, &block.values)
                .map_err(TableError::store(OP))?;
        }

        self.invalidate_rows();
        if recache {
            for (row, data) in plan.updates() {
                self.cache.cache_row(*row, data.clone());
            }
            for (offset, data) in plan.appends().iter().enumerate() {
                self.cache.cache_row(append_at + offset as u32, data.clone());
            }
        }
        Ok(blocks.len())
    }

    /// Value of the cell a named range points at.
    pub fn get(&mut self, key: &str) -> Result<CellValue> {
        const OP: &str = "get named value";
        let range = self.named_range(OP, key)?;
        let value = self
            .store
            .get_range(Range::new(range.start, range.start))
            .map_err(TableError::store(OP))?
            .into_iter()
            .next()
            .and_then(|row| row.into_iter().next())
            .unwrap_or_default();
        Ok(value.normalized())
    }

    /// Overwrite the cell a named range points at.
    pub fn set(&mut self, key: &str, value: impl Into<CellValue>) -> Result<()> {
        const OP: &str = "set named value";
        let range = self.named_range(OP, key)?;
        if self.deferred {
            log::warn!(
                "`{}`: deferred mode, skipping write of `{key}`",
                self.store.sheet_name()
            );
            return Ok(());
        }
        self.store
            .set_range(range.start, &[vec![value.into().normalized()]])
            .map_err(TableError::store(OP))?;
        self.invalidate();
        Ok(())
    }

    fn named_range(&self, operation: &'static str, key: &str) -> Result<Range> {
        let reference = self
            .store
            .named_range(key)
            .map_err(TableError::store(operation))?
            .ok_or_else(|| {
                TableError::lookup(
                    operation,
                    format!("no named range `{key}` in `{}`", self.store.sheet_name()),
                )
            })?;
        Range::from_qualified_a1(&reference)
            .map(|(_, range)| range)
            .map_err(|source| TableError::Range {
                operation,
                reference,
                source,
            })
    }

    /// Show or hide the sheet. Failures are logged and ignored.
    pub fn set_visible(&mut self, visible: bool) {
        if let Err(err) = self.store.set_hidden(!visible) {
            log::warn!(
                "`{}`: could not change visibility: {err}",
                self.store.sheet_name()
            );
        }
    }
}

fn has_data(data: &[CellValue]) -> bool {
    data.iter().any(|value| !value.is_empty())
}
