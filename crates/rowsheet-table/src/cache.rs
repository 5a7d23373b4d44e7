use rowsheet_model::CellValue;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// One segment of the composite primary key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyPart {
    /// The row position itself.
    RowNumber,
    /// The stored value of a 1-based column.
    Column(u32),
}

/// Join key segments, skipping empty ones. Separators only ever sit between two non-empty
/// segments, so a row whose key fields are all blank gets the key `""`.
pub(crate) fn join_key<I>(segments: I, separator: &str) -> String
where
    I: IntoIterator<Item = String>,
{
    let mut key = String::new();
    for segment in segments.into_iter().filter(|s| !s.is_empty()) {
        if !key.is_empty() {
            key.push_str(separator);
        }
        key.push_str(&segment);
    }
    key
}

/// Key text of one stored value. Date-times keep only the minute, matching the equality
/// used by queries.
pub(crate) fn key_segment(value: &CellValue) -> String {
    match value {
        CellValue::DateTime(dt) => dt.format("%Y-%m-%dT%H:%M").to_string(),
        other => other.to_string(),
    }
}

/// Composite key string -> row position.
///
/// Entries can go stale when rows move in the store; lookups through [`crate::Table`] always
/// re-check the candidate row before trusting it.
#[derive(Debug, Clone, Default)]
pub struct PrimaryKeyIndex {
    separator: String,
    parts: Vec<KeyPart>,
    rows_by_key: HashMap<String, u32>,
    keys_by_row: HashMap<u32, String>,
}

impl PrimaryKeyIndex {
    pub fn new(separator: impl Into<String>) -> Self {
        Self {
            separator: separator.into(),
            ..Self::default()
        }
    }

    pub fn parts(&self) -> &[KeyPart] {
        &self.parts
    }

    /// Replace the key layout. Existing entries were built with the old layout and are dropped.
    pub fn set_parts(&mut self, parts: Vec<KeyPart>) {
        if self.parts != parts {
            self.parts = parts;
            self.clear();
        }
    }

    pub fn separator(&self) -> &str {
        &self.separator
    }

    /// Composite key of a stored row.
    pub fn build_key(&self, row: u32, data: &[CellValue]) -> String {
        let segments = self.parts.iter().map(|part| match part {
            KeyPart::RowNumber => row.to_string(),
            KeyPart::Column(col) => data
                .get(*col as usize - 1)
                .map(key_segment)
                .unwrap_or_default(),
        });
        join_key(segments, &self.separator)
    }

    /// Index (or re-index) one row. The last row cached under a key wins.
    pub fn insert(&mut self, row: u32, data: &[CellValue]) {
        if self.parts.is_empty() {
            return;
        }
        let key = self.build_key(row, data);
        if let Some(old) = self.keys_by_row.insert(row, key.clone()) {
            if old != key && self.rows_by_key.get(&old) == Some(&row) {
                self.rows_by_key.remove(&old);
            }
        }
        self.rows_by_key.insert(key, row);
    }

    pub fn get(&self, key: &str) -> Option<u32> {
        self.rows_by_key.get(key).copied()
    }

    pub fn len(&self) -> usize {
        self.rows_by_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows_by_key.is_empty()
    }

    pub fn clear(&mut self) {
        self.rows_by_key.clear();
        self.keys_by_row.clear();
    }
}

/// Cumulative cache counters, for tests and debug output.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub full_loads: u64,
    pub row_fetches: u64,
    pub index_hits: u64,
    pub index_misses: u64,
}

/// Sparse mirror of a sheet's rows plus the primary-key index over them.
///
/// Slot `n - 1` holds row `n`. The cache never talks to the store itself; [`crate::Table`] does
/// the I/O and hands rows in through [`RowCache::replace_all`] and [`RowCache::cache_row`].
#[derive(Debug, Clone)]
pub struct RowCache {
    first_data_row: u32,
    rows: Vec<Option<Vec<CellValue>>>,
    populated: usize,
    loaded_at: Option<Instant>,
    index: PrimaryKeyIndex,
    stats: CacheStats,
}

impl RowCache {
    pub fn new(header_row: u32, index: PrimaryKeyIndex) -> Self {
        Self {
            first_data_row: header_row + 1,
            rows: Vec::new(),
            populated: 0,
            loaded_at: None,
            index,
            stats: CacheStats::default(),
        }
    }

    pub fn index(&self) -> &PrimaryKeyIndex {
        &self.index
    }

    pub fn set_key_parts(&mut self, parts: Vec<KeyPart>) {
        self.index.set_parts(parts);
    }

    pub fn stats(&self) -> CacheStats {
        self.stats
    }

    pub(crate) fn stats_mut(&mut self) -> &mut CacheStats {
        &mut self.stats
    }

    /// Replace the whole cache with rows `1..=rows.len()` from a single full read.
    ///
    /// The index is not touched; call [`RowCache::rebuild_index`] once the key layout is known.
    pub fn replace_all(&mut self, rows: Vec<Vec<CellValue>>) {
        self.populated = rows.len();
        self.rows = rows.into_iter().map(Some).collect();
        self.loaded_at = Some(Instant::now());
        self.stats.full_loads += 1;
    }

    /// Rebuild the index from every cached data row.
    pub fn rebuild_index(&mut self) {
        self.index.clear();
        let first = self.first_data_row as usize;
        for (slot, data) in self.rows.iter().enumerate().skip(first - 1) {
            if let Some(data) = data {
                self.index.insert(slot as u32 + 1, data);
            }
        }
    }

    /// Insert or replace one row and refresh only its index entry.
    pub fn cache_row(&mut self, row: u32, data: Vec<CellValue>) {
        let slot = row as usize - 1;
        if self.rows.len() <= slot {
            self.rows.resize(slot + 1, None);
        }
        if self.rows[slot].is_none() {
            self.populated += 1;
        }
        if row >= self.first_data_row {
            self.index.insert(row, &data);
        }
        self.rows[slot] = Some(data);
        if self.loaded_at.is_none() {
            self.loaded_at = Some(Instant::now());
        }
    }

    pub fn row(&self, row: u32) -> Option<&[CellValue]> {
        let slot = (row as usize).checked_sub(1)?;
        self.rows.get(slot)?.as_deref()
    }

    pub fn lookup(&self, key: &str) -> Option<u32> {
        self.index.get(key)
    }

    /// Cached data rows in ascending order, starting at the first row after the header.
    pub fn data_rows(&self) -> impl Iterator<Item = (u32, &[CellValue])> {
        let first = self.first_data_row as usize;
        self.rows
            .iter()
            .enumerate()
            .skip(first - 1)
            .filter_map(|(slot, data)| data.as_deref().map(|d| (slot as u32 + 1, d)))
    }

    /// Complete means the header row is cached, no slot is missing, and the cache is exactly as
    /// long as the store currently reports.
    pub fn is_complete(&self, store_last_row: u32) -> bool {
        let header_slot = self.first_data_row as usize - 2;
        matches!(self.rows.get(header_slot), Some(Some(_)))
            && self.populated == self.rows.len()
            && self.rows.len() == store_last_row as usize
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.populated == 0
    }

    /// Never populated, or populated longer than `ttl` ago.
    pub fn is_stale(&self, ttl: Duration) -> bool {
        self.loaded_at.map_or(true, |at| at.elapsed() > ttl)
    }

    /// Drop rows and index entries. Counters and the key layout survive.
    pub fn invalidate(&mut self) {
        self.rows.clear();
        self.populated = 0;
        self.loaded_at = None;
        self.index.clear();
    }
}
