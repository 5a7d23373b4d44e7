use rowsheet_model::ROW_NUMBER_FIELD;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use crate::error::{Result, TableError};
use crate::retry::RetryPolicy;

/// Per-table configuration.
///
/// Every field has a default, so a JSON document only needs the keys it overrides:
///
/// ```
/// let options = rowsheet_table::TableOptions::from_json_str(
///     r#"{"sheet_name": "Orders", "primary_key": ["id"], "aliases": {"customer": "Customer Name"}}"#,
/// ).unwrap();
/// assert_eq!(options.header_row, 1);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TableOptions {
    pub sheet_name: String,
    /// 1-based row holding the column names (default: 1).
    pub header_row: u32,
    /// Ordered key fields (default: the synthetic row position, [`ROW_NUMBER_FIELD`]).
    pub primary_key: Vec<String>,
    /// Logical field name to physical header name.
    pub aliases: BTreeMap<String, String>,
    /// Fields that `save` only fills while the stored value is still empty.
    pub read_only: Vec<String>,
    /// Age after which `save` drops the cache before resolving rows (default: 60s).
    pub cache_ttl_secs: u64,
    /// Batches larger than this are written as one block (default: 20).
    pub bulk_threshold: usize,
    /// Result cap for scanning queries without an explicit limit (default: 10000).
    pub scan_limit: usize,
    /// Separator between composite key segments (default: `"|"`).
    pub key_separator: String,
    /// Backoff for sheet discovery in [`crate::Table::open`].
    pub retry: RetryPolicy,
}

impl Default for TableOptions {
    fn default() -> Self {
        Self {
            sheet_name: String::new(),
            header_row: 1,
            primary_key: vec![ROW_NUMBER_FIELD.to_string()],
            aliases: BTreeMap::new(),
            read_only: Vec::new(),
            cache_ttl_secs: 60,
            bulk_threshold: 20,
            scan_limit: 10_000,
            key_separator: "|".to_string(),
            retry: RetryPolicy::default(),
        }
    }
}

impl TableOptions {
    pub fn new(sheet_name: impl Into<String>) -> Self {
        Self {
            sheet_name: sheet_name.into(),
            ..Self::default()
        }
    }

    pub fn from_json_str(json: &str) -> std::result::Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn with_primary_key<I, K>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<String>,
    {
        self.primary_key = fields.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_header_row(mut self, row: u32) -> Self {
        self.header_row = row;
        self
    }

    pub fn with_alias(mut self, logical: impl Into<String>, physical: impl Into<String>) -> Self {
        self.aliases.insert(logical.into(), physical.into());
        self
    }

    pub fn with_read_only(mut self, field: impl Into<String>) -> Self {
        self.read_only.push(field.into());
        self
    }

    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl_secs = ttl.as_secs();
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    /// Check the options for configuration errors.
    pub fn validate(&self) -> Result<()> {
        const OP: &str = "configure table";
        if self.header_row == 0 {
            return Err(TableError::config(OP, "header_row must be a positive integer, got 0"));
        }
        if self.primary_key.is_empty() {
            return Err(TableError::config(OP, "primary_key must name at least one field"));
        }
        let mut seen = BTreeSet::new();
        for field in &self.primary_key {
            if field.trim().is_empty() {
                return Err(TableError::config(OP, "primary_key contains an empty field name"));
            }
            if !seen.insert(field.as_str()) {
                return Err(TableError::config(
                    OP,
                    format!("primary_key lists `{field}` more than once"),
                ));
            }
        }
        if self.key_separator.is_empty() {
            return Err(TableError::config(OP, "key_separator must not be empty"));
        }
        if self.scan_limit == 0 {
            return Err(TableError::config(OP, "scan_limit must be greater than 0"));
        }
        Ok(())
    }

    /// Physical column name for a logical field.
    pub(crate) fn physical<'a>(&'a self, field: &'a str) -> &'a str {
        self.aliases.get(field).map(String::as_str).unwrap_or(field)
    }
}
