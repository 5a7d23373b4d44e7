use rowsheet_model::{CellRef, CellValue, Range};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    /// The store (or the requested sheet) exists but cannot be reached right now.
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("sheet not found: {0}")]
    SheetNotFound(String),
    #[error("sheet `{name}` has a malformed id `{id}`: {source}")]
    InvalidSheetId {
        name: String,
        id: String,
        #[source]
        source: uuid::Error,
    },
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl StoreError {
    /// Whether retrying the same call may succeed.
    ///
    /// Freshly created sheets can take a moment to become discoverable, so a missing sheet
    /// counts as transient alongside outright unavailability and a busy database.
    pub fn is_transient(&self) -> bool {
        match self {
            StoreError::Unavailable(_) | StoreError::SheetNotFound(_) => true,
            StoreError::Sqlite(rusqlite::Error::SqliteFailure(err, _)) => matches!(
                err.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            ),
            _ => false,
        }
    }
}

/// Which textual formula representation to read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FormulaStyle {
    /// Function names and separators as the spreadsheet's locale displays them.
    Local,
    /// Locale-independent (English) function names.
    Invariant,
}

/// One sheet of a tabular backing store, addressed with 1-based rows and columns.
///
/// Implementations only move cells; caching, key resolution and write coalescing live in
/// [`crate::Table`].
pub trait BackingStore {
    fn sheet_name(&self) -> &str;

    /// Last row holding any value (0 for an empty sheet).
    fn last_row(&self) -> Result<u32, StoreError>;

    /// Last column holding any value (0 for an empty sheet).
    fn last_column(&self) -> Result<u32, StoreError>;

    /// Read a rectangular block. The result always has `range.row_count()` rows of
    /// `range.col_count()` cells; cells past the populated area are [`CellValue::Empty`].
    fn get_range(&self, range: Range) -> Result<Vec<Vec<CellValue>>, StoreError>;

    /// Write a block whose top-left cell is `start`. Rows may differ in length.
    fn set_range(&mut self, start: CellRef, values: &[Vec<CellValue>]) -> Result<(), StoreError>;

    /// Formula text of every cell in `range` (empty string for plain values), same shape as
    /// [`BackingStore::get_range`].
    fn formula_text(&self, range: Range, style: FormulaStyle) -> Result<Vec<Vec<String>>, StoreError>;

    /// Values of the header row, trimmed to the last populated column.
    fn header(&self, header_row: u32) -> Result<Vec<CellValue>, StoreError> {
        let width = self.last_column()?;
        match Range::from_dimensions(header_row, 1, 1, width) {
            Some(range) => Ok(self.get_range(range)?.into_iter().next().unwrap_or_default()),
            None => Ok(Vec::new()),
        }
    }

    /// A1 reference of a named range, if the store defines one.
    fn named_range(&self, _name: &str) -> Result<Option<String>, StoreError> {
        Ok(None)
    }

    fn set_hidden(&mut self, _hidden: bool) -> Result<(), StoreError> {
        Ok(())
    }
}

/// Locates sheets by name. Discovery failures that [`StoreError::is_transient`] are retried by
/// [`crate::Table::open`].
pub trait SheetDirectory {
    type Sheet: BackingStore;

    fn locate(&self, name: &str) -> Result<Self::Sheet, StoreError>;
}
