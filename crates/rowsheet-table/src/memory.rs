use rowsheet_model::{normalize_formula_text, CellRef, CellValue, Range};
use std::cell::Cell;
use std::collections::HashMap;

use crate::store::{BackingStore, FormulaStyle, StoreError};

/// In-memory [`BackingStore`].
///
/// Besides holding cells it records every range written and counts range reads, which makes it
/// the store of choice for tests and for embedding a table without a database.
#[derive(Debug, Clone, Default)]
pub struct MemoryGrid {
    name: String,
    rows: Vec<Vec<CellValue>>,
    /// `(locale-independent, localized)` formula text per cell.
    formulas: HashMap<CellRef, (String, String)>,
    named_ranges: HashMap<String, String>,
    hidden: bool,
    writes: Vec<Range>,
    range_reads: Cell<usize>,
}

impl MemoryGrid {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Build a grid from rows of values; the first row is usually the header.
    pub fn with_rows<R, V>(name: impl Into<String>, rows: R) -> Self
    where
        R: IntoIterator,
        R::Item: IntoIterator<Item = V>,
        V: Into<CellValue>,
    {
        let mut grid = Self::new(name);
        grid.rows = rows
            .into_iter()
            .map(|row| row.into_iter().map(Into::into).collect())
            .collect();
        grid
    }

    pub fn push_row<I, V>(&mut self, values: I)
    where
        I: IntoIterator<Item = V>,
        V: Into<CellValue>,
    {
        let row = self.last_populated_row();
        self.rows.truncate(row);
        self.rows.push(values.into_iter().map(Into::into).collect());
    }

    /// Insert a row before `row`, shifting everything below it down (a structural edit made
    /// behind the table's back).
    pub fn insert_row_before<I, V>(&mut self, row: u32, values: I)
    where
        I: IntoIterator<Item = V>,
        V: Into<CellValue>,
    {
        let idx = (row.max(1) as usize - 1).min(self.rows.len());
        self.rows.insert(idx, values.into_iter().map(Into::into).collect());
    }

    pub fn delete_row(&mut self, row: u32) {
        if row >= 1 && (row as usize) <= self.rows.len() {
            self.rows.remove(row as usize - 1);
        }
    }

    pub fn set_formula(&mut self, cell: CellRef, invariant: &str, local: &str) {
        self.formulas
            .insert(cell, (invariant.to_string(), local.to_string()));
    }

    pub fn define_named_range(&mut self, name: impl Into<String>, reference: impl Into<String>) {
        self.named_ranges.insert(name.into(), reference.into());
    }

    pub fn cell(&self, row: u32, col: u32) -> CellValue {
        self.rows
            .get((row as usize).wrapping_sub(1))
            .and_then(|r| r.get((col as usize).wrapping_sub(1)))
            .cloned()
            .unwrap_or_default()
    }

    /// Values of `row` up to the last column, padded with empties.
    pub fn row_values(&self, row: u32) -> Vec<CellValue> {
        (1..=self.last_populated_col() as u32)
            .map(|col| self.cell(row, col))
            .collect()
    }

    /// Ranges written so far, in order.
    pub fn writes(&self) -> &[Range] {
        &self.writes
    }

    pub fn clear_writes(&mut self) {
        self.writes.clear();
    }

    pub fn range_reads(&self) -> usize {
        self.range_reads.get()
    }

    pub fn is_hidden(&self) -> bool {
        self.hidden
    }

    fn last_populated_row(&self) -> usize {
        self.rows
            .iter()
            .rposition(|row| row.iter().any(|v| !v.is_empty()))
            .map_or(0, |idx| idx + 1)
    }

    fn last_populated_col(&self) -> usize {
        self.rows
            .iter()
            .filter_map(|row| row.iter().rposition(|v| !v.is_empty()))
            .max()
            .map_or(0, |idx| idx + 1)
    }
}

impl BackingStore for MemoryGrid {
    fn sheet_name(&self) -> &str {
        &self.name
    }

    fn last_row(&self) -> Result<u32, StoreError> {
        Ok(self.last_populated_row() as u32)
    }

    fn last_column(&self) -> Result<u32, StoreError> {
        Ok(self.last_populated_col() as u32)
    }

    fn get_range(&self, range: Range) -> Result<Vec<Vec<CellValue>>, StoreError> {
        self.range_reads.set(self.range_reads.get() + 1);
        Ok((range.start.row..=range.end.row)
            .map(|row| {
                (range.start.col..=range.end.col)
                    .map(|col| self.cell(row, col))
                    .collect()
            })
            .collect())
    }

    fn set_range(&mut self, start: CellRef, values: &[Vec<CellValue>]) -> Result<(), StoreError> {
        let width = values.iter().map(Vec::len).max().unwrap_or(0);
        if values.is_empty() || width == 0 {
            return Ok(());
        }
        for (r, row_values) in values.iter().enumerate() {
            let row_idx = start.row as usize - 1 + r;
            if self.rows.len() <= row_idx {
                self.rows.resize(row_idx + 1, Vec::new());
            }
            let row = &mut self.rows[row_idx];
            for (c, value) in row_values.iter().enumerate() {
                let col_idx = start.col as usize - 1 + c;
                if row.len() <= col_idx {
                    row.resize(col_idx + 1, CellValue::Empty);
                }
                row[col_idx] = value.clone().normalized();
            }
        }
        if let Some(range) = Range::from_dimensions(start.row, start.col, values.len() as u32, width as u32) {
            self.writes.push(range);
        }
        Ok(())
    }

    fn formula_text(&self, range: Range, style: FormulaStyle) -> Result<Vec<Vec<String>>, StoreError> {
        Ok((range.start.row..=range.end.row)
            .map(|row| {
                (range.start.col..=range.end.col)
                    .map(|col| {
                        self.formulas
                            .get(&CellRef::new(row, col))
                            .map(|(invariant, local)| match style {
                                FormulaStyle::Invariant => normalize_formula_text(invariant),
                                FormulaStyle::Local => normalize_formula_text(local),
                            })
                            .unwrap_or_default()
                    })
                    .collect()
            })
            .collect())
    }

    fn named_range(&self, name: &str) -> Result<Option<String>, StoreError> {
        Ok(self.named_ranges.get(name).cloned())
    }

    fn set_hidden(&mut self, hidden: bool) -> Result<(), StoreError> {
        self.hidden = hidden;
        Ok(())
    }
}
