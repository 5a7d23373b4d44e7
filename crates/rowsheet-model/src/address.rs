use core::fmt;

use serde::{Deserialize, Serialize};

/// A reference to a single cell of a sheet.
///
/// Rows and columns are **1-based**, matching the row numbers reported by the backing store:
/// - `row = 1` is the first row
/// - `col = 1` is column `A`
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CellRef {
    /// 1-based row.
    pub row: u32,
    /// 1-based column.
    pub col: u32,
}

impl CellRef {
    /// Construct a new [`CellRef`]. Both coordinates must be at least 1.
    #[inline]
    pub const fn new(row: u32, col: u32) -> Self {
        Self { row, col }
    }

    /// Convert to A1 notation (e.g. `A1`, `BC32`).
    pub fn to_a1(self) -> String {
        format!("{}{}", column_letters(self.col), self.row)
    }

    /// Parse an A1-style reference (e.g. `A1`, `$B$2`).
    pub fn from_a1(a1: &str) -> Result<Self, A1ParseError> {
        let s = a1.trim();
        if s.is_empty() {
            return Err(A1ParseError::Empty);
        }

        let bytes = s.as_bytes();
        let mut idx = 0usize;
        if bytes.get(idx) == Some(&b'$') {
            idx += 1;
        }

        let col_start = idx;
        while idx < bytes.len() && bytes[idx].is_ascii_alphabetic() {
            idx += 1;
        }
        if idx == col_start {
            return Err(A1ParseError::MissingColumn);
        }
        let col = column_index(&s[col_start..idx]).ok_or(A1ParseError::InvalidColumn)?;

        if bytes.get(idx) == Some(&b'$') {
            idx += 1;
        }

        let row_start = idx;
        while idx < bytes.len() && bytes[idx].is_ascii_digit() {
            idx += 1;
        }
        if idx == row_start {
            return Err(A1ParseError::MissingRow);
        }
        if idx != bytes.len() {
            return Err(A1ParseError::TrailingCharacters);
        }

        let row: u32 = s[row_start..idx]
            .parse()
            .map_err(|_| A1ParseError::InvalidRow)?;
        if row == 0 {
            return Err(A1ParseError::InvalidRow);
        }

        Ok(Self { row, col })
    }
}

impl fmt::Display for CellRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_a1())
    }
}

/// A rectangular, inclusive region of a sheet.
///
/// Always normalized so that `start` is the top-left and `end` the bottom-right corner.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Range {
    pub start: CellRef,
    pub end: CellRef,
}

impl Range {
    /// Construct a new range, normalizing coordinates if needed.
    pub const fn new(a: CellRef, b: CellRef) -> Self {
        let start_row = if a.row <= b.row { a.row } else { b.row };
        let end_row = if a.row <= b.row { b.row } else { a.row };
        let start_col = if a.col <= b.col { a.col } else { b.col };
        let end_col = if a.col <= b.col { b.col } else { a.col };
        Self {
            start: CellRef::new(start_row, start_col),
            end: CellRef::new(end_row, end_col),
        }
    }

    /// Build a range from the `(row, col, row_count, col_count)` form used by range reads and
    /// writes. Returns `None` for zero coordinates, zero extents, or overflow.
    pub fn from_dimensions(row: u32, col: u32, row_count: u32, col_count: u32) -> Option<Self> {
        if row == 0 || col == 0 || row_count == 0 || col_count == 0 {
            return None;
        }
        let end_row = row.checked_add(row_count - 1)?;
        let end_col = col.checked_add(col_count - 1)?;
        Some(Self {
            start: CellRef::new(row, col),
            end: CellRef::new(end_row, end_col),
        })
    }

    /// The `(row, col, row_count, col_count)` form of this range.
    pub const fn dimensions(&self) -> (u32, u32, u32, u32) {
        (self.start.row, self.start.col, self.row_count(), self.col_count())
    }

    /// Returns true if `cell` lies within this range.
    #[inline]
    pub const fn contains(&self, cell: CellRef) -> bool {
        cell.row >= self.start.row
            && cell.row <= self.end.row
            && cell.col >= self.start.col
            && cell.col <= self.end.col
    }

    #[inline]
    pub const fn col_count(&self) -> u32 {
        self.end.col - self.start.col + 1
    }

    #[inline]
    pub const fn row_count(&self) -> u32 {
        self.end.row - self.start.row + 1
    }

    #[inline]
    pub const fn is_single_cell(&self) -> bool {
        self.start.row == self.end.row && self.start.col == self.end.col
    }

    /// Convert to A1 notation. Single cells render without a `:` part.
    pub fn to_a1(&self) -> String {
        self.to_string()
    }

    /// Parse an A1-style range like `A1:B2` or a single-cell reference like `C3`.
    ///
    /// A sheet qualifier (`Config!B2`, `'My Sheet'!A1:A3`) is accepted and ignored; use
    /// [`Range::from_qualified_a1`] to keep it.
    pub fn from_a1(a1: &str) -> Result<Self, RangeParseError> {
        Self::from_qualified_a1(a1).map(|(_, range)| range)
    }

    /// Parse an A1 range that may carry a sheet qualifier, returning the sheet name (unquoted)
    /// alongside the range.
    pub fn from_qualified_a1(a1: &str) -> Result<(Option<String>, Self), RangeParseError> {
        let s = a1.trim();
        if s.is_empty() {
            return Err(RangeParseError::Empty);
        }

        let (sheet, reference) = match s.rsplit_once('!') {
            Some((sheet, reference)) => (Some(unquote_sheet_name(sheet)), reference),
            None => (None, s),
        };
        if matches!(sheet.as_deref(), Some("")) {
            return Err(RangeParseError::EmptySheetName);
        }

        let range = match reference.split_once(':') {
            None => {
                let cell = CellRef::from_a1(reference).map_err(RangeParseError::Cell)?;
                Range::new(cell, cell)
            }
            Some((a, b)) => {
                let start = CellRef::from_a1(a).map_err(RangeParseError::Cell)?;
                let end = CellRef::from_a1(b).map_err(RangeParseError::Cell)?;
                Range::new(start, end)
            }
        };
        Ok((sheet, range))
    }
}

impl fmt::Display for Range {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_single_cell() {
            write!(f, "{}", self.start)
        } else {
            write!(f, "{}:{}", self.start, self.end)
        }
    }
}

fn unquote_sheet_name(raw: &str) -> String {
    let raw = raw.trim();
    match raw.strip_prefix('\'').and_then(|s| s.strip_suffix('\'')) {
        Some(inner) => inner.replace("''", "'"),
        None => raw.to_string(),
    }
}

/// Errors that can occur when parsing an A1 cell reference.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum A1ParseError {
    Empty,
    MissingColumn,
    MissingRow,
    InvalidColumn,
    InvalidRow,
    TrailingCharacters,
}

impl fmt::Display for A1ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            A1ParseError::Empty => "empty A1 reference",
            A1ParseError::MissingColumn => "missing column in A1 reference",
            A1ParseError::MissingRow => "missing row in A1 reference",
            A1ParseError::InvalidColumn => "invalid column in A1 reference",
            A1ParseError::InvalidRow => "invalid row in A1 reference",
            A1ParseError::TrailingCharacters => "trailing characters in A1 reference",
        };
        f.write_str(msg)
    }
}

impl std::error::Error for A1ParseError {}

/// Errors that can occur when parsing an A1 range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RangeParseError {
    Empty,
    EmptySheetName,
    Cell(A1ParseError),
}

impl fmt::Display for RangeParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RangeParseError::Empty => f.write_str("empty A1 range"),
            RangeParseError::EmptySheetName => f.write_str("empty sheet name in A1 range"),
            RangeParseError::Cell(e) => write!(f, "invalid cell reference in range: {e}"),
        }
    }
}

impl std::error::Error for RangeParseError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RangeParseError::Cell(e) => Some(e),
            _ => None,
        }
    }
}

/// Column letters for a 1-based column index (`1 -> "A"`, `27 -> "AA"`).
///
/// Column `0` has no letters and yields an empty string.
pub fn column_letters(col: u32) -> String {
    let mut n = col;
    let mut out = Vec::<u8>::new();
    while n > 0 {
        let rem = (n - 1) % 26;
        out.push(b'A' + rem as u8);
        n = (n - 1) / 26;
    }
    out.reverse();
    out.into_iter().map(char::from).collect()
}

/// 1-based column index for column letters (case-insensitive). `None` on empty input,
/// non-letters or overflow.
pub fn column_index(letters: &str) -> Option<u32> {
    if letters.is_empty() {
        return None;
    }
    let mut col: u32 = 0;
    for b in letters.bytes() {
        if !b.is_ascii_alphabetic() {
            return None;
        }
        let v = (b.to_ascii_uppercase() - b'A') as u32 + 1;
        col = col.checked_mul(26)?.checked_add(v)?;
    }
    Some(col)
}
