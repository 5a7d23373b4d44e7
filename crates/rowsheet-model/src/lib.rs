//! `rowsheet-model` defines the value and addressing layer shared by the row-store engine.
//!
//! Everything here is pure data:
//! - [`CellValue`], the scalar stored in a single grid cell
//! - [`CellRef`] / [`Range`], 1-based grid coordinates with A1 notation
//! - [`Record`], a logical row keyed by field name
//! - formula text helpers used to detect store-computed columns

mod address;
mod formula_text;
mod record;
mod value;

pub use address::{column_index, column_letters, A1ParseError, CellRef, Range, RangeParseError};
pub use formula_text::{merge_formula_rows, normalize_formula_text};
pub use record::{Record, ROW_NUMBER_FIELD};
pub use value::CellValue;
