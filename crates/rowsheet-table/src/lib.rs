//! Record-store access over a header-addressed tabular backing store.
//!
//! A [`Table`] mirrors one sheet of a backing store: the first configured row holds column
//! names, every row below it is a record. The crate exposes:
//! - header resolution with an alias table and detection of store-computed columns
//! - a lazily populated row cache with a composite primary-key index
//! - partial-field queries (equality, predicates, same-minute date matching)
//! - diff-based saves coalesced into as few contiguous range writes as possible
//! - an in-memory store ([`MemoryGrid`]) and a SQLite store ([`SqliteWorkbook`])

mod cache;
mod config;
mod error;
mod header;
mod memory;
mod model;
mod query;
pub mod retry;
mod schema;
mod sqlite;
mod store;
mod table;
mod writer;

pub use cache::{CacheStats, KeyPart, PrimaryKeyIndex, RowCache};
pub use config::TableOptions;
pub use error::{Result, TableError};
pub use header::{is_mapping_formula, HeaderResolver};
pub use memory::MemoryGrid;
pub use model::{DomainModel, FromRecord, SaveItem, ValidationError};
pub use query::{Criterion, Query};
pub use retry::RetryPolicy;
pub use sqlite::{SqliteGrid, SqliteWorkbook};
pub use store::{BackingStore, FormulaStyle, SheetDirectory, StoreError};
pub use table::{SaveReport, Table};
pub use writer::{contiguous_runs, WriteBlock, WritePlan, WriteStrategy};

pub use rowsheet_model::{CellRef, CellValue, Range, Record, ROW_NUMBER_FIELD};
