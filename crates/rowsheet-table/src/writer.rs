use rowsheet_model::{CellRef, CellValue, Range};
use std::collections::{BTreeMap, BTreeSet};
use std::ops::RangeInclusive;

use crate::error::{Result, TableError};

/// How updated rows are turned into range writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteStrategy {
    /// One block per run of consecutive rows; rows between runs are never touched.
    Sparse,
    /// One block from the first to the last updated row, unchanged rows included.
    Bulk,
}

impl WriteStrategy {
    pub fn for_batch(records: usize, bulk_threshold: usize) -> Self {
        if records > bulk_threshold {
            WriteStrategy::Bulk
        } else {
            WriteStrategy::Sparse
        }
    }
}

/// Group row numbers into maximal runs of consecutive positions (input order and duplicates
/// don't matter).
pub fn contiguous_runs<I>(rows: I) -> Vec<RangeInclusive<u32>>
where
    I: IntoIterator<Item = u32>,
{
    let rows: BTreeSet<u32> = rows.into_iter().collect();
    let mut runs = Vec::new();
    let mut current: Option<(u32, u32)> = None;
    for row in rows {
        current = match current {
            Some((start, end)) if end.checked_add(1) == Some(row) => Some((start, row)),
            Some((start, end)) => {
                runs.push(start..=end);
                Some((row, row))
            }
            None => Some((row, row)),
        };
    }
    if let Some((start, end)) = current {
        runs.push(start..=end);
    }
    runs
}

/// Incoming value for one resolved column of an existing row.
#[derive(Debug, Clone)]
pub(crate) struct FieldChange {
    pub field: String,
    pub col: u32,
    pub value: CellValue,
    pub primary_key: bool,
    pub read_only: bool,
}

/// Apply `changes` to the stored row `data`, returning the changed column span (if any).
///
/// - values compare loosely (blank == empty, date-times to the minute)
/// - a non-empty key value can never change
/// - read-only fields are only filled while empty
pub(crate) fn apply_diff(
    row: u32,
    data: &mut Vec<CellValue>,
    changes: &[FieldChange],
) -> Result<Option<(u32, u32)>> {
    let mut span: Option<(u32, u32)> = None;
    for change in changes {
        let idx = change.col as usize - 1;
        if data.len() <= idx {
            data.resize(idx + 1, CellValue::Empty);
        }
        let stored = &data[idx];
        if stored.loosely_eq(&change.value) {
            continue;
        }
        if change.primary_key && !stored.is_empty() {
            return Err(TableError::integrity(
                "save",
                format!(
                    "row {row}: primary key field `{}` cannot change from `{stored}` to `{}`",
                    change.field, change.value
                ),
            ));
        }
        if change.read_only && !stored.is_empty() {
            log::debug!(
                "row {row}: keeping read-only field `{}` at `{stored}`",
                change.field
            );
            continue;
        }
        data[idx] = change.value.clone();
        span = Some(match span {
            Some((first, last)) => (first.min(change.col), last.max(change.col)),
            None => (change.col, change.col),
        });
    }
    Ok(span)
}

/// A single range write: `values` laid out from `start`.
#[derive(Debug, Clone, PartialEq)]
pub struct WriteBlock {
    pub start: CellRef,
    pub values: Vec<Vec<CellValue>>,
}

impl WriteBlock {
    pub fn range(&self) -> Option<Range> {
        let rows = u32::try_from(self.values.len()).ok()?;
        let cols = u32::try_from(self.values.iter().map(Vec::len).max()?).ok()?;
        Range::from_dimensions(self.start.row, self.start.col, rows, cols)
    }
}

/// Rows queued by one `save`: full rows to append and changed existing rows, with the
/// batch-wide changed column span.
#[derive(Debug, Clone, Default)]
pub struct WritePlan {
    appends: Vec<Vec<CellValue>>,
    updates: BTreeMap<u32, Vec<CellValue>>,
    span: Option<(u32, u32)>,
    suppressed: BTreeSet<u32>,
}

impl WritePlan {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_append(&mut self, data: Vec<CellValue>) {
        self.appends.push(data);
    }

    /// Queue the new contents of `row`, whose changes cover columns `first..=last`.
    pub fn push_update(&mut self, row: u32, data: Vec<CellValue>, (first, last): (u32, u32)) {
        self.updates.insert(row, data);
        self.span = Some(match self.span {
            Some((a, b)) => (a.min(first), b.max(last)),
            None => (first, last),
        });
    }

    pub fn appends(&self) -> &[Vec<CellValue>] {
        &self.appends
    }

    /// Contents already queued for `row`, if an earlier record in the batch changed it.
    pub fn staged(&self, row: u32) -> Option<&[CellValue]> {
        self.updates.get(&row).map(Vec::as_slice)
    }

    pub fn updates(&self) -> &BTreeMap<u32, Vec<CellValue>> {
        &self.updates
    }

    /// First and last changed column across every update.
    pub fn span(&self) -> Option<(u32, u32)> {
        self.span
    }

    pub fn is_empty(&self) -> bool {
        self.appends.is_empty() && self.updates.is_empty()
    }

    /// Columns that are always written blank because the store computes them.
    pub fn suppress_columns(&mut self, cols: &BTreeSet<u32>) {
        self.suppressed.extend(cols.iter().copied());
    }

    fn slice(&self, data: &[CellValue], first: u32, last: u32) -> Vec<CellValue> {
        (first..=last)
            .map(|col| {
                if self.suppressed.contains(&col) {
                    CellValue::Empty
                } else {
                    data.get(col as usize - 1).cloned().unwrap_or_default()
                }
            })
            .collect()
    }

    /// Lay the plan out as range writes.
    ///
    /// Updates cover the batch-wide column span; `cached_row` supplies unchanged rows that a
    /// bulk block spans. If any of those is unknown the bulk block falls back to sparse runs
    /// rather than blanking data. Appends become one block starting at `append_at`.
    pub fn blocks<F>(&self, strategy: WriteStrategy, append_at: u32, cached_row: F) -> Vec<WriteBlock>
    where
        F: Fn(u32) -> Option<Vec<CellValue>>,
    {
        let mut blocks = Vec::new();

        if let (Some((first_col, last_col)), Some(&first_row), Some(&last_row)) = (
            self.span,
            self.updates.keys().next(),
            self.updates.keys().next_back(),
        ) {
            let runs = match strategy {
                WriteStrategy::Bulk
                    if (first_row..=last_row)
                        .all(|r| self.updates.contains_key(&r) || cached_row(r).is_some()) =>
                {
                    vec![first_row..=last_row]
                }
                WriteStrategy::Bulk => {
                    log::debug!("bulk write spans uncached rows; writing contiguous runs instead");
                    contiguous_runs(self.updates.keys().copied())
                }
                WriteStrategy::Sparse => contiguous_runs(self.updates.keys().copied()),
            };

            for run in runs {
                let start = CellRef::new(*run.start(), first_col);
                let values = run
                    .map(|row| {
                        let data = match self.updates.get(&row) {
                            Some(data) => data.clone(),
                            None => cached_row(row).unwrap_or_default(),
                        };
                        self.slice(&data, first_col, last_col)
                    })
                    .collect();
                blocks.push(WriteBlock { start, values });
            }
        }

        let width = self.appends.iter().map(Vec::len).max().unwrap_or(0) as u32;
        if width > 0 {
            let values = self
                .appends
                .iter()
                .map(|data| self.slice(data, 1, width))
                .collect();
            blocks.push(WriteBlock {
                start: CellRef::new(append_at, 1),
                values,
            });
        }

        blocks
    }
}
