use chrono::{NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Scalar value of a single grid cell.
///
/// The enum uses an explicit `{type, value}` tagged layout so persisted values stay readable.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum CellValue {
    /// Empty / unset cell. Blank text is normalized to this.
    #[default]
    Empty,
    Number(f64),
    Text(String),
    Boolean(bool),
    /// Date-time without a zone; the store renders these in the spreadsheet's own zone.
    DateTime(NaiveDateTime),
}

impl CellValue {
    /// Returns true for [`CellValue::Empty`] and for blank text.
    pub fn is_empty(&self) -> bool {
        match self {
            CellValue::Empty => true,
            CellValue::Text(s) => s.is_empty(),
            _ => false,
        }
    }

    /// Collapse blank text into [`CellValue::Empty`].
    pub fn normalized(self) -> Self {
        if self.is_empty() {
            CellValue::Empty
        } else {
            self
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            CellValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            CellValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_datetime(&self) -> Option<NaiveDateTime> {
        match self {
            CellValue::DateTime(dt) => Some(*dt),
            _ => None,
        }
    }

    /// Returns true when both values are date-times that fall in the same calendar minute.
    pub fn same_minute(&self, other: &CellValue) -> bool {
        match (self, other) {
            (CellValue::DateTime(a), CellValue::DateTime(b)) => truncate_to_minute(*a) == truncate_to_minute(*b),
            _ => false,
        }
    }

    /// Equality used for matching and diffing stored data.
    ///
    /// Blank text equals [`CellValue::Empty`] and date-times only need to agree to the minute.
    pub fn loosely_eq(&self, other: &CellValue) -> bool {
        if self.is_empty() || other.is_empty() {
            return self.is_empty() && other.is_empty();
        }
        match (self, other) {
            (CellValue::DateTime(_), CellValue::DateTime(_)) => self.same_minute(other),
            _ => self == other,
        }
    }
}

fn truncate_to_minute(dt: NaiveDateTime) -> Option<NaiveDateTime> {
    dt.with_second(0).and_then(|dt| dt.with_nanosecond(0))
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CellValue::Empty => Ok(()),
            CellValue::Number(n) => {
                if n.is_finite() && n.fract() == 0.0 && n.abs() < 1e15 {
                    write!(f, "{}", *n as i64)
                } else {
                    write!(f, "{n}")
                }
            }
            CellValue::Text(s) => f.write_str(s),
            CellValue::Boolean(b) => f.write_str(if *b { "TRUE" } else { "FALSE" }),
            CellValue::DateTime(dt) => write!(f, "{}", dt.format("%Y-%m-%dT%H:%M:%S")),
        }
    }
}

impl From<f64> for CellValue {
    fn from(value: f64) -> Self {
        CellValue::Number(value)
    }
}

impl From<i64> for CellValue {
    fn from(value: i64) -> Self {
        CellValue::Number(value as f64)
    }
}

impl From<u32> for CellValue {
    fn from(value: u32) -> Self {
        CellValue::Number(f64::from(value))
    }
}

impl From<bool> for CellValue {
    fn from(value: bool) -> Self {
        CellValue::Boolean(value)
    }
}

impl From<String> for CellValue {
    fn from(value: String) -> Self {
        CellValue::Text(value).normalized()
    }
}

impl From<&str> for CellValue {
    fn from(value: &str) -> Self {
        CellValue::Text(value.to_string()).normalized()
    }
}

impl From<NaiveDateTime> for CellValue {
    fn from(value: NaiveDateTime) -> Self {
        CellValue::DateTime(value)
    }
}

impl<T: Into<CellValue>> From<Option<T>> for CellValue {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or_default()
    }
}
