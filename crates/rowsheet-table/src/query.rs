use rowsheet_model::{CellValue, Record, ROW_NUMBER_FIELD};
use std::collections::BTreeMap;
use std::fmt;

use crate::cache::key_segment;

/// How one query field is tested against a stored cell.
pub enum Criterion {
    /// Loose equality: blanks equal empty, date-times match within the same minute.
    Equals(CellValue),
    /// Arbitrary predicate, called with the (normalized) stored value.
    Matches(Box<dyn Fn(&CellValue) -> bool>),
}

impl Criterion {
    pub fn matches(&self, stored: &CellValue) -> bool {
        match self {
            Criterion::Equals(expected) => expected.loosely_eq(stored),
            Criterion::Matches(predicate) => {
                if stored.is_empty() {
                    predicate(&CellValue::Empty)
                } else {
                    predicate(stored)
                }
            }
        }
    }

    /// The value of an equality criterion.
    pub fn value(&self) -> Option<&CellValue> {
        match self {
            Criterion::Equals(value) => Some(value),
            Criterion::Matches(_) => None,
        }
    }
}

impl fmt::Debug for Criterion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Criterion::Equals(value) => f.debug_tuple("Equals").field(value).finish(),
            Criterion::Matches(_) => f.write_str("Matches(<fn>)"),
        }
    }
}

/// A conjunction of per-field criteria.
#[derive(Debug, Default)]
pub struct Query {
    criteria: BTreeMap<String, Criterion>,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    /// Require `field` to equal `value`.
    pub fn eq(mut self, field: impl Into<String>, value: impl Into<CellValue>) -> Self {
        self.criteria
            .insert(field.into(), Criterion::Equals(value.into()));
        self
    }

    /// Require `predicate` to hold for the stored value of `field`.
    pub fn matching<F>(mut self, field: impl Into<String>, predicate: F) -> Self
    where
        F: Fn(&CellValue) -> bool + 'static,
    {
        self.criteria
            .insert(field.into(), Criterion::Matches(Box::new(predicate)));
        self
    }

    /// Equality on every field of `record`.
    pub fn from_record(record: &Record) -> Self {
        record
            .iter()
            .fold(Query::new(), |query, (field, value)| query.eq(field.clone(), value.clone()))
    }

    pub fn get(&self, field: &str) -> Option<&Criterion> {
        self.criteria.get(field)
    }

    pub fn is_empty(&self) -> bool {
        self.criteria.is_empty()
    }

    pub fn len(&self) -> usize {
        self.criteria.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Criterion)> {
        self.criteria.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Rename every field with `rename`, keeping criteria untouched.
    pub(crate) fn rename_fields(self, rename: impl Fn(&str) -> String) -> Self {
        Self {
            criteria: self
                .criteria
                .into_iter()
                .map(|(field, criterion)| (rename(&field), criterion))
                .collect(),
        }
    }

    /// Key segments for `key_fields` if every one of them has a non-empty equality value.
    pub(crate) fn key_segments(&self, key_fields: &[String]) -> Option<Vec<String>> {
        key_fields
            .iter()
            .map(|field| {
                let value = self.criteria.get(field)?.value()?;
                (!value.is_empty()).then(|| key_segment(value))
            })
            .collect()
    }

    /// Test a stored row. `column_of` maps a field to its 1-based column; fields missing from
    /// the header read as empty. The synthetic row-number field compares against `row`.
    pub(crate) fn matches_row<F>(&self, row: u32, data: &[CellValue], column_of: F) -> bool
    where
        F: Fn(&str) -> Option<u32>,
    {
        self.criteria.iter().all(|(field, criterion)| {
            if field == ROW_NUMBER_FIELD {
                return criterion.matches(&CellValue::from(row));
            }
            let stored = column_of(field)
                .and_then(|col| data.get(col as usize - 1))
                .cloned()
                .unwrap_or_default();
            criterion.matches(&stored)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn columns(field: &str) -> Option<u32> {
        match field {
            "id" => Some(1),
            "when" => Some(2),
            "note" => Some(3),
            _ => None,
        }
    }

    fn stamp(s: u32, m: u32) -> CellValue {
        NaiveDate::from_ymd_opt(2024, 1, 1)
            .unwrap()
            .and_hms_opt(10, m, s)
            .unwrap()
            .into()
    }

    #[test]
    fn equality_predicates_and_dates() {
        let data = vec![CellValue::from("a1"), stamp(45, 0), CellValue::Empty];

        assert!(Query::new().eq("id", "a1").matches_row(2, &data, columns));
        assert!(!Query::new().eq("id", "a2").matches_row(2, &data, columns));
        assert!(Query::new().eq("when", stamp(30, 0)).matches_row(2, &data, columns));
        assert!(!Query::new().eq("when", stamp(5, 1)).matches_row(2, &data, columns));
        assert!(Query::new()
            .matching("id", |v| v.as_text().is_some_and(|s| s.starts_with('a')))
            .matches_row(2, &data, columns));
    }

    #[test]
    fn blanks_and_unknown_fields_read_as_empty() {
        let data = vec![CellValue::from("a1"), CellValue::Empty, CellValue::Text(String::new())];
        assert!(Query::new().eq("note", CellValue::Empty).matches_row(2, &data, columns));
        assert!(Query::new().eq("missing", "").matches_row(2, &data, columns));
        assert!(Query::new()
            .matching("note", |v| *v == CellValue::Empty)
            .matches_row(2, &data, columns));
        assert!(!Query::new().eq("missing", "x").matches_row(2, &data, columns));
    }

    #[test]
    fn row_number_field_matches_position() {
        let data = vec![CellValue::from("a1")];
        assert!(Query::new().eq(ROW_NUMBER_FIELD, 4u32).matches_row(4, &data, columns));
        assert!(!Query::new().eq(ROW_NUMBER_FIELD, 4u32).matches_row(5, &data, columns));
    }

    #[test]
    fn key_segments_need_every_key_field_concrete() {
        let key = vec!["id".to_string(), "line".to_string()];
        let full = Query::new().eq("id", "a").eq("line", 2.0).eq("note", "x");
        assert_eq!(full.key_segments(&key), Some(vec!["a".to_string(), "2".to_string()]));

        assert_eq!(Query::new().eq("id", "a").key_segments(&key), None);
        assert_eq!(Query::new().eq("id", "a").eq("line", "").key_segments(&key), None);
        assert_eq!(
            Query::new().eq("id", "a").matching("line", |_| true).key_segments(&key),
            None
        );
    }
}
