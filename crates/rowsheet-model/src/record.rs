use serde::{Deserialize, Serialize};
use std::collections::btree_map;
use std::collections::BTreeMap;

use crate::CellValue;

/// Name of the synthetic field holding a record's row position.
///
/// It is the default primary key of a table and is never a physical column.
pub const ROW_NUMBER_FIELD: &str = "rowNumber";

/// A logical row: field name to value, plus the row position it was read from (if any).
///
/// Field names are whatever layer produced the record uses: physical header names for raw
/// records, alias names for projected ones.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Record {
    #[serde(rename = "rowNumber", default, skip_serializing_if = "Option::is_none")]
    pub row_number: Option<u32>,
    #[serde(flatten)]
    fields: BTreeMap<String, CellValue>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style field setter.
    pub fn with(mut self, field: impl Into<String>, value: impl Into<CellValue>) -> Self {
        self.insert(field, value);
        self
    }

    pub fn with_row_number(mut self, row: u32) -> Self {
        self.row_number = Some(row);
        self
    }

    pub fn insert(&mut self, field: impl Into<String>, value: impl Into<CellValue>) -> Option<CellValue> {
        self.fields.insert(field.into(), value.into())
    }

    pub fn remove(&mut self, field: &str) -> Option<CellValue> {
        self.fields.remove(field)
    }

    pub fn get(&self, field: &str) -> Option<&CellValue> {
        self.fields.get(field)
    }

    pub fn contains(&self, field: &str) -> bool {
        self.fields.contains_key(field)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> btree_map::Iter<'_, String, CellValue> {
        self.fields.iter()
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    pub fn into_fields(self) -> BTreeMap<String, CellValue> {
        self.fields
    }
}

impl<K: Into<String>, V: Into<CellValue>> FromIterator<(K, V)> for Record {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut record = Record::new();
        for (k, v) in iter {
            record.insert(k, v);
        }
        record
    }
}

impl<'a> IntoIterator for &'a Record {
    type Item = (&'a String, &'a CellValue);
    type IntoIter = btree_map::Iter<'a, String, CellValue>;

    fn into_iter(self) -> Self::IntoIter {
        self.fields.iter()
    }
}
