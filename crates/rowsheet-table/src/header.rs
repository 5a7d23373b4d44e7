use regex::Regex;
use rowsheet_model::{merge_formula_rows, CellValue, Range};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::OnceLock;
use unicode_normalization::UnicodeNormalization;

use crate::store::{BackingStore, FormulaStyle, StoreError};

/// Returns true if `formula` fills its column from a lookup or mapping function, meaning the
/// store computes every cell below it.
pub fn is_mapping_formula(formula: &str) -> bool {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    let pattern = PATTERN.get_or_init(|| {
        Regex::new(r"(?i)\b(?:ARRAYFORMULA|[VHX]?LOOKUP|MAP|BYROW)\s*\(|\bINDEX\s*\(.*\bMATCH\s*\(")
            .expect("mapping formula pattern is valid")
    });
    pattern.is_match(formula)
}

fn normalize_name(name: &str) -> String {
    name.trim().nfc().collect()
}

/// Resolves field names to 1-based column positions using the header row.
///
/// Names go through the alias map first (logical -> physical) and are compared after trimming
/// and NFC normalization, so `"Café"` typed either way finds the same column.
#[derive(Debug, Clone)]
pub struct HeaderResolver {
    header_row: u32,
    aliases: BTreeMap<String, String>,
    reverse_aliases: BTreeMap<String, String>,
    names: Option<Vec<String>>,
    formula_columns: Option<BTreeSet<u32>>,
}

impl HeaderResolver {
    pub fn new(header_row: u32, aliases: BTreeMap<String, String>) -> Self {
        let reverse_aliases = aliases
            .iter()
            .map(|(logical, physical)| (normalize_name(physical), logical.clone()))
            .collect();
        Self {
            header_row,
            aliases,
            reverse_aliases,
            names: None,
            formula_columns: None,
        }
    }

    pub fn header_row(&self) -> u32 {
        self.header_row
    }

    pub fn has_aliases(&self) -> bool {
        !self.aliases.is_empty()
    }

    pub fn is_loaded(&self) -> bool {
        self.names.is_some()
    }

    /// Memoize header values read elsewhere (e.g. as part of a full-range read).
    pub fn set_names(&mut self, values: &[CellValue]) {
        self.names = Some(values.iter().map(|v| normalize_name(&v.to_string())).collect());
    }

    /// Fetch and memoize the header row if it has not been read yet.
    pub fn load<S: BackingStore + ?Sized>(&mut self, store: &S) -> Result<(), StoreError> {
        if self.names.is_none() {
            let values = store.header(self.header_row)?;
            log::debug!(
                "read header of `{}` (row {}, {} columns)",
                store.sheet_name(),
                self.header_row,
                values.len()
            );
            self.set_names(&values);
        }
        Ok(())
    }

    /// Memoized header names; empty until loaded.
    pub fn names(&self) -> &[String] {
        self.names.as_deref().unwrap_or_default()
    }

    pub fn width(&self) -> u32 {
        self.names().len() as u32
    }

    /// Physical column name for a (possibly aliased) field name.
    pub fn physical_name<'a>(&'a self, field: &'a str) -> &'a str {
        self.aliases.get(field).map(String::as_str).unwrap_or(field)
    }

    /// Logical field name for a physical header name; unaliased columns keep their name.
    pub fn logical_name<'a>(&'a self, physical: &'a str) -> &'a str {
        self.reverse_aliases
            .get(physical)
            .map(String::as_str)
            .unwrap_or(physical)
    }

    /// 1-based position of the column named `field` (after alias substitution).
    pub fn column_position(&self, field: &str) -> Option<u32> {
        self.physical_position(self.physical_name(field))
    }

    /// 1-based position of the header cell named exactly `physical` (no alias substitution).
    pub fn physical_position(&self, physical: &str) -> Option<u32> {
        let wanted = normalize_name(physical);
        if wanted.is_empty() {
            return None;
        }
        self.names()
            .iter()
            .position(|name| *name == wanted)
            .map(|idx| idx as u32 + 1)
    }

    /// Header name at a 1-based position. `None` for position 0 or past the last column.
    pub fn column_name(&self, col: u32) -> Option<&str> {
        let idx = usize::try_from(col.checked_sub(1)?).ok()?;
        self.names().get(idx).map(String::as_str)
    }

    /// Columns whose header cell carries a lookup/mapping formula.
    ///
    /// Computed once per cache generation from both formula representations of the header range
    /// (locale-independent text wins over localized text per cell).
    pub fn formula_columns<S: BackingStore + ?Sized>(
        &mut self,
        store: &S,
    ) -> Result<BTreeSet<u32>, StoreError> {
        if let Some(cols) = &self.formula_columns {
            return Ok(cols.clone());
        }
        self.load(store)?;

        let mut cols = BTreeSet::new();
        if let Some(range) = Range::from_dimensions(self.header_row, 1, 1, self.width()) {
            let invariant = store.formula_text(range, FormulaStyle::Invariant)?;
            let local = store.formula_text(range, FormulaStyle::Local)?;
            let merged = merge_formula_rows(&invariant, &local);
            if let Some(row) = merged.first() {
                for (idx, formula) in row.iter().enumerate() {
                    if !formula.is_empty() && is_mapping_formula(formula) {
                        cols.insert(idx as u32 + 1);
                    }
                }
            }
        }
        if !cols.is_empty() {
            log::debug!("`{}`: store-computed columns {cols:?}", store.sheet_name());
        }
        self.formula_columns = Some(cols.clone());
        Ok(cols)
    }

    /// Forget the formula-column set; the header names stay memoized.
    pub fn clear_formula_columns(&mut self) {
        self.formula_columns = None;
    }

    /// Forget everything read from the store.
    pub fn invalidate(&mut self) {
        self.names = None;
        self.formula_columns = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolver(aliases: &[(&str, &str)], header: &[&str]) -> HeaderResolver {
        let aliases = aliases
            .iter()
            .map(|(l, p)| (l.to_string(), p.to_string()))
            .collect();
        let mut resolver = HeaderResolver::new(1, aliases);
        let values: Vec<CellValue> = header.iter().map(|h| CellValue::from(*h)).collect();
        resolver.set_names(&values);
        resolver
    }

    #[test]
    fn positions_are_one_based_and_alias_aware() {
        let r = resolver(&[("customer", "Customer Name")], &["id", "Customer Name", " qty "]);
        assert_eq!(r.column_position("id"), Some(1));
        assert_eq!(r.column_position("customer"), Some(2));
        assert_eq!(r.column_position("Customer Name"), Some(2));
        assert_eq!(r.column_position("qty"), Some(3));
        assert_eq!(r.column_position("missing"), None);
        assert_eq!(r.logical_name("Customer Name"), "customer");
        assert_eq!(r.logical_name("id"), "id");
    }

    #[test]
    fn column_name_rejects_zero_and_out_of_range() {
        let r = resolver(&[], &["id", "name"]);
        assert_eq!(r.column_name(0), None);
        assert_eq!(r.column_name(2), Some("name"));
        assert_eq!(r.column_name(3), None);
    }

    #[test]
    fn unicode_names_match_in_either_normal_form() {
        let r = resolver(&[], &["Cafe\u{301}"]);
        assert_eq!(r.column_position("Caf\u{e9}"), Some(1));
    }

    #[test]
    fn empty_header_cells_never_match() {
        let r = resolver(&[], &["id", "", "name"]);
        assert_eq!(r.column_position(""), None);
        assert_eq!(r.column_position("name"), Some(3));
    }

    #[test]
    fn detects_mapping_formulas() {
        assert!(is_mapping_formula("ARRAYFORMULA(IF(A2:A=\"\",,B2:B*2))"));
        assert!(is_mapping_formula("={\"total\";ARRAYFORMULA(C2:C)}"));
        assert!(is_mapping_formula("vlookup(A2,Other!A:B,2,false)"));
        assert!(is_mapping_formula("XLOOKUP(A2,B:B,C:C)"));
        assert!(is_mapping_formula("INDEX(B:B, MATCH(A2, C:C, 0))"));
        assert!(!is_mapping_formula("SUM(A1:A10)"));
        assert!(!is_mapping_formula("INDEX(B:B, 3)"));
    }
}
