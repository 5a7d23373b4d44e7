//! Helpers for the two textual formula representations a store can report.
//!
//! Canonical formula text is trimmed and carries **no** leading `'='`.

/// Normalize formula text into the canonical representation.
///
/// - Trims leading/trailing whitespace.
/// - Strips a single leading `'='` if present.
pub fn normalize_formula_text(s: &str) -> String {
    let mut trimmed = s.trim();
    if let Some(rest) = trimmed.strip_prefix('=') {
        trimmed = rest.trim();
    }
    trimmed.to_string()
}

/// Merge two grids of formula text cell-by-cell.
///
/// For every cell the first non-blank entry wins (`primary` before `fallback`). The result has
/// the shape of the larger input; missing cells count as blank. Output is canonical text.
pub fn merge_formula_rows(primary: &[Vec<String>], fallback: &[Vec<String>]) -> Vec<Vec<String>> {
    let rows = primary.len().max(fallback.len());
    let mut out = Vec::with_capacity(rows);
    for r in 0..rows {
        let a = primary.get(r).map(Vec::as_slice).unwrap_or_default();
        let b = fallback.get(r).map(Vec::as_slice).unwrap_or_default();
        let cols = a.len().max(b.len());
        let merged = (0..cols)
            .map(|c| {
                let first = a.get(c).map(|s| normalize_formula_text(s)).unwrap_or_default();
                if first.is_empty() {
                    b.get(c).map(|s| normalize_formula_text(s)).unwrap_or_default()
                } else {
                    first
                }
            })
            .collect();
        out.push(merged);
    }
    out
}
