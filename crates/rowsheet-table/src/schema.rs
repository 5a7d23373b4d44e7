use rusqlite::Connection;

pub(crate) fn init(conn: &Connection) -> rusqlite::Result<()> {
    // Ensure foreign keys are enforced (disabled by default in SQLite).
    conn.pragma_update(None, "foreign_keys", "ON")?;

    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS sheets (
          id TEXT PRIMARY KEY,
          name TEXT NOT NULL UNIQUE,
          position INTEGER,
          hidden INTEGER NOT NULL DEFAULT 0
        );

        -- Sparse cells. `value` holds a JSON-encoded `CellValue`; NULL means blank.
        -- `formula` is locale-independent text, `formula_local` the localized variant.
        CREATE TABLE IF NOT EXISTS cells (
          sheet_id TEXT NOT NULL REFERENCES sheets(id) ON DELETE CASCADE,
          row INTEGER NOT NULL,
          col INTEGER NOT NULL,
          value JSON,
          formula TEXT,
          formula_local TEXT,
          PRIMARY KEY (sheet_id, row, col)
        );

        CREATE INDEX IF NOT EXISTS idx_cells_sheet_row ON cells(sheet_id, row);
        CREATE INDEX IF NOT EXISTS idx_cells_sheet_col ON cells(sheet_id, col);

        CREATE TABLE IF NOT EXISTS named_ranges (
          name TEXT PRIMARY KEY,
          sheet_id TEXT NOT NULL REFERENCES sheets(id) ON DELETE CASCADE,
          reference TEXT NOT NULL
        );
        "#,
    )?;

    Ok(())
}
