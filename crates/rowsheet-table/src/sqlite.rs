use rowsheet_model::{CellRef, CellValue, Range};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

use crate::schema;
use crate::store::{BackingStore, FormulaStyle, SheetDirectory, StoreError};

type Result<T> = std::result::Result<T, StoreError>;

/// A SQLite database holding any number of named sheets.
#[derive(Debug, Clone)]
pub struct SqliteWorkbook {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteWorkbook {
    pub fn open_path(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path)?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.busy_timeout(Duration::from_secs(5))?;
        schema::init(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn create_sheet(&self, name: &str) -> Result<SqliteGrid> {
        let id = Uuid::new_v4();
        let conn = self.conn.lock().expect("storage mutex poisoned");
        conn.execute(
            "INSERT INTO sheets (id, name, position) VALUES (?1, ?2, (SELECT COUNT(*) FROM sheets))",
            params![id.to_string(), name],
        )?;
        Ok(SqliteGrid {
            conn: Arc::clone(&self.conn),
            sheet_id: id,
            name: name.to_string(),
        })
    }

    pub fn sheet_names(&self) -> Result<Vec<String>> {
        let conn = self.conn.lock().expect("storage mutex poisoned");
        let mut stmt = conn.prepare("SELECT name FROM sheets ORDER BY position")?;
        let names = stmt
            .query_map([], |r| r.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(names)
    }

    /// Define (or redefine) a named range pointing into `sheet`.
    pub fn define_named_range(&self, name: &str, sheet: &str, reference: &str) -> Result<()> {
        let grid = self.locate(sheet)?;
        let conn = self.conn.lock().expect("storage mutex poisoned");
        conn.execute(
            r#"
            INSERT INTO named_ranges (name, sheet_id, reference) VALUES (?1, ?2, ?3)
            ON CONFLICT(name) DO UPDATE SET
              sheet_id = excluded.sheet_id,
              reference = excluded.reference
            "#,
            params![name, grid.sheet_id.to_string(), reference],
        )?;
        Ok(())
    }
}

impl SheetDirectory for SqliteWorkbook {
    type Sheet = SqliteGrid;

    fn locate(&self, name: &str) -> Result<SqliteGrid> {
        let conn = self.conn.lock().expect("storage mutex poisoned");
        let id: Option<String> = conn
            .query_row(
                "SELECT id FROM sheets WHERE name = ?1",
                params![name],
                |r| r.get(0),
            )
            .optional()?;
        let id = id.ok_or_else(|| StoreError::SheetNotFound(name.to_string()))?;
        let sheet_id = Uuid::parse_str(&id).map_err(|source| StoreError::InvalidSheetId {
            name: name.to_string(),
            id: id.clone(),
            source,
        })?;
        Ok(SqliteGrid {
            conn: Arc::clone(&self.conn),
            sheet_id,
            name: name.to_string(),
        })
    }
}

/// One sheet of a [`SqliteWorkbook`].
#[derive(Debug, Clone)]
pub struct SqliteGrid {
    conn: Arc<Mutex<Connection>>,
    sheet_id: Uuid,
    name: String,
}

impl SqliteGrid {
    pub fn id(&self) -> Uuid {
        self.sheet_id
    }

    /// Attach formula text to a cell without touching its value.
    pub fn set_formula(&self, cell: CellRef, invariant: &str, local: &str) -> Result<()> {
        let conn = self.conn.lock().expect("storage mutex poisoned");
        conn.execute(
            r#"
            INSERT INTO cells (sheet_id, row, col, formula, formula_local)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(sheet_id, row, col) DO UPDATE SET
              formula = excluded.formula,
              formula_local = excluded.formula_local
            "#,
            params![self.sheet_id.to_string(), cell.row, cell.col, invariant, local],
        )?;
        Ok(())
    }

    pub fn is_hidden(&self) -> Result<bool> {
        let conn = self.conn.lock().expect("storage mutex poisoned");
        let hidden: i64 = conn.query_row(
            "SELECT hidden FROM sheets WHERE id = ?1",
            params![self.sheet_id.to_string()],
            |r| r.get(0),
        )?;
        Ok(hidden != 0)
    }

    fn max_populated(&self, column: &str) -> Result<u32> {
        let conn = self.conn.lock().expect("storage mutex poisoned");
        let max: Option<i64> = conn.query_row(
            &format!("SELECT MAX({column}) FROM cells WHERE sheet_id = ?1 AND value IS NOT NULL"),
            params![self.sheet_id.to_string()],
            |r| r.get(0),
        )?;
        Ok(max.map_or(0, |m| u32::try_from(m).unwrap_or(u32::MAX)))
    }
}

impl BackingStore for SqliteGrid {
    fn sheet_name(&self) -> &str {
        &self.name
    }

    fn last_row(&self) -> Result<u32> {
        self.max_populated("row")
    }

    fn last_column(&self) -> Result<u32> {
        self.max_populated("col")
    }

    fn get_range(&self, range: Range) -> Result<Vec<Vec<CellValue>>> {
        let rows = range.row_count() as usize;
        let cols = range.col_count() as usize;
        let mut out = vec![vec![CellValue::Empty; cols]; rows];

        let stored: Vec<(u32, u32, serde_json::Value)> = {
            let conn = self.conn.lock().expect("storage mutex poisoned");
            let mut stmt = conn.prepare(
                r#"
                SELECT row, col, value
                FROM cells
                WHERE sheet_id = ?1
                  AND row BETWEEN ?2 AND ?3
                  AND col BETWEEN ?4 AND ?5
                  AND value IS NOT NULL
                "#,
            )?;
            let mapped = stmt.query_map(
                params![
                    self.sheet_id.to_string(),
                    range.start.row,
                    range.end.row,
                    range.start.col,
                    range.end.col
                ],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
            )?;
            mapped.collect::<rusqlite::Result<_>>()?
        };

        for (row, col, json) in stored {
            let value: CellValue = serde_json::from_value(json)?;
            out[(row - range.start.row) as usize][(col - range.start.col) as usize] = value;
        }
        Ok(out)
    }

    fn set_range(&mut self, start: CellRef, values: &[Vec<CellValue>]) -> Result<()> {
        let mut conn = self.conn.lock().expect("storage mutex poisoned");
        let tx = conn.transaction()?;
        let sheet_id = self.sheet_id.to_string();
        for (r, row_values) in values.iter().enumerate() {
            let row = start.row + r as u32;
            for (c, value) in row_values.iter().enumerate() {
                let col = start.col + c as u32;
                if value.is_empty() {
                    tx.execute(
                        "UPDATE cells SET value = NULL WHERE sheet_id = ?1 AND row = ?2 AND col = ?3",
                        params![sheet_id, row, col],
                    )?;
                    tx.execute(
                        r#"
                        DELETE FROM cells
                        WHERE sheet_id = ?1 AND row = ?2 AND col = ?3
                          AND formula IS NULL AND formula_local IS NULL
                        "#,
                        params![sheet_id, row, col],
                    )?;
                } else {
                    tx.execute(
                        r#"
                        INSERT INTO cells (sheet_id, row, col, value) VALUES (?1, ?2, ?3, ?4)
                        ON CONFLICT(sheet_id, row, col) DO UPDATE SET value = excluded.value
                        "#,
                        params![sheet_id, row, col, serde_json::to_value(value)?],
                    )?;
                }
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn formula_text(&self, range: Range, style: FormulaStyle) -> Result<Vec<Vec<String>>> {
        let rows = range.row_count() as usize;
        let cols = range.col_count() as usize;
        let mut out = vec![vec![String::new(); cols]; rows];

        let column = match style {
            FormulaStyle::Invariant => "formula",
            FormulaStyle::Local => "formula_local",
        };
        let conn = self.conn.lock().expect("storage mutex poisoned");
        let mut stmt = conn.prepare(&format!(
            r#"
            SELECT row, col, {column}
            FROM cells
            WHERE sheet_id = ?1
              AND row BETWEEN ?2 AND ?3
              AND col BETWEEN ?4 AND ?5
              AND {column} IS NOT NULL
            "#
        ))?;
        let mapped = stmt.query_map(
            params![
                self.sheet_id.to_string(),
                range.start.row,
                range.end.row,
                range.start.col,
                range.end.col
            ],
            |r| Ok((r.get::<_, u32>(0)?, r.get::<_, u32>(1)?, r.get::<_, String>(2)?)),
        )?;
        for entry in mapped {
            let (row, col, text) = entry?;
            out[(row - range.start.row) as usize][(col - range.start.col) as usize] = text;
        }
        Ok(out)
    }

    fn named_range(&self, name: &str) -> Result<Option<String>> {
        let conn = self.conn.lock().expect("storage mutex poisoned");
        let reference = conn
            .query_row(
                "SELECT reference FROM named_ranges WHERE name = ?1",
                params![name],
                |r| r.get(0),
            )
            .optional()?;
        Ok(reference)
    }

    fn set_hidden(&mut self, hidden: bool) -> Result<()> {
        let conn = self.conn.lock().expect("storage mutex poisoned");
        conn.execute(
            "UPDATE sheets SET hidden = ?1 WHERE id = ?2",
            params![hidden, self.sheet_id.to_string()],
        )?;
        Ok(())
    }
}
