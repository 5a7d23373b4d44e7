use chrono::NaiveDate;
use pretty_assertions::assert_eq;
use rowsheet_table::{
    BackingStore, CellRef, CellValue, FormulaStyle, Query, Range, Record, RetryPolicy,
    SheetDirectory, SqliteGrid, SqliteWorkbook, StoreError, Table, TableError, TableOptions,
};

fn row(values: &[&str]) -> Vec<CellValue> {
    values.iter().map(|v| CellValue::from(*v)).collect()
}

fn seed(workbook: &SqliteWorkbook) -> SqliteGrid {
    let mut grid = workbook.create_sheet("Orders").expect("create sheet");
    grid.set_range(
        CellRef::new(1, 1),
        &[
            row(&["id", "name", "status"]),
            row(&["a1", "apple", "open"]),
            row(&["a2", "pear", "closed"]),
        ],
    )
    .expect("seed rows");
    grid
}

fn options() -> TableOptions {
    TableOptions::new("Orders")
        .with_primary_key(["id"])
        .with_retry(RetryPolicy::immediate(2))
}

#[test]
fn grid_reports_extents_and_pads_reads() {
    let workbook = SqliteWorkbook::open_in_memory().expect("open workbook");
    let mut grid = seed(&workbook);
    assert_eq!(grid.last_row().expect("last row"), 3);
    assert_eq!(grid.last_column().expect("last column"), 3);

    let block = grid
        .get_range(Range::from_a1("B3:D4").expect("range"))
        .expect("read");
    assert_eq!(
        block,
        vec![
            vec![CellValue::from("pear"), CellValue::from("closed"), CellValue::Empty],
            vec![CellValue::Empty; 3],
        ]
    );

    grid.set_range(CellRef::new(3, 1), &[vec![CellValue::Empty; 3]])
        .expect("clear row");
    assert_eq!(grid.last_row().expect("last row"), 2);
}

#[test]
fn typed_values_survive_storage() {
    let workbook = SqliteWorkbook::open_in_memory().expect("open workbook");
    let mut grid = workbook.create_sheet("Typed").expect("create sheet");
    let stamp = NaiveDate::from_ymd_opt(2024, 5, 17)
        .and_then(|d| d.and_hms_opt(8, 30, 0))
        .expect("valid timestamp");
    let values = vec![
        CellValue::from(1.5),
        CellValue::from(true),
        CellValue::from(stamp),
        CellValue::from("text"),
    ];
    grid.set_range(CellRef::new(2, 2), &[values.clone()])
        .expect("write");
    let read = grid
        .get_range(Range::from_a1("B2:E2").expect("range"))
        .expect("read");
    assert_eq!(read, vec![values]);
}

#[test]
fn table_reads_and_writes_through_sqlite() {
    let workbook = SqliteWorkbook::open_in_memory().expect("open workbook");
    seed(&workbook);
    let mut table = Table::open(&workbook, options()).expect("open table");

    let found = table.find(Query::new().eq("id", "a2")).expect("find");
    assert_eq!(
        found,
        Some(
            Record::new()
                .with_row_number(3)
                .with("id", "a2")
                .with("name", "pear")
                .with("status", "closed")
        )
    );

    let report = table
        .save([
            Record::new().with("id", "a1").with("status", "closed"),
            Record::new().with("id", "a3").with("name", "plum").with("status", "open"),
        ])
        .expect("save");
    assert_eq!((report.updated, report.appended, report.write_ops), (1, 1, 2));

    let other = workbook.locate("Orders").expect("second handle");
    let rows = other
        .get_range(Range::from_a1("A2:C4").expect("range"))
        .expect("read back");
    assert_eq!(
        rows,
        vec![
            row(&["a1", "apple", "closed"]),
            row(&["a2", "pear", "closed"]),
            row(&["a3", "plum", "open"]),
        ]
    );
}

#[test]
fn missing_sheets_become_unavailable_after_retries() {
    let workbook = SqliteWorkbook::open_in_memory().expect("open workbook");
    let err = Table::open(&workbook, options()).expect_err("no sheet");
    match err {
        TableError::Unavailable {
            attempts, source, ..
        } => {
            assert_eq!(attempts, 2);
            assert!(matches!(source, StoreError::SheetNotFound(name) if name == "Orders"));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn formula_columns_stay_blank_and_keep_their_formula() {
    let workbook = SqliteWorkbook::open_in_memory().expect("open workbook");
    let mut grid = workbook.create_sheet("Orders").expect("create sheet");
    grid.set_range(CellRef::new(1, 1), &[row(&["id", "qty", "price"])])
        .expect("header");
    grid.set_formula(
        CellRef::new(1, 3),
        "=ARRAYFORMULA(IF(A2:A=\"\",,B2:B*2))",
        "=MATRIZ(SI(A2:A=\"\";;B2:B*2))",
    )
    .expect("formula");

    let mut table = Table::open(&workbook, options()).expect("open table");
    table
        .save([Record::new().with("id", "o1").with("qty", 2.0).with("price", 4.0)])
        .expect("save");

    assert_eq!(
        grid.get_range(Range::from_a1("A2:C2").expect("range")).expect("read"),
        vec![vec![CellValue::from("o1"), CellValue::from(2.0), CellValue::Empty]]
    );
    let formulas = grid
        .formula_text(Range::from_a1("C1").expect("range"), FormulaStyle::Invariant)
        .expect("formula text");
    assert_eq!(formulas, vec![vec!["=ARRAYFORMULA(IF(A2:A=\"\",,B2:B*2))".to_string()]]);
}

#[test]
fn named_ranges_and_visibility_are_stored() {
    let workbook = SqliteWorkbook::open_in_memory().expect("open workbook");
    let grid = seed(&workbook);
    workbook
        .define_named_range("owner", "Orders", "Orders!E1")
        .expect("define name");

    let mut table = Table::open(&workbook, options()).expect("open table");
    assert_eq!(table.get("owner").expect("get"), CellValue::Empty);
    table.set("owner", "ops team").expect("set");
    assert_eq!(table.get("owner").expect("get"), CellValue::from("ops team"));

    table.set_visible(false);
    assert!(grid.is_hidden().expect("hidden flag"));
}

#[test]
fn data_persists_across_reopen() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("orders.db");

    {
        let workbook = SqliteWorkbook::open_path(&path).expect("create workbook");
        seed(&workbook);
        let mut table = Table::open(&workbook, options()).expect("open table");
        table
            .save([Record::new().with("id", "a2").with("name", "quince")])
            .expect("save");
    }

    let workbook = SqliteWorkbook::open_path(&path).expect("reopen workbook");
    assert_eq!(workbook.sheet_names().expect("sheet names"), vec!["Orders"]);
    let mut table = Table::open(&workbook, options()).expect("open table");
    let record = table.read_row(3).expect("row 3");
    assert_eq!(record.get("name"), Some(&CellValue::from("quince")));
}

#[test]
fn malformed_sheet_ids_are_reported_without_retrying() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("broken.db");
    drop(SqliteWorkbook::open_path(&path).expect("create workbook"));
    rusqlite::Connection::open(&path)
        .expect("raw connection")
        .execute(
            "INSERT INTO sheets (id, name, position) VALUES ('not-a-uuid', 'Orders', 0)",
            [],
        )
        .expect("insert sheet");

    let workbook = SqliteWorkbook::open_path(&path).expect("reopen workbook");
    match workbook.locate("Orders").expect_err("bad id") {
        StoreError::InvalidSheetId { name, id, .. } => {
            assert_eq!(name, "Orders");
            assert_eq!(id, "not-a-uuid");
        }
        other => panic!("unexpected error: {other}"),
    }

    let err = Table::open(&workbook, options()).expect_err("bad id");
    assert!(
        matches!(err, TableError::Store { source: StoreError::InvalidSheetId { .. }, .. }),
        "{err}"
    );
}
