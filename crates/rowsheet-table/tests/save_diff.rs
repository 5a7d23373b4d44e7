use chrono::{NaiveDate, NaiveDateTime};
use pretty_assertions::assert_eq;
use rowsheet_table::{
    BackingStore, CellRef, CellValue, MemoryGrid, Query, Record, SaveReport, Table, TableError,
    TableOptions,
};

fn writes(table: &Table<MemoryGrid>) -> Vec<String> {
    table.store().writes().iter().map(|r| r.to_a1()).collect()
}

fn numbered(rows: u32) -> MemoryGrid {
    let mut grid = MemoryGrid::with_rows("Items", [["id", "name"]]);
    for n in 2..=rows + 1 {
        grid.push_row([format!("i{n}"), format!("item {n}")]);
    }
    grid
}

fn at(h: u32, m: u32, s: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 3, 1)
        .and_then(|d| d.and_hms_opt(h, m, s))
        .expect("valid timestamp")
}

fn event_log() -> MemoryGrid {
    MemoryGrid::with_rows(
        "Log",
        vec![
            vec![CellValue::from("at"), CellValue::from("event")],
            vec![CellValue::from(at(10, 0, 30)), CellValue::from("boot")],
        ],
    )
}

fn keyed(grid: MemoryGrid) -> Table<MemoryGrid> {
    Table::new(grid, TableOptions::new("Items").with_primary_key(["id"])).expect("table")
}

#[test]
fn saving_an_unchanged_record_writes_nothing() {
    let mut table = keyed(numbered(3));
    let edited = Record::new().with("id", "i3").with("name", "renamed");

    let first = table.save([edited.clone()]).expect("first save");
    assert_eq!(first.updated, 1);
    assert_eq!(first.write_ops, 1);
    assert_eq!(writes(&table), vec!["B3"]);

    let second = table.save([edited]).expect("second save");
    assert_eq!(second, SaveReport::default());
    assert_eq!(writes(&table), vec!["B3"]);
    assert_eq!(table.store().cell(3, 2), CellValue::from("renamed"));
}

#[test]
fn sparse_updates_write_one_block_per_run() {
    let mut table = Table::new(numbered(10), TableOptions::new("Items")).expect("table");
    let edits = [3, 4, 5, 9].map(|row| Record::new().with_row_number(row).with("name", format!("new {row}")));

    let report = table.save(edits).expect("save");
    assert_eq!(report.updated, 4);
    assert_eq!(report.write_ops, 2);
    assert_eq!(writes(&table), vec!["B3:B5", "B9"]);
    assert_eq!(table.store().cell(4, 2), CellValue::from("new 4"));
    assert_eq!(table.store().cell(6, 2), CellValue::from("item 6"));
}

#[test]
fn large_batches_write_a_single_block() {
    let mut table = Table::new(numbered(50), TableOptions::new("Items")).expect("table");
    let edits: Vec<Record> = (2..=50)
        .step_by(2)
        .map(|row| Record::new().with_row_number(row).with("name", format!("new {row}")))
        .collect();
    assert_eq!(edits.len(), 25);

    let report = table.save(edits).expect("save");
    assert_eq!(report.write_ops, 1);
    assert_eq!(writes(&table), vec!["B2:B50"]);
    assert_eq!(table.store().cell(4, 2), CellValue::from("new 4"));
    assert_eq!(table.store().cell(5, 2), CellValue::from("item 5"));
}

#[test]
fn records_without_a_row_number_are_appended_under_the_default_key() {
    let mut table = Table::new(numbered(2), TableOptions::new("Items")).expect("table");
    let report = table
        .save([
            Record::new().with("id", "n1").with("name", "first"),
            Record::new().with("name", "second").with("ignored", "x"),
        ])
        .expect("save");
    assert_eq!(report.appended, 2);
    assert_eq!(writes(&table), vec!["A4:B5"]);
    assert_eq!(
        table.store().row_values(5),
        vec![CellValue::Empty, CellValue::from("second")]
    );

    let appended = table.read_row(4).expect("row 4");
    assert_eq!(appended.get("name"), Some(&CellValue::from("first")));
}

#[test]
fn read_only_fields_are_only_filled_when_empty() {
    let grid = MemoryGrid::with_rows(
        "Items",
        [
            ["id", "name", "created"],
            ["a1", "x", "2024-01-01"],
            ["a2", "y", ""],
        ],
    );
    let options = TableOptions::new("Items")
        .with_primary_key(["id"])
        .with_read_only("created");
    let mut table = Table::new(grid, options).expect("table");

    let report = table
        .save([
            Record::new().with("id", "a1").with("created", "2025-06-30"),
            Record::new().with("id", "a2").with("created", "2025-06-30"),
        ])
        .expect("save");
    assert_eq!(report.updated, 1);
    assert_eq!(writes(&table), vec!["C3"]);
    assert_eq!(table.store().cell(2, 3), CellValue::from("2024-01-01"));
    assert_eq!(table.store().cell(3, 3), CellValue::from("2025-06-30"));
}

#[test]
fn changing_a_primary_key_fails_before_any_write() {
    let mut table = keyed(numbered(3));
    let err = table
        .save([
            Record::new().with_row_number(3).with("id", "i3").with("name", "fine"),
            Record::new().with_row_number(2).with("id", "zz"),
        ])
        .expect_err("key change");
    assert!(matches!(err, TableError::Integrity { operation: "save", .. }), "{err}");
    assert!(err.to_string().contains("`i2`"), "{err}");
    assert!(table.store().writes().is_empty());

    let row = table.read_row(3).expect("row 3");
    assert_eq!(row.get("name"), Some(&CellValue::from("item 3")));
}

#[test]
fn partial_keys_must_identify_a_single_row() {
    let grid = MemoryGrid::with_rows(
        "Stock",
        [
            ["region", "sku", "qty"],
            ["eu", "s1", "1"],
            ["eu", "s2", "2"],
            ["us", "s1", "3"],
        ],
    );
    let options = TableOptions::new("Stock").with_primary_key(["region", "sku"]);
    let mut table = Table::new(grid, options).expect("table");

    let err = table
        .save([Record::new().with("region", "eu").with("qty", "9")])
        .expect_err("ambiguous");
    assert!(matches!(err, TableError::Integrity { .. }), "{err}");

    let report = table
        .save([Record::new().with("region", "us").with("qty", "9")])
        .expect("unique partial key");
    assert_eq!(report.updated, 1);
    assert_eq!(writes(&table), vec!["C4"]);

    let report = table
        .save([Record::new().with("region", "eu").with("sku", "s2").with("qty", "7")])
        .expect("full key");
    assert_eq!(report.updated, 1);
    assert_eq!(table.store().cell(3, 3), CellValue::from("7"));
}

#[test]
fn records_without_any_key_are_rejected() {
    let mut table = keyed(numbered(2));
    let err = table
        .save([Record::new().with("name", "orphan")])
        .expect_err("no key");
    assert!(matches!(err, TableError::Lookup { .. }), "{err}");

    let err = table
        .save([Record::new().with_row_number(9).with("name", "ghost")])
        .expect_err("empty row");
    assert!(matches!(err, TableError::Lookup { .. }), "{err}");
    assert!(table.store().writes().is_empty());
}

#[test]
fn mapping_formula_columns_are_written_blank() {
    let mut grid = MemoryGrid::with_rows("Orders", [["id", "qty", "price"]]);
    grid.set_formula(
        CellRef::new(1, 3),
        "={\"price\";ARRAYFORMULA(VLOOKUP(A2:A, Prices!A:B, 2, FALSE))}",
        "",
    );
    let mut table = Table::new(grid, TableOptions::new("Orders").with_primary_key(["id"]))
        .expect("table");

    table
        .save([Record::new().with("id", "o1").with("qty", 2.0).with("price", 9.5)])
        .expect("save");
    assert_eq!(writes(&table), vec!["A2:C2"]);
    assert_eq!(
        table.store().row_values(2),
        vec![CellValue::from("o1"), CellValue::from(2.0), CellValue::Empty]
    );

    table
        .save([Record::new().with("id", "o1").with("qty", 3.0).with("price", 1.0)])
        .expect("update");
    assert_eq!(writes(&table), vec!["A2:C2", "B2:C2"]);
    assert_eq!(table.store().cell(2, 3), CellValue::Empty);
}

#[test]
fn deferred_saves_touch_nothing() {
    let mut table = keyed(numbered(2));
    table.set_deferred(true);
    assert!(table.is_deferred());

    let report = table
        .save([
            Record::new().with("id", "i2").with("name", "changed"),
            Record::new().with("id", "i9").with("name", "new"),
        ])
        .expect("save");
    assert_eq!(
        report,
        SaveReport {
            appended: 1,
            updated: 1,
            write_ops: 0,
            deferred: true,
        }
    );
    assert!(table.store().writes().is_empty());

    let current = table.find(Query::new().eq("id", "i2")).expect("find");
    assert_eq!(
        current.and_then(|r| r.get("name").cloned()),
        Some(CellValue::from("item 2"))
    );

    table.set_deferred(false);
    table.set("missing", 1.0).expect_err("no named range");
}

#[test]
fn earlier_edits_in_a_batch_survive_a_reload() {
    let mut grid = MemoryGrid::with_rows("Items", [["id", "name", "note"]]);
    for n in 2..=6 {
        grid.push_row([format!("i{n}"), format!("item {n}"), String::new()]);
    }
    let mut table = keyed(grid);

    let report = table
        .save([
            Record::new().with_row_number(5).with("name", "renamed"),
            Record::new().with("id", "brand-new").with("name", "x"),
            Record::new().with_row_number(5).with("note", "noted"),
        ])
        .expect("save");
    assert_eq!(
        report,
        SaveReport {
            appended: 1,
            updated: 1,
            write_ops: 2,
            deferred: false,
        }
    );
    assert_eq!(table.stats().full_loads, 1);
    assert_eq!(writes(&table), vec!["B5:C5", "A7:C7"]);
    assert_eq!(
        table.store().row_values(5),
        vec![
            CellValue::from("i5"),
            CellValue::from("renamed"),
            CellValue::from("noted")
        ]
    );
    assert_eq!(table.store().cell(7, 1), CellValue::from("brand-new"));
}

#[test]
fn date_times_within_the_same_minute_are_unchanged() {
    let mut table = Table::new(event_log(), TableOptions::new("Log")).expect("table");

    let report = table
        .save([Record::new()
            .with_row_number(2)
            .with("at", at(10, 0, 45))
            .with("event", "boot")])
        .expect("same minute");
    assert_eq!(report, SaveReport::default());
    assert!(table.store().writes().is_empty());

    let report = table
        .save([Record::new().with_row_number(2).with("at", at(10, 1, 5))])
        .expect("next minute");
    assert_eq!(report.updated, 1);
    assert_eq!(report.write_ops, 1);
    assert_eq!(writes(&table), vec!["A2"]);
    assert_eq!(table.store().cell(2, 1), CellValue::from(at(10, 1, 5)));
}

#[test]
fn date_time_keys_resolve_within_the_same_minute() {
    let options = TableOptions::new("Log").with_primary_key(["at"]);
    let mut table = Table::new(event_log(), options).expect("table");

    let found = table
        .read(Query::new().eq("at", at(10, 0, 50)), None, None)
        .expect("read");
    assert_eq!(found.len(), 1);
    assert_eq!(table.stats().index_hits, 1);

    let report = table
        .save([Record::new().with("at", at(10, 0, 45)).with("event", "restart")])
        .expect("save");
    assert_eq!(report.appended, 0);
    assert_eq!(report.updated, 1);
    assert_eq!(writes(&table), vec!["B2"]);
    assert_eq!(table.store().last_row().expect("last row"), 2);
}
