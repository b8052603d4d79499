use modbus_slave_lib::registers::{RegisterTable, TABLE_COLUMNS};

#[test]
fn test_row_count_for_quantity() {
    assert_eq!(RegisterTable::new(0).row_count(), 1);
    assert_eq!(RegisterTable::new(9).row_count(), 1);
    assert_eq!(RegisterTable::new(10).row_count(), 2);
    assert_eq!(RegisterTable::new(25).row_count(), 3);
    assert_eq!(RegisterTable::new(25).column_count(), TABLE_COLUMNS);
}

#[test]
fn test_resize_keeps_surviving_rows() {
    let mut table = RegisterTable::new(30);
    table.set_cell(0, 1, "5");
    table.set_cell(3, 9, "6");

    table.resize(15);
    assert_eq!(table.row_count(), 2);
    assert_eq!(table.cell(0, 1), Some("5"));
    assert_eq!(table.cell(3, 9), None);

    table.resize(30);
    assert_eq!(table.cell(3, 9), None, "dropped rows come back empty");
}

#[test]
fn test_cells_outside_grid_are_refused() {
    let mut table = RegisterTable::new(10);
    assert!(!table.set_cell(2, 0, "1"));
    assert!(!table.set_cell(0, TABLE_COLUMNS, "1"));
    assert!(table.set_cell(1, 9, "1"));
    assert_eq!(RegisterTable::address_of(1, 9), 19);
}

#[test]
fn test_labels() {
    let table = RegisterTable::new(20);
    assert_eq!(table.row_labels(), vec!["+0", "+10", "+20"]);
    let columns = table.column_labels();
    assert_eq!(columns.first().map(String::as_str), Some("+0"));
    assert_eq!(columns.last().map(String::as_str), Some("+9"));
}

#[test]
fn test_filled_cells_skip_blank_text() {
    let mut table = RegisterTable::new(10);
    table.set_cell(1, 2, "3");
    table.set_cell(0, 4, " ");
    table.set_cell(0, 1, "A");
    let filled: Vec<_> = table.filled_cells().collect();
    assert_eq!(filled, vec![(0, 1, "A"), (1, 2, "3")]);

    table.clear();
    assert_eq!(table.filled_cells().count(), 0);
}
