use modbus_slave_lib::registers::{
    RegisterClass, RegisterError, RegisterStore, RegisterTable, CAPACITY_MARGIN, TABLE_RADIX,
};

#[test]
fn test_capacity_follows_quantity() {
    for quantity in [0, 1, 10, 57, 500] {
        let mut store = RegisterStore::new(3);
        store.resize(quantity);
        assert_eq!(store.capacity(), quantity + CAPACITY_MARGIN);
        for class in RegisterClass::ALL {
            let values = store.read_range(class, 0, store.capacity()).unwrap();
            assert!(values.iter().all(|v| *v == 0), "resize must clear {}", class);
        }
    }
}

#[test]
fn test_mirrored_write_lands_in_both_classes() {
    let mut store = RegisterStore::new(10);
    store.write_mirrored(7, 0xBEEF).unwrap();
    assert_eq!(store.read(RegisterClass::InputRegisters, 7).unwrap(), 0xBEEF);
    assert_eq!(store.read(RegisterClass::HoldingRegisters, 7).unwrap(), 0xBEEF);
}

#[test]
fn test_single_class_write_leaves_other_class() {
    let mut store = RegisterStore::new(10);
    store.write_single(RegisterClass::HoldingRegisters, 2, 9).unwrap();
    assert_eq!(store.read(RegisterClass::HoldingRegisters, 2).unwrap(), 9);
    assert_eq!(store.read(RegisterClass::InputRegisters, 2).unwrap(), 0);
}

#[test]
fn test_out_of_range_write_changes_nothing() {
    let mut store = RegisterStore::new(10);
    store.write_mirrored(18, 5).unwrap();

    let err = store.write_range_mirrored(18, &[1, 2, 3]).unwrap_err();
    assert!(matches!(err, RegisterError::OutOfRange { capacity: 20, .. }));
    assert_eq!(store.read(RegisterClass::HoldingRegisters, 18).unwrap(), 5);
    assert_eq!(store.read(RegisterClass::InputRegisters, 19).unwrap(), 0);

    assert!(store.write_mirrored(20, 1).is_err());
    assert!(store.read(RegisterClass::InputRegisters, 20).is_err());
}

#[test]
fn test_zero_fill_only_touches_leading_addresses() {
    let mut store = RegisterStore::new(10);
    store.write_mirrored(3, 1).unwrap();
    store.write_mirrored(15, 2).unwrap();
    store.zero_fill(10);
    assert_eq!(store.read(RegisterClass::HoldingRegisters, 3).unwrap(), 0);
    assert_eq!(store.read(RegisterClass::HoldingRegisters, 15).unwrap(), 2);

    // Larger than the store is clamped
    store.zero_fill(1000);
    assert_eq!(store.read(RegisterClass::InputRegisters, 15).unwrap(), 0);
}

#[test]
fn test_bulk_load_parses_hex() {
    let mut store = RegisterStore::new(10);
    let mut table = RegisterTable::new(10);
    table.set_cell(0, 2, "1A");
    table.set_cell(1, 0, "ffff");

    let report = store.write_bulk(&table, TABLE_RADIX);
    assert!(report.is_ok());
    assert_eq!(report.written, 2);
    assert_eq!(store.read(RegisterClass::InputRegisters, 2).unwrap(), 26);
    assert_eq!(store.read(RegisterClass::HoldingRegisters, 10).unwrap(), 0xFFFF);
}

#[test]
fn test_bulk_load_reports_every_failure() {
    let mut store = RegisterStore::new(10);
    let mut table = RegisterTable::new(10);
    table.set_cell(0, 0, "10000");
    table.set_cell(0, 1, "7");
    table.set_cell(0, 4, "zz");
    table.set_cell(0, 5, "   ");

    let report = store.write_bulk(&table, TABLE_RADIX);
    assert_eq!(report.written, 1);
    assert_eq!(report.failures.len(), 2);
    assert_eq!((report.failures[0].row, report.failures[0].column), (0, 0));
    assert_eq!((report.failures[1].row, report.failures[1].column), (0, 4));
    assert!(matches!(report.failures[0].error, RegisterError::InvalidValue { .. }));

    // Failed cells keep their previous value
    assert_eq!(store.read(RegisterClass::HoldingRegisters, 0).unwrap(), 0);
    assert_eq!(store.read(RegisterClass::HoldingRegisters, 1).unwrap(), 7);
}
