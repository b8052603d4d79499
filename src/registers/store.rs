use std::sync::{Arc, Mutex, MutexGuard};

use super::{
    parse_register_value, RegisterClass, RegisterError, RegisterTable, Result, CAPACITY_MARGIN,
};

/// Store shared between the control task and the protocol tasks serving requests
pub type SharedRegisterStore = Arc<Mutex<RegisterStore>>;

/// Backing memory for the input and holding registers.
///
/// Both banks always have the same capacity and every write through the
/// mirrored methods lands in both of them.
#[derive(Debug, Clone, PartialEq)]
pub struct RegisterStore {
    input_registers: Vec<u16>,
    holding_registers: Vec<u16>,
}

/// A single cell that could not be applied during a bulk write
#[derive(Debug, Clone, PartialEq)]
pub struct CellWriteError {
    pub row: usize,
    pub column: usize,
    pub error: RegisterError,
}

/// Outcome of a bulk write; failures never stop the remaining cells
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BulkWriteReport {
    pub written: usize,
    pub failures: Vec<CellWriteError>,
}

impl BulkWriteReport {
    pub fn is_ok(&self) -> bool {
        self.failures.is_empty()
    }
}

impl RegisterStore {
    pub fn new(register_quantity: usize) -> Self {
        let capacity = register_quantity + CAPACITY_MARGIN;
        Self {
            input_registers: vec![0; capacity],
            holding_registers: vec![0; capacity],
        }
    }

    pub fn shared(register_quantity: usize) -> SharedRegisterStore {
        Arc::new(Mutex::new(Self::new(register_quantity)))
    }

    /// Lock a shared store. A panicked writer cannot leave a bank half-sized, so a
    /// poisoned lock still holds usable data.
    pub fn lock(store: &SharedRegisterStore) -> MutexGuard<'_, RegisterStore> {
        store.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Reallocate both banks for a new register quantity, discarding every value
    pub fn resize(&mut self, register_quantity: usize) {
        let capacity = register_quantity + CAPACITY_MARGIN;
        self.input_registers = vec![0; capacity];
        self.holding_registers = vec![0; capacity];
        log::debug!("Register map resized to {} cells per class", capacity);
    }

    pub fn capacity(&self) -> usize {
        self.holding_registers.len()
    }

    fn bank(&self, class: RegisterClass) -> &Vec<u16> {
        match class {
            RegisterClass::InputRegisters => &self.input_registers,
            RegisterClass::HoldingRegisters => &self.holding_registers,
        }
    }

    fn bank_mut(&mut self, class: RegisterClass) -> &mut Vec<u16> {
        match class {
            RegisterClass::InputRegisters => &mut self.input_registers,
            RegisterClass::HoldingRegisters => &mut self.holding_registers,
        }
    }

    fn check_range(&self, class: RegisterClass, address: usize, count: usize) -> Result<()> {
        let capacity = self.capacity();
        match address.checked_add(count) {
            Some(end) if end <= capacity => Ok(()),
            _ => Err(RegisterError::OutOfRange {
                class,
                address: address.max(capacity),
                capacity,
            }),
        }
    }

    pub fn read(&self, class: RegisterClass, address: usize) -> Result<u16> {
        self.check_range(class, address, 1)?;
        Ok(self.bank(class)[address])
    }

    pub fn read_range(&self, class: RegisterClass, address: usize, count: usize) -> Result<Vec<u16>> {
        self.check_range(class, address, count)?;
        Ok(self.bank(class)[address..address + count].to_vec())
    }

    /// Write one cell of one class
    pub fn write_single(&mut self, class: RegisterClass, address: usize, value: u16) -> Result<()> {
        self.check_range(class, address, 1)?;
        self.bank_mut(class)[address] = value;
        Ok(())
    }

    /// Write one cell into both classes
    pub fn write_mirrored(&mut self, address: usize, value: u16) -> Result<()> {
        self.write_range_mirrored(address, std::slice::from_ref(&value))
    }

    /// Write a run of values into both classes. Nothing is written unless the whole
    /// run fits.
    pub fn write_range_mirrored(&mut self, address: usize, values: &[u16]) -> Result<()> {
        self.check_range(RegisterClass::HoldingRegisters, address, values.len())?;
        for class in RegisterClass::ALL {
            self.bank_mut(class)[address..address + values.len()].copy_from_slice(values);
        }
        Ok(())
    }

    /// Reset the first `count` addresses of both classes to zero
    pub fn zero_fill(&mut self, count: usize) {
        let end = count.min(self.capacity());
        for class in RegisterClass::ALL {
            self.bank_mut(class)[..end].fill(0);
        }
    }

    /// Apply every filled table cell, parsed in `radix`, to both classes.
    ///
    /// Cells that fail to parse or fall outside the store are collected in the
    /// report and leave their address untouched; the rest are still applied.
    pub fn write_bulk(&mut self, table: &RegisterTable, radix: u32) -> BulkWriteReport {
        let mut report = BulkWriteReport::default();

        for (row, column, text) in table.filled_cells() {
            let address = RegisterTable::address_of(row, column);
            let outcome = parse_register_value(text, radix)
                .and_then(|value| self.write_mirrored(address, value));

            match outcome {
                Ok(()) => report.written += 1,
                Err(error) => {
                    log::warn!("Could not set register at row {} column {}: {}", row, column, error);
                    report.failures.push(CellWriteError { row, column, error });
                }
            }
        }

        report
    }
}

impl Default for RegisterStore {
    fn default() -> Self {
        Self::new(0)
    }
}
