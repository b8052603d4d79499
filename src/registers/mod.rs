pub mod store;
pub mod table;

pub use store::{BulkWriteReport, CellWriteError, RegisterStore, SharedRegisterStore};
pub use table::{RegisterTable, TABLE_COLUMNS};

use serde::{Deserialize, Serialize};
use std::fmt;

/// Extra cells allocated beyond the configured quantity so the last table row is addressable
pub const CAPACITY_MARGIN: usize = 10;

/// Base used when the whole table is loaded into the store
pub const TABLE_RADIX: u32 = 16;

/// Base used for a single interactively edited cell
pub const CELL_EDIT_RADIX: u32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RegisterClass {
    InputRegisters,
    HoldingRegisters,
}

impl RegisterClass {
    pub const ALL: [RegisterClass; 2] = [RegisterClass::InputRegisters, RegisterClass::HoldingRegisters];

    pub fn as_str(&self) -> &'static str {
        match self {
            RegisterClass::InputRegisters => "input registers",
            RegisterClass::HoldingRegisters => "holding registers",
        }
    }
}

impl fmt::Display for RegisterClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegisterError {
    #[error("address {address} is outside {class} (capacity {capacity})")]
    OutOfRange {
        class: RegisterClass,
        address: usize,
        capacity: usize,
    },

    #[error("'{text}' is not a 16-bit register value in base {radix}")]
    InvalidValue { text: String, radix: u32 },
}

pub type Result<T> = std::result::Result<T, RegisterError>;

/// Parse cell text as an unsigned 16-bit register value.
///
/// Accepts an optional leading `+` and, in base 16, an optional `0x` prefix.
/// Negative text and anything that does not fit in 16 bits is rejected rather
/// than wrapped.
pub fn parse_register_value(text: &str, radix: u32) -> Result<u16> {
    let invalid = || RegisterError::InvalidValue {
        text: text.to_string(),
        radix,
    };

    let trimmed = text.trim();
    let unsigned = trimmed.strip_prefix('+').unwrap_or(trimmed);
    let digits = if radix == 16 {
        unsigned
            .strip_prefix("0x")
            .or_else(|| unsigned.strip_prefix("0X"))
            .unwrap_or(unsigned)
    } else {
        unsigned
    };

    if digits.is_empty() || digits.starts_with(|c: char| c == '+' || c == '-') {
        return Err(invalid());
    }
    u16::from_str_radix(digits, radix).map_err(|_| invalid())
}
