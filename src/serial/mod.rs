pub mod interface;

pub use interface::SerialInterface;

use serde::{Deserialize, Serialize};
use serialport::{DataBits, Parity, StopBits};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SerialPortInfo {
    pub port_name: String,
    pub vid: Option<u16>,
    pub pid: Option<u16>,
    pub serial_number: Option<String>,
    pub manufacturer: Option<String>,
    pub product: Option<String>,
}

/// Line settings applied to the serial port when the RTU slave opens it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerialParameters {
    pub port_name: String,
    pub parity: Parity,
    pub baud_rate: u32,
    pub data_bits: DataBits,
    pub stop_bits: StopBits,
}

#[derive(Debug, thiserror::Error)]
pub enum SerialError {
    #[error("Port not found: {0}")]
    PortNotFound(String),

    #[error("Invalid serial parameters: {0}")]
    InvalidParameters(String),

    #[error("Open failed: {0}")]
    OpenFailed(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialport error: {0}")]
    SerialportError(#[from] serialport::Error),
}

pub type Result<T> = std::result::Result<T, SerialError>;
