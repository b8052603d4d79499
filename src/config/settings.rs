use std::path::Path;

use serde::{Deserialize, Serialize};
use serialport::{DataBits, Parity, StopBits};

use super::{ConfigError, Result};
use crate::device::TransportKind;
use crate::registers::CAPACITY_MARGIN;
use crate::serial::interface::DEFAULT_BAUD_RATE;
use crate::serial::SerialParameters;

/// Serial line settings, as chosen in the settings dialog
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialSettings {
    pub parity: Parity,
    pub baud_rate: u32,
    pub data_bits: DataBits,
    pub stop_bits: StopBits,
}

impl Default for SerialSettings {
    fn default() -> Self {
        Self {
            parity: Parity::Even,
            baud_rate: DEFAULT_BAUD_RATE,
            data_bits: DataBits::Eight,
            stop_bits: StopBits::One,
        }
    }
}

impl SerialSettings {
    pub fn parameters(&self, port_name: &str) -> SerialParameters {
        SerialParameters {
            port_name: port_name.to_string(),
            parity: self.parity,
            baud_rate: self.baud_rate,
            data_bits: self.data_bits,
            stop_bits: self.stop_bits,
        }
    }
}

/// Application settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppSettings {
    pub transport: TransportKind,
    /// Serial port name, or network address text for the TCP server
    pub port: String,
    pub serial: SerialSettings,
    pub server_address: u8,
    pub register_quantity: usize,
    pub log_level: String,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            transport: TransportKind::Serial,
            port: String::new(),
            serial: SerialSettings::default(),
            server_address: 1,
            register_quantity: 10,
            log_level: "info".to_string(),
        }
    }
}

impl AppSettings {
    /// Largest quantity whose register map still fits 16-bit Modbus addresses
    pub const MAX_REGISTER_QUANTITY: usize = u16::MAX as usize + 1 - CAPACITY_MARGIN;

    /// Load settings from a JSON file. A missing file gives the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            log::info!("No settings at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let text = std::fs::read_to_string(path)?;
        let settings: AppSettings = serde_json::from_str(&text)?;
        settings.validate()?;
        log::info!("Loaded settings from {}", path.display());
        Ok(settings)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        self.validate()?;
        let text = serde_json::to_string_pretty(self)?;
        std::fs::write(path, text)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.register_quantity > Self::MAX_REGISTER_QUANTITY {
            return Err(ConfigError::Invalid(format!(
                "register_quantity {} exceeds {}",
                self.register_quantity,
                Self::MAX_REGISTER_QUANTITY
            )));
        }
        if self.serial.baud_rate == 0 {
            return Err(ConfigError::Invalid("serial.baud_rate must be greater than zero".to_string()));
        }
        if log_level_filter(&self.log_level).is_none() {
            return Err(ConfigError::Invalid(format!("unknown log level '{}'", self.log_level)));
        }
        Ok(())
    }

    pub fn level_filter(&self) -> log::LevelFilter {
        log_level_filter(&self.log_level).unwrap_or(log::LevelFilter::Info)
    }
}

fn log_level_filter(level: &str) -> Option<log::LevelFilter> {
    level.parse().ok()
}
