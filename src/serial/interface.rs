use serialport::SerialPortType;
use tokio_serial::{SerialPortBuilderExt, SerialStream};

use super::{Result, SerialError, SerialParameters, SerialPortInfo};

pub const DEFAULT_BAUD_RATE: u32 = 19200;

/// Serial line access for the RTU slave
pub struct SerialInterface;

impl SerialInterface {
    /// List the serial ports present on this machine
    pub fn discover_ports() -> Result<Vec<SerialPortInfo>> {
        let ports = serialport::available_ports()?;
        let mut found = Vec::with_capacity(ports.len());

        for port in ports {
            let info = match port.port_type {
                SerialPortType::UsbPort(usb_info) => SerialPortInfo {
                    port_name: port.port_name,
                    vid: Some(usb_info.vid),
                    pid: Some(usb_info.pid),
                    serial_number: usb_info.serial_number,
                    manufacturer: usb_info.manufacturer,
                    product: usb_info.product,
                },
                _ => SerialPortInfo {
                    port_name: port.port_name,
                    vid: None,
                    pid: None,
                    serial_number: None,
                    manufacturer: None,
                    product: None,
                },
            };
            found.push(info);
        }

        Ok(found)
    }

    /// Check parameters that can be rejected before touching the hardware
    pub fn validate(params: &SerialParameters) -> Result<()> {
        if params.port_name.trim().is_empty() {
            return Err(SerialError::InvalidParameters(
                "serial port name is empty".to_string(),
            ));
        }
        if params.baud_rate == 0 {
            return Err(SerialError::InvalidParameters(
                "baud rate must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Open the port as an async stream with the configured line settings.
    ///
    /// Must be called from within a tokio runtime.
    pub fn open(params: &SerialParameters) -> Result<SerialStream> {
        Self::validate(params)?;

        let port_name = params.port_name.trim();
        let stream = tokio_serial::new(port_name, params.baud_rate)
            .parity(params.parity)
            .data_bits(params.data_bits)
            .stop_bits(params.stop_bits)
            .open_native_async()
            .map_err(|e| match e.kind {
                serialport::ErrorKind::NoDevice => SerialError::PortNotFound(port_name.to_string()),
                _ => SerialError::OpenFailed(format!("{}: {}", port_name, e)),
            })?;

        log::info!(
            "Opened serial port {} ({} baud, {:?} parity, {:?} data bits, {:?} stop bits)",
            port_name,
            params.baud_rate,
            params.parity,
            params.data_bits,
            params.stop_bits
        );
        Ok(stream)
    }
}
