pub mod manager;
pub mod models;
pub mod transport;

pub use manager::ConnectionManager;
pub use models::*;
pub use transport::{NetworkTransport, SerialTransport, Transport};

#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    #[error("Could not create Modbus {}.", .0.device_noun())]
    TransportCreation(TransportKind),

    #[error("No Modbus transport available")]
    TransportUnavailable,

    #[error("Device already connected")]
    AlreadyConnected,

    #[error("Device not connected")]
    NotConnected,

    #[error("Connect failed: {0}")]
    Connect(String),

    #[error("Invalid device configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Invalid network address: {0}")]
    InvalidAddress(String),

    #[error("{0}")]
    Protocol(String),

    #[error("Could not set register: {0}")]
    RegisterWrite(#[from] crate::registers::RegisterError),

    #[error("Serial communication error: {0}")]
    SerialError(#[from] crate::serial::SerialError),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, DeviceError>;
