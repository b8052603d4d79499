use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::registers::RegisterClass;
use crate::serial::SerialParameters;

/// Address used for the network transport when the user has not entered one
pub const DEFAULT_NETWORK_ADDRESS: &str = "127.0.0.1:502";

pub const DEFAULT_MODBUS_TCP_PORT: u16 = 502;

/// Which transport the slave listens on
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    #[default]
    Serial,
    Network,
}

impl TransportKind {
    /// Selector index as shown in the transport drop-down
    pub fn from_index(index: usize) -> Option<Self> {
        match index {
            0 => Some(TransportKind::Serial),
            1 => Some(TransportKind::Network),
            _ => None,
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "serial" | "rtu" => Some(TransportKind::Serial),
            "network" | "tcp" => Some(TransportKind::Network),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TransportKind::Serial => "serial",
            TransportKind::Network => "network",
        }
    }

    /// What the Modbus device is called on this transport
    pub fn device_noun(&self) -> &'static str {
        match self {
            TransportKind::Serial => "slave",
            TransportKind::Network => "server",
        }
    }
}

/// Connection state of the active transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    Unconnected,
    Connecting,
    Connected,
    Closing,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Unconnected => "unconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Closing => "closing",
        }
    }
}

/// Error categories a transport reports asynchronously
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransportErrorKind {
    NoError,
    ReadError,
    ConnectionError,
    ProtocolError,
}

/// Where the slave listens
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Endpoint {
    Serial(SerialParameters),
    /// Raw address text as entered; resolved to host and port on connect
    Network { address: String },
}

/// Parameters captured at the moment a connect is issued
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    pub endpoint: Endpoint,
    pub server_address: u8,
}

impl ConnectionConfig {
    pub fn kind(&self) -> TransportKind {
        match self.endpoint {
            Endpoint::Serial(_) => TransportKind::Serial,
            Endpoint::Network { .. } => TransportKind::Network,
        }
    }
}

/// Notification posted by a transport to its manager
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    StateChanged(ConnectionState),
    ErrorOccurred {
        kind: TransportErrorKind,
        message: String,
    },
}

/// Which user actions are currently available
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ActionState {
    pub connect_enabled: bool,
    pub disconnect_enabled: bool,
    /// Label of the connect button, naming the next action
    pub connect_label: &'static str,
}

impl Default for ActionState {
    fn default() -> Self {
        Self {
            connect_enabled: true,
            disconnect_enabled: false,
            connect_label: "Connect",
        }
    }
}

/// Events published to the front end
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceEvent {
    StateChanged {
        state: ConnectionState,
        actions: ActionState,
        at: DateTime<Utc>,
    },
    Status(String),
    /// A Modbus client wrote registers; both classes hold the new values
    RegistersWritten {
        class: RegisterClass,
        address: usize,
        count: usize,
    },
}
