//! Ties the register table, the register store and the connection manager
//! together the way the front end expects.
//!
//! Table values are loaded into the store in hexadecimal whenever the
//! connection is toggled or the register quantity changes. A single edited cell
//! is parsed as decimal and only reaches the store while connected.

use std::time::Duration;

use tokio::sync::broadcast;

use crate::config::AppSettings;
use crate::device::{
    ConnectionConfig, ConnectionManager, ConnectionState, DeviceError, DeviceEvent, Endpoint,
    Result, TransportKind, DEFAULT_NETWORK_ADDRESS,
};
use crate::registers::{
    parse_register_value, BulkWriteReport, RegisterClass, RegisterStore, RegisterTable,
    SharedRegisterStore, CELL_EDIT_RADIX, TABLE_RADIX,
};

/// Capacity of the front-end event channel
pub const EVENT_CAPACITY: usize = 256;

/// Outcome of a connect button press
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToggleOutcome {
    ConnectRequested,
    ConnectFailed,
    Disconnected,
    /// A disconnect is still in progress; nothing was done
    Busy,
}

pub struct SlaveController {
    settings: AppSettings,
    manager: ConnectionManager,
    store: SharedRegisterStore,
    table: RegisterTable,
}

impl SlaveController {
    /// Build the controller and select the transport named in `settings`
    pub async fn new(settings: AppSettings) -> Self {
        let (events_tx, _events_rx) = broadcast::channel(EVENT_CAPACITY);
        let store = RegisterStore::shared(settings.register_quantity);
        let manager = ConnectionManager::new(store.clone(), events_tx);
        let table = RegisterTable::new(settings.register_quantity);

        let mut controller = Self {
            settings,
            manager,
            store,
            table,
        };
        let kind = controller.settings.transport;
        // A creation failure is already on the status line
        let _ = controller.select_transport(kind).await;
        controller
    }

    pub fn settings(&self) -> &AppSettings {
        &self.settings
    }

    pub fn manager(&self) -> &ConnectionManager {
        &self.manager
    }

    pub fn manager_mut(&mut self) -> &mut ConnectionManager {
        &mut self.manager
    }

    pub fn store(&self) -> SharedRegisterStore {
        self.store.clone()
    }

    pub fn table(&self) -> &RegisterTable {
        &self.table
    }

    pub fn state(&self) -> ConnectionState {
        self.manager.state()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DeviceEvent> {
        self.manager.subscribe()
    }

    pub fn status_message(&self) -> Option<&str> {
        self.manager.status_message()
    }

    /// Read a register from the store
    pub fn read_register(&self, class: RegisterClass, address: usize) -> Result<u16> {
        Ok(RegisterStore::lock(&self.store).read(class, address)?)
    }

    /// Switch the transport; an empty address for the network kind becomes the default
    pub async fn select_transport(&mut self, kind: TransportKind) -> Result<()> {
        self.settings.transport = kind;
        if kind == TransportKind::Network && self.settings.port.trim().is_empty() {
            self.settings.port = DEFAULT_NETWORK_ADDRESS.to_string();
        }
        self.manager.select_transport(kind).await
    }

    /// Set the serial port name or network address text
    pub fn set_port(&mut self, port: impl Into<String>) {
        self.settings.port = port.into();
    }

    pub fn set_server_address(&mut self, address: u8) {
        self.settings.server_address = address;
    }

    /// Connection parameters as they stand right now
    pub fn connection_config(&self) -> ConnectionConfig {
        let endpoint = match self.settings.transport {
            TransportKind::Serial => Endpoint::Serial(self.settings.serial.parameters(&self.settings.port)),
            TransportKind::Network => Endpoint::Network {
                address: self.settings.port.clone(),
            },
        };
        ConnectionConfig {
            endpoint,
            server_address: self.settings.server_address,
        }
    }

    /// Resize the table and the register map, then reload what the table holds
    pub fn set_register_quantity(&mut self, quantity: usize) -> Result<()> {
        if quantity > AppSettings::MAX_REGISTER_QUANTITY {
            return Err(DeviceError::InvalidConfiguration(format!(
                "register quantity {} exceeds {}",
                quantity,
                AppSettings::MAX_REGISTER_QUANTITY
            )));
        }

        self.settings.register_quantity = quantity;
        self.table.resize(quantity);
        let report = {
            let mut store = RegisterStore::lock(&self.store);
            store.resize(quantity);
            store.write_bulk(&self.table, TABLE_RADIX)
        };
        self.report_bulk_failures(&report);
        Ok(())
    }

    /// Connect button: connect when unconnected, disconnect otherwise, then
    /// refresh the register map from the table
    pub async fn toggle_connection(&mut self) -> ToggleOutcome {
        let state = self.manager.state();
        if state == ConnectionState::Closing {
            log::debug!("Connect button pressed while closing, ignored");
            return ToggleOutcome::Busy;
        }
        self.manager.clear_status_message();

        let outcome = if state == ConnectionState::Unconnected {
            let config = self.connection_config();
            match self.manager.connect(&config) {
                Ok(()) => {
                    self.manager.show_status_message("Connected");
                    ToggleOutcome::ConnectRequested
                }
                Err(e) => {
                    let reason = match e {
                        DeviceError::Connect(text) => text,
                        other => other.to_string(),
                    };
                    self.manager.show_status_message(format!("Connect failed: {}", reason));
                    ToggleOutcome::ConnectFailed
                }
            }
        } else {
            if let Err(e) = self.manager.disconnect().await {
                log::warn!("Disconnect request refused: {}", e);
            }
            self.manager.show_status_message("Disconnected");
            ToggleOutcome::Disconnected
        };

        self.reload_registers();
        outcome
    }

    /// Zero the configured registers and load every filled table cell
    pub fn reload_registers(&mut self) -> BulkWriteReport {
        let report = {
            let mut store = RegisterStore::lock(&self.store);
            store.zero_fill(self.settings.register_quantity);
            store.write_bulk(&self.table, TABLE_RADIX)
        };
        self.report_bulk_failures(&report);
        report
    }

    /// A table cell was edited. The text is always kept in the table; the store
    /// only changes while connected.
    pub fn edit_cell(&mut self, row: usize, column: usize, text: &str) -> Result<bool> {
        if !self.table.set_cell(row, column, text) {
            let err = DeviceError::RegisterWrite(crate::registers::RegisterError::OutOfRange {
                class: RegisterClass::HoldingRegisters,
                address: RegisterTable::address_of(row, column),
                capacity: RegisterStore::lock(&self.store).capacity(),
            });
            self.manager.show_status_message(err.to_string());
            return Err(err);
        }

        if self.manager.state() != ConnectionState::Connected {
            log::debug!("Cell ({}, {}) edited while not connected, store unchanged", row, column);
            return Ok(false);
        }

        let address = RegisterTable::address_of(row, column);
        let outcome = parse_register_value(text, CELL_EDIT_RADIX)
            .and_then(|value| RegisterStore::lock(&self.store).write_mirrored(address, value));

        match outcome {
            Ok(()) => Ok(true),
            Err(e) => {
                let err = DeviceError::RegisterWrite(e);
                self.manager.show_status_message(err.to_string());
                Err(err)
            }
        }
    }

    /// Handle queued transport notifications without waiting
    pub fn process_notifications(&mut self) -> usize {
        self.manager.process_pending_notifications()
    }

    pub async fn wait_for_state(&mut self, target: ConnectionState, limit: Duration) -> Result<()> {
        self.manager.wait_for_state(target, limit).await
    }

    fn report_bulk_failures(&mut self, report: &BulkWriteReport) {
        match report.failures.as_slice() {
            [] => {}
            [only] => {
                let message = format!("Could not set register: {}", only.error);
                self.manager.show_status_message(message);
            }
            failures => {
                let cells: Vec<String> = failures
                    .iter()
                    .map(|f| format!("({}, {}) {}", f.row, f.column, f.error))
                    .collect();
                let message = format!(
                    "Could not set {} registers: {}",
                    failures.len(),
                    cells.join("; ")
                );
                self.manager.show_status_message(message);
            }
        }
    }
}
