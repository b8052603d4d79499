use std::net::SocketAddr;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{broadcast, mpsc};

use super::{
    ActionState, ConnectionConfig, ConnectionState, DeviceError, DeviceEvent, NetworkTransport,
    Result, SerialTransport, Transport, TransportErrorKind, TransportEvent, TransportKind,
};
use crate::registers::SharedRegisterStore;

/// The transport currently owned by the manager together with the channel it
/// posts notifications on. Replacing the transport replaces the channel, so a
/// released transport can never deliver into the manager again.
struct ActiveTransport {
    device: Box<dyn Transport>,
    notifications: mpsc::UnboundedReceiver<TransportEvent>,
}

/// Owns at most one Modbus transport and tracks its connection state
pub struct ConnectionManager {
    active: Option<ActiveTransport>,
    kind: TransportKind,
    state: ConnectionState,
    actions: ActionState,
    status: Option<String>,
    store: SharedRegisterStore,
    events_tx: broadcast::Sender<DeviceEvent>,
}

impl ConnectionManager {
    pub fn new(store: SharedRegisterStore, events_tx: broadcast::Sender<DeviceEvent>) -> Self {
        Self {
            active: None,
            kind: TransportKind::default(),
            state: ConnectionState::Unconnected,
            actions: ActionState::default(),
            status: None,
            store,
            events_tx,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DeviceEvent> {
        self.events_tx.subscribe()
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn actions(&self) -> ActionState {
        self.actions
    }

    pub fn transport_kind(&self) -> TransportKind {
        self.kind
    }

    pub fn has_transport(&self) -> bool {
        self.active.is_some()
    }

    pub fn status_message(&self) -> Option<&str> {
        self.status.as_deref()
    }

    /// Text of the last error the active transport reported
    pub fn error_string(&self) -> String {
        self.active
            .as_ref()
            .map(|a| a.device.error_string())
            .unwrap_or_default()
    }

    /// Socket the active transport listens on, once connected
    pub fn local_address(&self) -> Option<SocketAddr> {
        self.active.as_ref().and_then(|a| a.device.local_address())
    }

    /// Show a line on the status bar
    pub fn show_status_message(&mut self, message: impl Into<String>) {
        let message = message.into();
        log::info!("Status: {}", message);
        self.status = Some(message.clone());
        let _ = self.events_tx.send(DeviceEvent::Status(message));
    }

    pub fn clear_status_message(&mut self) {
        self.status = None;
    }

    /// Replace the active transport with a fresh one of `kind`
    pub async fn select_transport(&mut self, kind: TransportKind) -> Result<()> {
        self.release_transport().await;
        self.kind = kind;

        let (tx, rx) = mpsc::unbounded_channel();
        let created: Result<Box<dyn Transport>> = match kind {
            TransportKind::Serial => SerialTransport::new(tx, self.store.clone(), self.events_tx.clone())
                .map(|t| Box::new(t) as Box<dyn Transport>),
            TransportKind::Network => NetworkTransport::new(tx, self.store.clone(), self.events_tx.clone())
                .map(|t| Box::new(t) as Box<dyn Transport>),
        };

        match created {
            Ok(device) => {
                self.active = Some(ActiveTransport {
                    device,
                    notifications: rx,
                });
                self.on_state_changed(ConnectionState::Unconnected);
                log::info!("Selected {} transport", kind.as_str());
                Ok(())
            }
            Err(e) => {
                self.state = ConnectionState::Unconnected;
                self.actions.connect_enabled = false;
                self.actions.disconnect_enabled = false;
                self.show_status_message(e.to_string());
                Err(e)
            }
        }
    }

    async fn release_transport(&mut self) {
        if let Some(mut active) = self.active.take() {
            if matches!(self.state, ConnectionState::Connected | ConnectionState::Connecting) {
                log::info!("Disconnecting {} transport before release", active.device.kind().as_str());
                active.device.disconnect_device().await;
            }
            active.device.abort();
        }
        self.state = ConnectionState::Unconnected;
    }

    /// Request a connection. The request is accepted or refused immediately;
    /// `Connected` arrives later as a notification.
    pub fn connect(&mut self, config: &ConnectionConfig) -> Result<()> {
        if self.state != ConnectionState::Unconnected {
            return Err(DeviceError::AlreadyConnected);
        }
        let active = self.active.as_mut().ok_or(DeviceError::TransportUnavailable)?;
        if config.kind() != active.device.kind() {
            return Err(DeviceError::Connect(format!(
                "{} endpoint given to the {} transport",
                config.kind().as_str(),
                active.device.kind().as_str()
            )));
        }

        active.device.connect_device(config)?;
        self.on_state_changed(ConnectionState::Connecting);
        Ok(())
    }

    /// Request a disconnect; `Unconnected` arrives as a notification
    pub async fn disconnect(&mut self) -> Result<()> {
        if !matches!(self.state, ConnectionState::Connected | ConnectionState::Connecting) {
            return Err(DeviceError::NotConnected);
        }
        if self.active.is_none() {
            return Err(DeviceError::TransportUnavailable);
        }

        self.on_state_changed(ConnectionState::Closing);
        if let Some(active) = self.active.as_mut() {
            active.device.disconnect_device().await;
        }
        Ok(())
    }

    pub fn on_state_changed(&mut self, state: ConnectionState) {
        self.state = state;

        let connected = state != ConnectionState::Unconnected;
        self.actions.connect_enabled = !connected;
        self.actions.disconnect_enabled = connected;
        match state {
            ConnectionState::Unconnected => self.actions.connect_label = "Connect",
            ConnectionState::Connected => self.actions.connect_label = "Disconnect",
            ConnectionState::Connecting | ConnectionState::Closing => {}
        }

        log::debug!("Connection state changed to {}", state.as_str());
        let _ = self.events_tx.send(DeviceEvent::StateChanged {
            state,
            actions: self.actions,
            at: Utc::now(),
        });
    }

    /// Surface an asynchronous transport error. The connection state is left alone.
    pub fn on_error_occurred(&mut self, kind: TransportErrorKind, message: &str) {
        if kind == TransportErrorKind::NoError || self.active.is_none() {
            return;
        }
        log::warn!("Transport error ({:?}): {}", kind, message);
        let err = DeviceError::Protocol(message.to_string());
        self.show_status_message(err.to_string());
    }

    pub fn handle_notification(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::StateChanged(state) => self.on_state_changed(state),
            TransportEvent::ErrorOccurred { kind, message } => self.on_error_occurred(kind, &message),
        }
    }

    /// Wait for the next notification from the active transport. Pends forever
    /// while there is no transport, which suits use inside `select!`.
    pub async fn next_notification(&mut self) -> Option<TransportEvent> {
        match self.active.as_mut() {
            Some(active) => active.notifications.recv().await,
            None => std::future::pending().await,
        }
    }

    /// Handle every notification already queued without waiting
    pub fn process_pending_notifications(&mut self) -> usize {
        let mut handled = 0;
        loop {
            let event = match self.active.as_mut() {
                Some(active) => match active.notifications.try_recv() {
                    Ok(event) => event,
                    Err(_) => break,
                },
                None => break,
            };
            self.handle_notification(event);
            handled += 1;
        }
        handled
    }

    /// Pump notifications until the connection reaches `target`
    pub async fn wait_for_state(&mut self, target: ConnectionState, limit: Duration) -> Result<()> {
        let wait = async {
            while self.state != target {
                match self.next_notification().await {
                    Some(event) => self.handle_notification(event),
                    None => return Err(DeviceError::TransportUnavailable),
                }
            }
            Ok(())
        };

        tokio::time::timeout(limit, wait).await.map_err(|_| {
            DeviceError::IoError(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                format!("timed out waiting for state {}", target.as_str()),
            ))
        })?
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        if let Some(active) = self.active.as_mut() {
            if self.state == ConnectionState::Connected {
                log::info!("Disconnecting {} transport on shutdown", active.device.kind().as_str());
            }
            active.device.abort();
        }
    }
}
