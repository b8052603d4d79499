use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use log::{debug, error, info, warn};
use tokio::io::DuplexStream;
use tokio::net::{TcpListener, TcpStream};
use tokio::runtime::Handle;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_modbus::server::tcp::Server;
use tokio_util::sync::CancellationToken;
use url::Url;

use super::models::*;
use super::{DeviceError, Result};
use crate::modbus::{Addressing, RegisterService};
use crate::registers::SharedRegisterStore;
use crate::serial::{SerialInterface, SerialParameters};

/// A Modbus transport the connection manager can drive.
///
/// Implementations never block: `connect_device` spawns the open/bind and
/// reports the outcome later through `TransportEvent`s.
#[async_trait::async_trait]
pub trait Transport: Send {
    fn kind(&self) -> TransportKind;

    /// Apply `config` and start listening in the background
    fn connect_device(&mut self, config: &ConnectionConfig) -> Result<()>;

    /// Stop listening; an `Unconnected` notification follows
    async fn disconnect_device(&mut self);

    /// Stop immediately without notifying, used on teardown
    fn abort(&mut self);

    /// Human readable text of the last error
    fn error_string(&self) -> String;

    /// Address the transport is bound to while connected, if it has one
    fn local_address(&self) -> Option<SocketAddr> {
        None
    }
}

/// Posts transport notifications and remembers the last error text
#[derive(Clone)]
pub(crate) struct Notifier {
    tx: mpsc::UnboundedSender<TransportEvent>,
    last_error: Arc<Mutex<String>>,
}

impl Notifier {
    fn new(tx: mpsc::UnboundedSender<TransportEvent>) -> Self {
        Self {
            tx,
            last_error: Arc::new(Mutex::new(String::new())),
        }
    }

    fn state(&self, state: ConnectionState) {
        // The receiver is gone once the manager released this transport
        let _ = self.tx.send(TransportEvent::StateChanged(state));
    }

    fn error(&self, kind: TransportErrorKind, message: String) {
        self.remember(&message);
        let _ = self.tx.send(TransportEvent::ErrorOccurred { kind, message });
    }

    fn remember(&self, message: &str) {
        let mut last = self.last_error.lock().unwrap_or_else(|p| p.into_inner());
        *last = message.to_string();
    }

    fn last_error(&self) -> String {
        self.last_error.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }
}

/// State shared by both transport kinds
struct TransportCore {
    runtime: Handle,
    notifier: Notifier,
    store: SharedRegisterStore,
    device_events: broadcast::Sender<DeviceEvent>,
    task: Option<JoinHandle<()>>,
    /// Cancelled when the connection stops; every client of the session holds a clone
    shutdown: CancellationToken,
}

impl TransportCore {
    fn new(
        kind: TransportKind,
        notifications: mpsc::UnboundedSender<TransportEvent>,
        store: SharedRegisterStore,
        device_events: broadcast::Sender<DeviceEvent>,
    ) -> Result<Self> {
        let runtime = Handle::try_current().map_err(|e| {
            error!("Cannot create Modbus {} without a runtime: {}", kind.device_noun(), e);
            DeviceError::TransportCreation(kind)
        })?;

        Ok(Self {
            runtime,
            notifier: Notifier::new(notifications),
            store,
            device_events,
            task: None,
            shutdown: CancellationToken::new(),
        })
    }

    /// Start a new session and return its shutdown token
    fn begin(&mut self) -> CancellationToken {
        self.shutdown.cancel();
        self.shutdown = CancellationToken::new();
        self.shutdown.clone()
    }

    fn service(&self, unit_id: u8, addressing: Addressing) -> RegisterService {
        RegisterService::new(self.store.clone(), unit_id, addressing)
            .with_events(self.device_events.clone())
            .with_shutdown(self.shutdown.clone())
    }

    /// Record an immediate failure so `error_string` reflects it
    fn fail(&self, err: DeviceError) -> DeviceError {
        self.notifier.remember(&err.to_string());
        err
    }

    fn start(&mut self, task: JoinHandle<()>) {
        if let Some(previous) = self.task.replace(task) {
            previous.abort();
        }
    }

    async fn stop(&mut self) {
        self.shutdown.cancel();
        if let Some(task) = self.task.take() {
            task.abort();
            // Wait for the task to drop its listener or port before acknowledging
            let _ = task.await;
        }
        self.notifier.state(ConnectionState::Unconnected);
    }

    fn abort(&mut self) {
        self.shutdown.cancel();
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for TransportCore {
    fn drop(&mut self) {
        self.abort();
    }
}

/// Modbus RTU slave on a serial line
pub struct SerialTransport {
    core: TransportCore,
}

impl SerialTransport {
    pub fn new(
        notifications: mpsc::UnboundedSender<TransportEvent>,
        store: SharedRegisterStore,
        device_events: broadcast::Sender<DeviceEvent>,
    ) -> Result<Self> {
        let core = TransportCore::new(TransportKind::Serial, notifications, store, device_events)?;
        Ok(Self { core })
    }
}

#[async_trait::async_trait]
impl Transport for SerialTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Serial
    }

    fn connect_device(&mut self, config: &ConnectionConfig) -> Result<()> {
        let params = match &config.endpoint {
            Endpoint::Serial(params) => params.clone(),
            Endpoint::Network { .. } => {
                return Err(self.core.fail(DeviceError::Connect(
                    "serial transport cannot open a network endpoint".to_string(),
                )))
            }
        };
        SerialInterface::validate(&params).map_err(|e| self.core.fail(DeviceError::SerialError(e)))?;

        info!(
            "Starting Modbus RTU slave {} on {}",
            config.server_address, params.port_name
        );
        self.core.begin();
        let service = self.core.service(config.server_address, Addressing::Rtu);
        let notifier = self.core.notifier.clone();
        let task = self.core.runtime.spawn(serve_rtu(params, service, notifier));
        self.core.start(task);
        Ok(())
    }

    async fn disconnect_device(&mut self) {
        self.core.stop().await;
    }

    fn abort(&mut self) {
        self.core.abort();
    }

    fn error_string(&self) -> String {
        self.core.notifier.last_error()
    }
}

async fn serve_rtu(params: SerialParameters, service: RegisterService, notifier: Notifier) {
    let stream = match SerialInterface::open(&params) {
        Ok(stream) => stream,
        Err(e) => {
            error!("Could not open {}: {}", params.port_name, e);
            notifier.error(TransportErrorKind::ConnectionError, e.to_string());
            notifier.state(ConnectionState::Unconnected);
            return;
        }
    };
    notifier.state(ConnectionState::Connected);

    let server = tokio_modbus::server::rtu::Server::new(stream);
    let outcome = server.serve_forever(service).await;
    warn!("Modbus RTU slave on {} stopped: {:?}", params.port_name, outcome);
    notifier.error(
        TransportErrorKind::ReadError,
        format!("Serial port {} closed", params.port_name),
    );
    notifier.state(ConnectionState::Unconnected);
}

/// Modbus TCP server
pub struct NetworkTransport {
    core: TransportCore,
    local_address: Arc<Mutex<Option<SocketAddr>>>,
}

impl NetworkTransport {
    pub fn new(
        notifications: mpsc::UnboundedSender<TransportEvent>,
        store: SharedRegisterStore,
        device_events: broadcast::Sender<DeviceEvent>,
    ) -> Result<Self> {
        let core = TransportCore::new(TransportKind::Network, notifications, store, device_events)?;
        Ok(Self {
            core,
            local_address: Arc::new(Mutex::new(None)),
        })
    }
}

#[async_trait::async_trait]
impl Transport for NetworkTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Network
    }

    fn connect_device(&mut self, config: &ConnectionConfig) -> Result<()> {
        let address = match &config.endpoint {
            Endpoint::Network { address } => address,
            Endpoint::Serial(_) => {
                return Err(self.core.fail(DeviceError::Connect(
                    "network transport cannot open a serial endpoint".to_string(),
                )))
            }
        };
        let (host, port) = resolve_network_address(address).map_err(|e| self.core.fail(e))?;

        info!(
            "Starting Modbus TCP server {} on {}:{}",
            config.server_address, host, port
        );
        let shutdown = self.core.begin();
        let service = self.core.service(config.server_address, Addressing::Tcp);
        let session = TcpSession {
            service,
            notifier: self.core.notifier.clone(),
            shutdown,
            local_address: self.local_address.clone(),
        };
        let task = self.core.runtime.spawn(serve_tcp(host, port, session));
        self.core.start(task);
        Ok(())
    }

    async fn disconnect_device(&mut self) {
        self.core.stop().await;
        set_local_address(&self.local_address, None);
    }

    fn abort(&mut self) {
        self.core.abort();
        set_local_address(&self.local_address, None);
    }

    fn error_string(&self) -> String {
        self.core.notifier.last_error()
    }

    fn local_address(&self) -> Option<SocketAddr> {
        *self.local_address.lock().unwrap_or_else(|p| p.into_inner())
    }
}

fn set_local_address(slot: &Mutex<Option<SocketAddr>>, address: Option<SocketAddr>) {
    *slot.lock().unwrap_or_else(|p| p.into_inner()) = address;
}

/// Everything one TCP listening session needs
struct TcpSession {
    service: RegisterService,
    notifier: Notifier,
    shutdown: CancellationToken,
    local_address: Arc<Mutex<Option<SocketAddr>>>,
}

/// Buffer of the in-process pipe between a client socket and its Modbus codec
const CLIENT_PIPE_CAPACITY: usize = 4096;

async fn serve_tcp(host: String, port: u16, session: TcpSession) {
    let TcpSession {
        service,
        notifier,
        shutdown,
        local_address,
    } = session;

    let listener = match TcpListener::bind((host.as_str(), port)).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Could not listen on {}:{}: {}", host, port, e);
            notifier.error(
                TransportErrorKind::ConnectionError,
                format!("Could not listen on {}:{}: {}", host, port, e),
            );
            notifier.state(ConnectionState::Unconnected);
            return;
        }
    };
    if let Ok(local) = listener.local_addr() {
        info!("Modbus TCP server listening on {}", local);
        set_local_address(&local_address, Some(local));
    }
    notifier.state(ConnectionState::Connected);

    let server = Server::new(listener);
    let on_connected = move |stream: TcpStream, socket_addr: SocketAddr| {
        let service = service.clone();
        let shutdown = shutdown.clone();
        async move {
            // The codec reads a pipe the relay feeds, so cancelling the relay ends the client
            let (bridge, codec_side) = tokio::io::duplex(CLIENT_PIPE_CAPACITY);
            tokio::spawn(relay_client(stream, bridge, socket_addr, shutdown));
            std::io::Result::Ok(Some((service, codec_side)))
        }
    };
    let error_notifier = notifier.clone();
    let on_process_error = move |err| {
        let message = format!("Modbus server error: {err}");
        error!("{}", message);
        error_notifier.error(TransportErrorKind::ProtocolError, message);
    };

    if let Err(e) = server.serve(&on_connected, on_process_error).await {
        notifier.error(
            TransportErrorKind::ConnectionError,
            format!("Modbus TCP server on {}:{} failed: {}", host, port, e),
        );
    }
    set_local_address(&local_address, None);
    notifier.state(ConnectionState::Unconnected);
}

/// Copy bytes between a client socket and its codec pipe until either side
/// closes or the session shuts down. Dropping both ends closes the client.
async fn relay_client(
    mut stream: TcpStream,
    mut bridge: DuplexStream,
    peer: SocketAddr,
    shutdown: CancellationToken,
) {
    tokio::select! {
        biased;
        _ = shutdown.cancelled() => info!("Closing Modbus client {}", peer),
        outcome = tokio::io::copy_bidirectional(&mut stream, &mut bridge) => match outcome {
            Ok(_) => debug!("Modbus client {} disconnected", peer),
            Err(e) => debug!("Modbus client {} connection ended: {}", peer, e),
        },
    }
}

/// Resolve user text such as `127.0.0.1:502`, `localhost` or `tcp://[::1]:1502`
/// into a host and port. A missing port means the standard Modbus TCP port.
pub fn resolve_network_address(text: &str) -> Result<(String, u16)> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(DeviceError::InvalidAddress("address is empty".to_string()));
    }

    let with_scheme = if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("tcp://{}", trimmed)
    };
    let url = Url::parse(&with_scheme)
        .map_err(|e| DeviceError::InvalidAddress(format!("{}: {}", trimmed, e)))?;

    let host = url
        .host_str()
        .map(|h| h.trim_start_matches('[').trim_end_matches(']'))
        .filter(|h| !h.is_empty())
        .ok_or_else(|| DeviceError::InvalidAddress(format!("{}: missing host", trimmed)))?
        .to_string();
    let port = url.port().unwrap_or(DEFAULT_MODBUS_TCP_PORT);

    Ok((host, port))
}
