use std::future::Future;
use std::pin::pin;
use std::sync::Arc;
use std::task::{Context, Poll, Wake, Waker};
use std::time::Duration;

use modbus_slave_lib::device::{
    ConnectionConfig, ConnectionManager, ConnectionState, DeviceError, DeviceEvent, Endpoint,
    SerialTransport, TransportErrorKind, TransportKind,
};
use modbus_slave_lib::registers::{RegisterClass, RegisterStore};
use modbus_slave_lib::serial::SerialParameters;
use serialport::{DataBits, Parity, StopBits};
use tokio::sync::{broadcast, mpsc};
use tokio_modbus::client::{tcp::connect_slave, Writer};
use tokio_modbus::Slave;

const WAIT: Duration = Duration::from_secs(5);

fn manager() -> ConnectionManager {
    let (events_tx, _) = broadcast::channel(64);
    ConnectionManager::new(RegisterStore::shared(10), events_tx)
}

/// Poll a future once outside any runtime; it must finish immediately
fn poll_once<F: Future>(future: F) -> F::Output {
    struct NoopWake;
    impl Wake for NoopWake {
        fn wake(self: Arc<Self>) {}
    }

    let waker = Waker::from(Arc::new(NoopWake));
    let mut cx = Context::from_waker(&waker);
    let mut future = pin!(future);
    match future.as_mut().poll(&mut cx) {
        Poll::Ready(output) => output,
        Poll::Pending => panic!("future did not complete on first poll"),
    }
}

fn network(address: &str) -> ConnectionConfig {
    ConnectionConfig {
        endpoint: Endpoint::Network {
            address: address.to_string(),
        },
        server_address: 1,
    }
}

#[tokio::test]
async fn test_selecting_transport_twice_stays_unconnected() {
    let mut manager = manager();
    manager.select_transport(TransportKind::Network).await.unwrap();
    manager.select_transport(TransportKind::Network).await.unwrap();

    assert_eq!(manager.state(), ConnectionState::Unconnected);
    assert!(manager.has_transport());
    let actions = manager.actions();
    assert!(actions.connect_enabled);
    assert!(!actions.disconnect_enabled);
    assert_eq!(actions.connect_label, "Connect");
    assert_eq!(manager.process_pending_notifications(), 0);
}

#[tokio::test]
async fn test_no_error_is_ignored() {
    let mut manager = manager();
    manager.select_transport(TransportKind::Serial).await.unwrap();
    manager.on_error_occurred(TransportErrorKind::NoError, "nothing happened");
    assert_eq!(manager.status_message(), None);

    manager.on_error_occurred(TransportErrorKind::ReadError, "line dropped");
    assert_eq!(manager.status_message(), Some("line dropped"));
    assert_eq!(manager.state(), ConnectionState::Unconnected);
}

#[tokio::test]
async fn test_tcp_server_connects_and_disconnects() {
    let mut manager = manager();
    let mut events = manager.subscribe();
    manager.select_transport(TransportKind::Network).await.unwrap();

    manager.connect(&network("127.0.0.1:0")).unwrap();
    assert_eq!(manager.state(), ConnectionState::Connecting);
    assert!(!manager.actions().connect_enabled);

    manager.wait_for_state(ConnectionState::Connected, WAIT).await.unwrap();
    assert_eq!(manager.actions().connect_label, "Disconnect");
    assert!(manager.actions().disconnect_enabled);

    // Connecting twice is refused
    assert!(matches!(
        manager.connect(&network("127.0.0.1:0")),
        Err(DeviceError::AlreadyConnected)
    ));

    manager.disconnect().await.unwrap();
    manager.wait_for_state(ConnectionState::Unconnected, WAIT).await.unwrap();
    assert!(manager.actions().connect_enabled);
    assert_eq!(manager.actions().connect_label, "Connect");

    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let DeviceEvent::StateChanged { state, .. } = event {
            seen.push(state);
        }
    }
    assert_eq!(
        seen,
        vec![
            ConnectionState::Unconnected,
            ConnectionState::Connecting,
            ConnectionState::Connected,
            ConnectionState::Closing,
            ConnectionState::Unconnected,
        ]
    );
}

#[tokio::test]
async fn test_invalid_address_fails_immediately() {
    let mut manager = manager();
    manager.select_transport(TransportKind::Network).await.unwrap();

    let result = manager.connect(&network("127.0.0.1:99999"));
    assert!(matches!(result, Err(DeviceError::InvalidAddress(_))));
    assert_eq!(manager.state(), ConnectionState::Unconnected);
    assert!(!manager.error_string().is_empty());
}

#[tokio::test]
async fn test_disconnect_when_unconnected_is_refused() {
    let mut manager = manager();
    manager.select_transport(TransportKind::Network).await.unwrap();
    assert!(matches!(manager.disconnect().await, Err(DeviceError::NotConnected)));
}

#[tokio::test]
async fn test_endpoint_must_match_transport() {
    let mut manager = manager();
    manager.select_transport(TransportKind::Serial).await.unwrap();
    assert!(manager.connect(&network("127.0.0.1:0")).is_err());
    assert_eq!(manager.state(), ConnectionState::Unconnected);
}

#[tokio::test]
async fn test_missing_serial_port_reports_error() {
    let mut manager = manager();
    manager.select_transport(TransportKind::Serial).await.unwrap();

    let config = ConnectionConfig {
        endpoint: Endpoint::Serial(SerialParameters {
            port_name: "/dev/modbus-slave-no-such-port".to_string(),
            parity: Parity::Even,
            baud_rate: 19200,
            data_bits: DataBits::Eight,
            stop_bits: StopBits::One,
        }),
        server_address: 1,
    };
    manager.connect(&config).unwrap();
    manager.wait_for_state(ConnectionState::Unconnected, WAIT).await.unwrap();

    assert!(manager.status_message().is_some());
    assert!(!manager.error_string().is_empty());
}

#[test]
fn test_transport_creation_needs_runtime() {
    let (tx, _rx) = mpsc::unbounded_channel();
    let (events_tx, _) = broadcast::channel(4);
    let result = SerialTransport::new(tx, RegisterStore::shared(10), events_tx);
    let err = result.err().expect("creation outside a runtime must fail");
    assert_eq!(err.to_string(), "Could not create Modbus slave.");
}

#[test]
fn test_creation_failure_disables_connect() {
    let mut manager = manager();

    let result = poll_once(manager.select_transport(TransportKind::Network));
    assert!(matches!(
        result,
        Err(DeviceError::TransportCreation(TransportKind::Network))
    ));
    assert_eq!(manager.status_message(), Some("Could not create Modbus server."));
    assert!(!manager.has_transport());
    assert_eq!(manager.state(), ConnectionState::Unconnected);

    let actions = manager.actions();
    assert!(!actions.connect_enabled);
    assert!(!actions.disconnect_enabled);

    assert!(matches!(
        manager.connect(&network("127.0.0.1:0")),
        Err(DeviceError::TransportUnavailable)
    ));
    assert_eq!(manager.state(), ConnectionState::Unconnected);
}

#[tokio::test]
async fn test_disconnect_closes_established_clients() {
    let store = RegisterStore::shared(10);
    let (events_tx, _) = broadcast::channel(64);
    let mut manager = ConnectionManager::new(store.clone(), events_tx);
    manager.select_transport(TransportKind::Network).await.unwrap();
    manager.connect(&network("127.0.0.1:0")).unwrap();
    manager.wait_for_state(ConnectionState::Connected, WAIT).await.unwrap();
    let address = manager.local_address().expect("listening address while connected");

    let mut ctx = connect_slave(address, Slave(1)).await.unwrap();
    ctx.write_single_register(2, 5).await.unwrap().unwrap();
    assert_eq!(RegisterStore::lock(&store).read(RegisterClass::HoldingRegisters, 2).unwrap(), 5);

    manager.disconnect().await.unwrap();
    manager.wait_for_state(ConnectionState::Unconnected, WAIT).await.unwrap();
    assert_eq!(manager.local_address(), None);
    manager.select_transport(TransportKind::Serial).await.unwrap();

    let late = tokio::time::timeout(Duration::from_secs(2), ctx.write_single_register(3, 777)).await;
    assert!(
        !matches!(late, Ok(Ok(Ok(())))),
        "client was still served after disconnect: {:?}",
        late
    );
    assert_eq!(RegisterStore::lock(&store).read(RegisterClass::HoldingRegisters, 3).unwrap(), 0);
    assert_eq!(RegisterStore::lock(&store).read(RegisterClass::InputRegisters, 3).unwrap(), 0);
}
