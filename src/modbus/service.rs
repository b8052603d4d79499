//! Modbus request handling over the shared register store
//!
//! Serves function codes 0x03 (read holding registers), 0x04 (read input
//! registers), 0x06 (write single register) and 0x10 (write multiple
//! registers). Writes land in both register classes so the input and holding
//! banks stay identical.

use std::future;

use log::{debug, error, warn};
use tokio::sync::broadcast;
use tokio_modbus::prelude::*;
use tokio_util::sync::CancellationToken;

use crate::device::DeviceEvent;
use crate::registers::{RegisterClass, RegisterStore, SharedRegisterStore};

/// Unit id addressing every slave on a line at once
pub const BROADCAST_UNIT_ID: u8 = 0;

/// Unit id Modbus TCP clients commonly send when the server is addressed by IP alone
pub const TCP_DEFAULT_UNIT_ID: u8 = 0xFF;

/// Largest register count a single read may request
pub const MAX_READ_QUANTITY: u16 = 125;

/// Largest register count a single write-multiple may carry
pub const MAX_WRITE_QUANTITY: usize = 123;

/// How the unit id of a request is matched
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Addressing {
    /// Shared serial line. Requests for other units are left unanswered and
    /// broadcasts are executed without a reply.
    Rtu,
    /// Modbus TCP. The connection already selects the server, so the broadcast
    /// and 0xFF ids are served and any other id gets `GatewayTargetDevice`.
    Tcp,
}

/// Service instance handed to the tokio-modbus server for each connection
#[derive(Clone)]
pub struct RegisterService {
    store: SharedRegisterStore,
    unit_id: u8,
    addressing: Addressing,
    events: Option<broadcast::Sender<DeviceEvent>>,
    shutdown: Option<CancellationToken>,
}

impl RegisterService {
    pub fn new(store: SharedRegisterStore, unit_id: u8, addressing: Addressing) -> Self {
        Self {
            store,
            unit_id,
            addressing,
            events: None,
            shutdown: None,
        }
    }

    /// Publish a `RegistersWritten` event for every successful write
    pub fn with_events(mut self, events: broadcast::Sender<DeviceEvent>) -> Self {
        self.events = Some(events);
        self
    }

    /// Stop answering once `shutdown` is cancelled
    pub fn with_shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    fn is_shut_down(&self) -> bool {
        self.shutdown.as_ref().is_some_and(|token| token.is_cancelled())
    }

    /// Handle one request. `Ok(None)` means nothing goes back on the wire.
    pub fn handle(&self, slave: u8, request: Request<'_>) -> Result<Option<Response>, ExceptionCode> {
        if self.is_shut_down() {
            debug!("Dropping request for unit {} after shutdown", slave);
            return Ok(None);
        }

        match self.addressing {
            Addressing::Rtu if slave == BROADCAST_UNIT_ID => {
                self.execute_broadcast(request);
                Ok(None)
            }
            Addressing::Rtu if slave != self.unit_id => {
                debug!("Ignoring request for unit {} (serving unit {})", slave, self.unit_id);
                Ok(None)
            }
            Addressing::Tcp
                if slave != self.unit_id
                    && slave != BROADCAST_UNIT_ID
                    && slave != TCP_DEFAULT_UNIT_ID =>
            {
                debug!("Rejecting request for unit {} (serving unit {})", slave, self.unit_id);
                Err(ExceptionCode::GatewayTargetDevice)
            }
            _ => self.execute(request).map(Some),
        }
    }

    fn execute_broadcast(&self, request: Request<'_>) {
        if matches!(
            request,
            Request::WriteSingleRegister(..) | Request::WriteMultipleRegisters(..)
        ) {
            if let Err(e) = self.execute(request) {
                warn!("Broadcast write rejected: {:?}", e);
            }
        } else {
            debug!("Ignoring broadcast request {request:?}");
        }
    }

    /// Execute one request against the store
    fn execute(&self, request: Request<'_>) -> Result<Response, ExceptionCode> {
        match request {
            Request::ReadInputRegisters(addr, cnt) => {
                debug!("Reading {} input registers starting from address {}", cnt, addr);
                self.read(RegisterClass::InputRegisters, addr, cnt)
                    .map(Response::ReadInputRegisters)
            }
            Request::ReadHoldingRegisters(addr, cnt) => {
                debug!("Reading {} holding registers starting from address {}", cnt, addr);
                self.read(RegisterClass::HoldingRegisters, addr, cnt)
                    .map(Response::ReadHoldingRegisters)
            }
            Request::WriteSingleRegister(addr, value) => {
                debug!("Writing value {} to holding register {}", value, addr);
                self.write(addr, std::slice::from_ref(&value))
                    .map(|_| Response::WriteSingleRegister(addr, value))
            }
            Request::WriteMultipleRegisters(addr, values) => {
                debug!(
                    "Writing {} values to holding registers starting from address {}",
                    values.len(),
                    addr
                );
                if values.is_empty() || values.len() > MAX_WRITE_QUANTITY {
                    return Err(ExceptionCode::IllegalDataValue);
                }
                self.write(addr, &values)
                    .map(|_| Response::WriteMultipleRegisters(addr, values.len() as u16))
            }
            other => {
                error!("Exception::IllegalFunction - Unimplemented function code in request: {other:?}");
                Err(ExceptionCode::IllegalFunction)
            }
        }
    }

    fn read(&self, class: RegisterClass, addr: u16, cnt: u16) -> Result<Vec<u16>, ExceptionCode> {
        if cnt == 0 || cnt > MAX_READ_QUANTITY {
            return Err(ExceptionCode::IllegalDataValue);
        }
        let store = RegisterStore::lock(&self.store);
        store
            .read_range(class, addr.into(), cnt.into())
            .map_err(|e| {
                error!("Exception::IllegalDataAddress - {}", e);
                ExceptionCode::IllegalDataAddress
            })
    }

    fn write(&self, addr: u16, values: &[u16]) -> Result<(), ExceptionCode> {
        {
            let mut store = RegisterStore::lock(&self.store);
            store.write_range_mirrored(addr.into(), values).map_err(|e| {
                error!("Exception::IllegalDataAddress - {}", e);
                ExceptionCode::IllegalDataAddress
            })?;
        }

        if let Some(events) = &self.events {
            // No subscribers is not an error for the protocol side
            let _ = events.send(DeviceEvent::RegistersWritten {
                class: RegisterClass::HoldingRegisters,
                address: addr.into(),
                count: values.len(),
            });
        }
        Ok(())
    }
}

impl tokio_modbus::server::Service for RegisterService {
    type Request = SlaveRequest<'static>;
    type Response = Option<Response>;
    type Exception = ExceptionCode;
    type Future = future::Ready<Result<Self::Response, Self::Exception>>;

    fn call(&self, req: Self::Request) -> Self::Future {
        let res = self.handle(req.slave, req.request);
        if let Err(e) = &res {
            warn!("Modbus request error: {:?}", e);
        }
        future::ready(res)
    }
}
