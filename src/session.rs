use std::sync::Arc;

use async_lock::Mutex;
use futures_core::Stream;
use futures_lite::StreamExt;
use uuid::Uuid;

use crate::async_util::{response_channel, EventHub, EventStream, Responder};
use crate::config::SessionConfig;
use crate::driver::SessionDriver;
use crate::error::ErrorKind;
use crate::transport::{BluetoothAdapter, GattClient, WriteType};
use crate::types::{ConnectionState, GattSlot, PeripheralHandle};
use crate::util::uuid_from_u16;
use crate::{Error, Result};

/// Client Characteristic Configuration descriptor.
pub const CLIENT_CHARACTERISTIC_CONFIGURATION: Uuid = uuid_from_u16(0x2902);

/// CCCD value enabling notifications.
pub const ENABLE_NOTIFICATION_VALUE: [u8; 2] = [0x01, 0x00];

/// A value pushed by the peripheral on a subscribed characteristic.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Notification {
    pub slot: GattSlot,
    pub value: Vec<u8>,
}

/// Published by the session driver, in the order things happened.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    StateChanged(ConnectionState),
    Notification(Notification),
    /// The connection was lost or could not be set up.
    Failure(Error),
}

pub(crate) enum Command {
    Connect {
        peripheral: PeripheralHandle,
        responder: Responder<Result<()>>,
    },
    Disconnect {
        responder: Responder<()>,
    },
    Write {
        slot: GattSlot,
        payload: Vec<u8>,
        write_type: WriteType,
        responder: Responder<Result<()>>,
    },
}

pub(crate) struct SessionShared {
    pub(crate) state: Mutex<ConnectionState>,
    pub(crate) peripheral: Mutex<Option<PeripheralHandle>>,
    pub(crate) events: EventHub<SessionEvent>,
}

/// Handle to one GATT connection.
///
/// All work happens in the [SessionDriver] returned by [GattSession::new],
/// which must be running for any operation to complete. Clones share the
/// same connection.
#[derive(Clone)]
pub struct GattSession {
    commands: async_channel::Sender<Command>,
    shared: Arc<SessionShared>,
}

impl GattSession {
    pub fn new(
        adapter: Arc<dyn BluetoothAdapter>,
        client: Arc<dyn GattClient>,
        config: SessionConfig,
    ) -> (Self, SessionDriver) {
        let shared = Arc::new(SessionShared {
            state: Mutex::new(ConnectionState::Disconnected),
            peripheral: Mutex::new(None),
            events: EventHub::new(config.event_capacity),
        });
        let (commands, command_receiver) = async_channel::unbounded();
        let driver = SessionDriver::new(command_receiver, shared.clone(), adapter, client, config);
        (Self { commands, shared }, driver)
    }

    /// Connects to `peripheral`, discovers its services and subscribes to the
    /// button notifications.
    ///
    /// Resolves once notifications are active, or with the error that ended
    /// the attempt.
    pub async fn connect(&self, peripheral: &PeripheralHandle) -> Result<()> {
        let (responder, waiter) = response_channel();
        self.send(Command::Connect {
            peripheral: peripheral.clone(),
            responder,
        })?;
        waiter.wait().await.unwrap_or_else(|| Err(driver_gone()))
    }

    /// Tears the connection down from any state. Does nothing when already disconnected.
    pub async fn disconnect(&self) {
        let (responder, waiter) = response_channel();
        if self.send(Command::Disconnect { responder }).is_ok() {
            let _ = waiter.wait().await;
        }
    }

    /// Writes `payload` to the characteristic at `slot`, waiting for the write response.
    pub async fn write(&self, slot: GattSlot, payload: &[u8]) -> Result<()> {
        self.write_with_type(slot, payload, WriteType::WithResponse)
            .await
    }

    pub async fn write_with_type(
        &self,
        slot: GattSlot,
        payload: &[u8],
        write_type: WriteType,
    ) -> Result<()> {
        let (responder, waiter) = response_channel();
        self.send(Command::Write {
            slot,
            payload: payload.to_vec(),
            write_type,
            responder,
        })?;
        waiter.wait().await.unwrap_or_else(|| Err(driver_gone()))
    }

    pub fn state(&self) -> ConnectionState {
        *self.shared.state.lock_blocking()
    }

    /// The peripheral of the current connection attempt.
    pub fn peripheral(&self) -> Option<PeripheralHandle> {
        self.shared.peripheral.lock_blocking().clone()
    }

    /// Subscribes to session events published from now on.
    pub fn events(&self) -> EventStream<SessionEvent> {
        self.shared.events.subscribe()
    }

    /// Values pushed by the peripheral while subscriptions are active.
    pub fn notifications(&self) -> impl Stream<Item = Notification> + Send + Unpin {
        self.events().filter_map(|event| match event {
            SessionEvent::Notification(notification) => Some(notification),
            _ => None,
        })
    }

    fn send(&self, command: Command) -> Result<()> {
        self.commands.try_send(command).map_err(|_| driver_gone())
    }
}

fn driver_gone() -> Error {
    Error::new(
        ErrorKind::Internal,
        None,
        "the session driver is not running",
    )
}
