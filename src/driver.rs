//! The task that owns a GATT connection.
//!
//! Commands from [crate::GattSession] handles and callbacks from the host
//! stack arrive on two ordered channels and are handled one at a time here,
//! so every state transition happens in one place. At most one GATT request
//! is outstanding; writes arriving meanwhile wait in a FIFO queue.

use std::collections::{BTreeSet, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_lock::Mutex;
use futures_lite::FutureExt;
use log::{debug, info, trace, warn};

use crate::async_util::{sleep_until, Responder};
use crate::config::SessionConfig;
use crate::error::{ErrorKind, GattStatus, TransportFault};
use crate::session::{
    Command, Notification, SessionEvent, SessionShared, CLIENT_CHARACTERISTIC_CONFIGURATION,
    ENABLE_NOTIFICATION_VALUE,
};
use crate::topology::ServiceTopology;
use crate::transport::{BluetoothAdapter, GattCallback, GattClient, Permission, TransportEvent, WriteType};
use crate::types::{ConnectionState, GattSlot, PeripheralAddress, PeripheralHandle};
use crate::util::StatusExt;
use crate::{Error, Result};

/// Addresses of every peripheral a session of this process is connected or connecting to.
static CLAIMED_ADDRESSES: Mutex<BTreeSet<PeripheralAddress>> = Mutex::new(BTreeSet::new());

/// Exclusive use of a peripheral address, released on drop.
struct AddressClaim(PeripheralAddress);

impl AddressClaim {
    fn acquire(address: &PeripheralAddress) -> Option<Self> {
        CLAIMED_ADDRESSES
            .lock_blocking()
            .insert(address.clone())
            .then(|| Self(address.clone()))
    }
}

impl Drop for AddressClaim {
    fn drop(&mut self) {
        CLAIMED_ADDRESSES.lock_blocking().remove(&self.0);
    }
}

/// Runs the connection state machine of one [crate::GattSession].
///
/// Poll [SessionDriver::run] on any executor, or move it to its own thread
/// with [SessionDriver::spawn]. It returns after every session handle is
/// dropped, closing the connection first.
pub struct SessionDriver {
    commands: async_channel::Receiver<Command>,
    callbacks: async_channel::Receiver<(u64, TransportEvent)>,
    callback_sender: async_channel::Sender<(u64, TransportEvent)>,
    shared: Arc<SessionShared>,
    adapter: Arc<dyn BluetoothAdapter>,
    client: Arc<dyn GattClient>,
    config: SessionConfig,

    state: ConnectionState,
    // bumped for every connection so that callbacks of a closed one are ignored
    generation: u64,
    claim: Option<AddressClaim>,
    topology: Option<ServiceTopology>,
    pending_connect: Option<Responder<Result<()>>>,
    current: Option<Operation>,
    deadline: Option<Instant>,
    pending_subscriptions: VecDeque<GattSlot>,
    queued_writes: VecDeque<QueuedWrite>,
}

enum Input {
    Command(Command),
    Callback(u64, TransportEvent),
    Deadline,
    Closed,
}

/// The GATT request currently awaiting its callback.
enum Operation {
    Connect,
    Discover,
    Subscribe(GattSlot),
    Write {
        slot: GattSlot,
        responder: Responder<Result<()>>,
    },
}

impl Operation {
    fn describe(&self) -> String {
        match self {
            Operation::Connect => "connect".into(),
            Operation::Discover => "service discovery".into(),
            Operation::Subscribe(slot) => format!("subscription to {slot}"),
            Operation::Write { slot, .. } => format!("write to {slot}"),
        }
    }
}

struct QueuedWrite {
    slot: GattSlot,
    payload: Vec<u8>,
    write_type: WriteType,
    responder: Responder<Result<()>>,
}

impl SessionDriver {
    pub(crate) fn new(
        commands: async_channel::Receiver<Command>,
        shared: Arc<SessionShared>,
        adapter: Arc<dyn BluetoothAdapter>,
        client: Arc<dyn GattClient>,
        config: SessionConfig,
    ) -> Self {
        let (callback_sender, callbacks) = async_channel::unbounded();
        Self {
            commands,
            callbacks,
            callback_sender,
            shared,
            adapter,
            client,
            config,
            state: ConnectionState::Disconnected,
            generation: 0,
            claim: None,
            topology: None,
            pending_connect: None,
            current: None,
            deadline: None,
            pending_subscriptions: VecDeque::new(),
            queued_writes: VecDeque::new(),
        }
    }

    pub async fn run(mut self) {
        loop {
            match self.next_input().await {
                Input::Command(command) => self.handle_command(command),
                Input::Callback(generation, event) if generation == self.generation => {
                    self.handle_transport(event)
                }
                Input::Callback(generation, event) => {
                    trace!("discarding callback of closed connection #{generation}: {event:?}")
                }
                Input::Deadline => self.handle_deadline(),
                Input::Closed => break,
            }
        }
        debug!("all session handles dropped, stopping driver");
        if self.state != ConnectionState::Disconnected {
            self.teardown(None, true);
        }
        self.shared.events.close();
    }

    /// Runs the driver on a new thread.
    pub fn spawn(self) -> std::io::Result<std::thread::JoinHandle<()>> {
        std::thread::Builder::new()
            .name("gatt-session".into())
            .spawn(move || futures_lite::future::block_on(self.run()))
    }

    async fn next_input(&self) -> Input {
        let callbacks = async {
            match self.callbacks.recv().await {
                Ok((generation, event)) => Input::Callback(generation, event),
                // never happens, the driver holds a sender
                Err(_) => futures_lite::future::pending().await,
            }
        };
        let commands = async {
            match self.commands.recv().await {
                Ok(command) => Input::Command(command),
                Err(_) => Input::Closed,
            }
        };
        let deadline = async {
            sleep_until(self.deadline).await;
            Input::Deadline
        };
        callbacks.or(commands).or(deadline).await
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Connect {
                peripheral,
                responder,
            } => self.start_connect(peripheral, responder),
            Command::Disconnect { responder } => {
                if self.state != ConnectionState::Disconnected {
                    info!("disconnecting from {}", self.peripheral_name());
                    self.teardown(None, true);
                }
                responder.send(());
            }
            Command::Write {
                slot,
                payload,
                write_type,
                responder,
            } => self.enqueue_write(QueuedWrite {
                slot,
                payload,
                write_type,
                responder,
            }),
        }
    }

    fn start_connect(&mut self, peripheral: PeripheralHandle, responder: Responder<Result<()>>) {
        if self.state != ConnectionState::Disconnected {
            responder.send(Err(Error::new(
                ErrorKind::AlreadyConnected,
                None,
                format!("session is {:?} with {}", self.state, self.peripheral_name()),
            )));
            return;
        }
        if !self.adapter.is_available() || !self.adapter.is_enabled() {
            responder.send(Err(Error::new(
                ErrorKind::AdapterUnavailable,
                None,
                "the Bluetooth adapter is absent or disabled",
            )));
            return;
        }
        if !self.adapter.has_permission(Permission::Connect) {
            responder.send(Err(Error::new(
                ErrorKind::PermissionDenied,
                None,
                "connecting requires the Bluetooth connect permission",
            )));
            return;
        }

        let Some(claim) = AddressClaim::acquire(peripheral.address()) else {
            responder.send(Err(Error::new(
                ErrorKind::AlreadyConnected,
                None,
                format!("another session is connected to {peripheral}"),
            )));
            return;
        };

        self.generation += 1;
        let callback = GattCallback {
            generation: self.generation,
            sender: self.callback_sender.clone(),
        };
        info!("connecting to {peripheral}");
        if let Err(fault) = self.client.connect(peripheral.address(), callback) {
            warn!("the host refused to connect to {peripheral}: {fault}");
            self.client.close();
            self.generation += 1;
            responder.send(Err(Error::new(
                ErrorKind::ConnectFailed,
                Some(fault),
                format!("the host refused to connect to {peripheral}"),
            )));
            return;
        }
        *self.shared.peripheral.lock_blocking() = Some(peripheral);
        self.claim = Some(claim);
        self.pending_connect = Some(responder);
        self.begin(Operation::Connect, self.config.connect_timeout);
        self.set_state(ConnectionState::Connecting);
    }

    fn handle_transport(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::ConnectionStateChanged {
                connected: true, ..
            } => {
                if self.state != ConnectionState::Connecting {
                    warn!("connected callback while {:?}, ignored", self.state);
                    return;
                }
                self.finish();
                info!("connected to {}", self.peripheral_name());
                self.set_state(ConnectionState::Connected);
                self.start_discovery();
            }
            TransportEvent::ConnectionStateChanged {
                status,
                connected: false,
            } => match self.state {
                ConnectionState::Disconnected => {}
                ConnectionState::Connecting => {
                    let error = Error::new(
                        ErrorKind::ConnectFailed,
                        status_fault(status),
                        format!("{} refused or dropped the connection", self.peripheral_name()),
                    );
                    self.teardown(Some(error), false);
                }
                _ => {
                    warn!("{} disconnected unexpectedly", self.peripheral_name());
                    let error = Error::new(
                        ErrorKind::NotConnected,
                        status_fault(status),
                        format!("{} disconnected", self.peripheral_name()),
                    );
                    self.teardown(Some(error), true);
                }
            },
            TransportEvent::ServicesDiscovered { status, topology } => {
                if !matches!(self.current, Some(Operation::Discover)) {
                    warn!("unsolicited discovery callback, ignored");
                    return;
                }
                self.finish();
                self.complete_discovery(status, topology);
            }
            TransportEvent::DescriptorWritten { slot, status } => {
                if !matches!(self.current, Some(Operation::Subscribe(s)) if s == slot) {
                    warn!("unexpected descriptor write callback for {slot}, ignored");
                    return;
                }
                self.finish();
                let message = format!("enabling notifications on {slot} failed");
                match status.check_status(ErrorKind::TransportError, &message) {
                    Ok(()) => {
                        debug!("notifications enabled on {slot}");
                        self.next_subscription();
                    }
                    Err(error) => self.teardown(Some(error), true),
                }
            }
            TransportEvent::CharacteristicWritten { slot, status } => {
                let Some(Operation::Write { slot: pending, .. }) = &self.current else {
                    warn!("unexpected write callback for {slot}, ignored");
                    return;
                };
                if *pending != slot {
                    warn!("write callback for {slot} while writing {pending}, ignored");
                    return;
                }
                if let Some(Operation::Write { responder, .. }) = self.finish() {
                    let message = format!("write to {slot} failed");
                    responder.send(status.check_status(ErrorKind::TransportError, &message));
                }
                self.issue_queued_writes();
            }
            TransportEvent::CharacteristicChanged { slot, value } => {
                if self.state == ConnectionState::SubscriptionsActive {
                    self.shared
                        .events
                        .publish(SessionEvent::Notification(Notification { slot, value }));
                } else {
                    trace!("notification on {slot} before subscriptions are active, dropped");
                }
            }
        }
    }

    fn start_discovery(&mut self) {
        match self.client.discover_services() {
            Ok(()) => self.begin(Operation::Discover, self.config.operation_timeout),
            Err(fault) => {
                let error = Error::new(
                    ErrorKind::TransportError,
                    Some(fault),
                    "service discovery could not be started",
                );
                self.teardown(Some(error), true);
            }
        }
    }

    fn complete_discovery(&mut self, status: GattStatus, topology: ServiceTopology) {
        let checked = status
            .check_status(ErrorKind::TransportError, "service discovery failed")
            .and_then(|()| self.config.layout.validate(&topology));
        if let Err(error) = checked {
            warn!("{}: {error}", self.peripheral_name());
            self.teardown(Some(error), true);
            return;
        }
        debug!("{} services discovered", topology.services.len());
        self.topology = Some(topology);
        self.set_state(ConnectionState::ServicesDiscovered);
        self.pending_subscriptions = self.config.layout.notify_slots().into();
        self.next_subscription();
    }

    fn next_subscription(&mut self) {
        let Some(slot) = self.pending_subscriptions.pop_front() else {
            info!("notifications active on {}", self.peripheral_name());
            self.set_state(ConnectionState::SubscriptionsActive);
            if let Some(responder) = self.pending_connect.take() {
                responder.send(Ok(()));
            }
            self.issue_queued_writes();
            return;
        };
        let requested = self
            .client
            .set_characteristic_notification(slot, true)
            .and_then(|()| {
                self.client.write_descriptor(
                    slot,
                    CLIENT_CHARACTERISTIC_CONFIGURATION,
                    &ENABLE_NOTIFICATION_VALUE,
                )
            });
        match requested {
            Ok(()) => self.begin(Operation::Subscribe(slot), self.config.operation_timeout),
            Err(fault) => {
                let error = Error::new(
                    ErrorKind::TransportError,
                    Some(fault),
                    format!("subscribing to {slot} was rejected"),
                );
                self.teardown(Some(error), true);
            }
        }
    }

    fn enqueue_write(&mut self, write: QueuedWrite) {
        if !self.state.is_ready() {
            write.responder.send(Err(Error::new(
                ErrorKind::NotReady,
                None,
                format!("cannot write while {:?}", self.state),
            )));
            return;
        }
        let known = self
            .topology
            .as_ref()
            .is_some_and(|topology| topology.characteristic(write.slot).is_some());
        if !known {
            write.responder.send(Err(Error::new(
                ErrorKind::InvalidParameter,
                None,
                format!("{} was not discovered", write.slot),
            )));
            return;
        }
        if self.current.is_none() {
            self.issue_write(write);
        } else if self.queued_writes.len() < self.config.max_queued_writes {
            self.queued_writes.push_back(write);
        } else {
            write.responder.send(Err(Error::new(
                ErrorKind::Busy,
                None,
                format!("{} writes already queued", self.queued_writes.len()),
            )));
        }
    }

    fn issue_queued_writes(&mut self) {
        while self.current.is_none() {
            let Some(write) = self.queued_writes.pop_front() else {
                break;
            };
            self.issue_write(write);
        }
    }

    fn issue_write(&mut self, write: QueuedWrite) {
        let QueuedWrite {
            slot,
            payload,
            write_type,
            responder,
        } = write;
        trace!("writing {payload:02x?} to {slot}");
        match self.client.write_characteristic(slot, &payload, write_type) {
            Ok(()) => self.begin(
                Operation::Write { slot, responder },
                self.config.operation_timeout,
            ),
            Err(fault) => responder.send(Err(Error::new(
                ErrorKind::TransportError,
                Some(fault),
                format!("write to {slot} was rejected"),
            ))),
        }
    }

    fn handle_deadline(&mut self) {
        let Some(operation) = self.finish() else {
            return;
        };
        warn!("{} timed out", operation.describe());
        match operation {
            Operation::Write { slot, responder } => {
                responder.send(Err(Error::new(
                    ErrorKind::Timeout,
                    None,
                    format!("no response to the write to {slot}"),
                )));
                self.issue_queued_writes();
            }
            operation => {
                let error = Error::new(
                    ErrorKind::Timeout,
                    None,
                    format!("no callback for {}", operation.describe()),
                );
                let announce = self.state != ConnectionState::Connecting;
                self.teardown(Some(error), announce);
            }
        }
    }

    /// Closes the connection and fails everything still waiting on it.
    ///
    /// `failure` is published and becomes the result of a pending connect.
    /// With `announce`, `Disconnecting` is published before `Disconnected`.
    fn teardown(&mut self, failure: Option<Error>, announce: bool) {
        if let Some(error) = &failure {
            self.shared
                .events
                .publish(SessionEvent::Failure(error.clone()));
        }
        if announce {
            self.set_state(ConnectionState::Disconnecting);
        }

        if let Some(responder) = self.pending_connect.take() {
            let error = failure.unwrap_or_else(|| {
                Error::new(
                    ErrorKind::ConnectFailed,
                    None,
                    "connection attempt cancelled",
                )
            });
            responder.send(Err(error));
        }
        if let Some(Operation::Write { responder, .. }) = self.finish() {
            responder.send(Err(not_connected()));
        }
        for write in self.queued_writes.drain(..) {
            write.responder.send(Err(not_connected()));
        }
        self.pending_subscriptions.clear();
        self.topology = None;

        self.client.disconnect();
        self.client.close();
        self.generation += 1;
        self.claim = None;
        *self.shared.peripheral.lock_blocking() = None;
        self.set_state(ConnectionState::Disconnected);
    }

    fn begin(&mut self, operation: Operation, timeout: Duration) {
        self.current = Some(operation);
        // a timeout too large to represent means no deadline
        self.deadline = Instant::now().checked_add(timeout);
    }

    fn finish(&mut self) -> Option<Operation> {
        self.deadline = None;
        self.current.take()
    }

    fn set_state(&mut self, state: ConnectionState) {
        if self.state == state {
            return;
        }
        debug!("{:?} -> {:?}", self.state, state);
        self.state = state;
        *self.shared.state.lock_blocking() = state;
        self.shared.events.publish(SessionEvent::StateChanged(state));
    }

    fn peripheral_name(&self) -> String {
        self.shared
            .peripheral
            .lock_blocking()
            .as_ref()
            .map_or_else(|| "(no peripheral)".into(), |p| p.to_string())
    }
}

fn status_fault(status: GattStatus) -> Option<TransportFault> {
    (!status.is_success()).then_some(TransportFault::Status(status))
}

fn not_connected() -> Error {
    Error::new(
        ErrorKind::NotConnected,
        None,
        "the connection was closed",
    )
}
