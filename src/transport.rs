//! Contracts of the host Bluetooth stack consumed by this crate.
//!
//! The host implements [BluetoothAdapter], [LeScanner] and [GattClient] on top of
//! its platform API (e.g. `BluetoothAdapter`, `BluetoothLeScanner` and
//! `BluetoothGatt` on Android). Requests return as soon as the stack accepted or
//! refused them; completions come back through [ScanSink] and [GattCallback],
//! which may be called from any thread.

use log::trace;
use uuid::Uuid;

use crate::error::{GattStatus, TransportFault};
use crate::scanner::ScanShared;
use crate::topology::ServiceTopology;
use crate::types::{GattSlot, PeripheralAddress};

/// Runtime permissions the host may have to grant before Bluetooth use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Permission {
    /// Discover nearby peripherals (`BLUETOOTH_SCAN`, location on older hosts).
    Scan,
    /// Connect to a peripheral (`BLUETOOTH_CONNECT`).
    Connect,
}

pub trait BluetoothAdapter: Send + Sync {
    /// Whether the host has a Bluetooth adapter at all.
    fn is_available(&self) -> bool;

    /// Whether the adapter is switched on.
    fn is_enabled(&self) -> bool;

    fn has_permission(&self, _permission: Permission) -> bool {
        true
    }
}

pub trait LeScanner: Send + Sync {
    /// Starts delivering scan records to `sink` until [LeScanner::stop_scan].
    fn start_scan(&self, sink: ScanSink) -> Result<(), TransportFault>;

    fn stop_scan(&self);
}

/// How a characteristic write is acknowledged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WriteType {
    WithResponse,
    WithoutResponse,
}

/// Client side of one GATT connection.
///
/// Only one request is issued at a time; the next one follows the callback of
/// the previous.
pub trait GattClient: Send + Sync {
    /// Opens a connection; every completion for it goes to `callback`.
    fn connect(
        &self,
        address: &PeripheralAddress,
        callback: GattCallback,
    ) -> Result<(), TransportFault>;

    fn discover_services(&self) -> Result<(), TransportFault>;

    fn write_characteristic(
        &self,
        slot: GattSlot,
        value: &[u8],
        write_type: WriteType,
    ) -> Result<(), TransportFault>;

    /// Enables local delivery of notifications; this does not contact the peripheral.
    fn set_characteristic_notification(
        &self,
        slot: GattSlot,
        enable: bool,
    ) -> Result<(), TransportFault>;

    fn write_descriptor(
        &self,
        slot: GattSlot,
        descriptor: Uuid,
        value: &[u8],
    ) -> Result<(), TransportFault>;

    fn disconnect(&self);

    /// Releases the connection; no callback is delivered afterwards.
    fn close(&self);
}

/// A scan result as reported by the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanRecord {
    pub address: PeripheralAddress,
    pub name: Option<String>,
    pub rssi: Option<i16>,
}

/// Receives scan results for one scan session.
#[derive(Clone)]
pub struct ScanSink {
    pub(crate) shared: std::sync::Arc<ScanShared>,
}

impl ScanSink {
    pub fn on_scan_result(&self, record: ScanRecord) {
        trace!("on_scan_result {} {:?}", record.address, record.name);
        self.shared.accept(record);
    }

    pub fn on_scan_failed(&self, error_code: i32) {
        trace!("on_scan_failed {error_code}");
        self.shared.fail(error_code);
    }
}

/// Completion reported by the host for a GATT connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum TransportEvent {
    ConnectionStateChanged {
        status: GattStatus,
        connected: bool,
    },
    ServicesDiscovered {
        status: GattStatus,
        topology: ServiceTopology,
    },
    CharacteristicWritten {
        slot: GattSlot,
        status: GattStatus,
    },
    DescriptorWritten {
        slot: GattSlot,
        status: GattStatus,
    },
    CharacteristicChanged {
        slot: GattSlot,
        value: Vec<u8>,
    },
}

/// Delivers the callbacks of one connection attempt to its session.
///
/// Events are queued in arrival order. A callback handed out for an earlier
/// connection keeps working but its events are discarded.
#[derive(Clone)]
pub struct GattCallback {
    pub(crate) generation: u64,
    pub(crate) sender: async_channel::Sender<(u64, TransportEvent)>,
}

impl GattCallback {
    fn send(&self, event: TransportEvent) {
        // the driver is gone when this fails, nothing is left to notify.
        let _ = self.sender.try_send((self.generation, event));
    }

    pub fn on_connection_state_change(&self, status: GattStatus, connected: bool) {
        trace!("on_connection_state_change {status:?} connected={connected}");
        self.send(TransportEvent::ConnectionStateChanged { status, connected });
    }

    pub fn on_services_discovered(&self, status: GattStatus, topology: ServiceTopology) {
        trace!(
            "on_services_discovered {status:?} ({} services)",
            topology.services.len()
        );
        self.send(TransportEvent::ServicesDiscovered { status, topology });
    }

    pub fn on_characteristic_write(&self, slot: GattSlot, status: GattStatus) {
        trace!("on_characteristic_write {slot} {status:?}");
        self.send(TransportEvent::CharacteristicWritten { slot, status });
    }

    pub fn on_descriptor_write(&self, slot: GattSlot, status: GattStatus) {
        trace!("on_descriptor_write {slot} {status:?}");
        self.send(TransportEvent::DescriptorWritten { slot, status });
    }

    pub fn on_characteristic_changed(&self, slot: GattSlot, value: Vec<u8>) {
        trace!("on_characteristic_changed {slot} {value:02x?}");
        self.send(TransportEvent::CharacteristicChanged { slot, value });
    }
}

impl std::fmt::Debug for GattCallback {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GattCallback")
            .field("generation", &self.generation)
            .finish()
    }
}
