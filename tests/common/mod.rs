#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};

use futures_lite::future;
use futures_lite::StreamExt;
use gatt_led_client::error::{GattStatus, TransportFault};
use gatt_led_client::topology::{CharacteristicProperties, DiscoveredCharacteristic, DiscoveredService};
use gatt_led_client::transport::{BluetoothAdapter, GattCallback, GattClient, Permission, WriteType};
use gatt_led_client::util::uuid_from_u16;
use gatt_led_client::{
    ConnectionState, EventStream, GattSlot, PeripheralHandle, ServiceTopology, Uuid,
};

pub const LED: GattSlot = GattSlot::new(2, 0);
pub const PRIMARY: GattSlot = GattSlot::new(2, 1);
pub const SECONDARY: GattSlot = GattSlot::new(1, 0);

pub fn init_logger() {
    let _ = pretty_env_logger::try_init();
}

static NEXT_ADDRESS: AtomicU8 = AtomicU8::new(0);

thread_local! {
    // tests run in parallel and a peripheral address is claimed process-wide
    static ADDRESS: String =
        format!("C4:64:E3:8A:10:{:02X}", NEXT_ADDRESS.fetch_add(1, Ordering::SeqCst));
}

/// The peripheral of the current test; the same for every call on one thread.
pub fn peripheral() -> PeripheralHandle {
    PeripheralHandle::new("P-STM32WB", ADDRESS.with(|a| a.as_str().into()))
}

fn characteristic(short: u16, properties: CharacteristicProperties) -> DiscoveredCharacteristic {
    DiscoveredCharacteristic {
        uuid: uuid_from_u16(short),
        properties,
    }
}

/// What the reference firmware reports: generic access, the secondary button
/// service and the LED/primary button service, in that order.
pub fn firmware_topology() -> ServiceTopology {
    ServiceTopology::new(vec![
        DiscoveredService {
            uuid: uuid_from_u16(0x1800),
            characteristics: vec![characteristic(0x2a00, CharacteristicProperties::READ)],
        },
        DiscoveredService {
            uuid: Uuid::from_u128(0x0000fe80_8e22_4541_9d4c_21edae82ed19),
            characteristics: vec![characteristic(0xfe81, CharacteristicProperties::NOTIFY)],
        },
        DiscoveredService {
            uuid: Uuid::from_u128(0x0000fe40_cc7a_482a_984a_7f2ed5b3e58f),
            characteristics: vec![
                characteristic(
                    0xfe41,
                    CharacteristicProperties::READ | CharacteristicProperties::WRITE,
                ),
                characteristic(0xfe42, CharacteristicProperties::NOTIFY),
            ],
        },
    ])
}

pub struct FakeAdapter {
    pub available: AtomicBool,
    pub enabled: AtomicBool,
    pub connect_permission: AtomicBool,
}

impl FakeAdapter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            available: AtomicBool::new(true),
            enabled: AtomicBool::new(true),
            connect_permission: AtomicBool::new(true),
        })
    }
}

impl BluetoothAdapter for FakeAdapter {
    fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    fn has_permission(&self, permission: Permission) -> bool {
        match permission {
            Permission::Scan => true,
            Permission::Connect => self.connect_permission.load(Ordering::SeqCst),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Connect(String),
    DiscoverServices,
    Write(GattSlot, Vec<u8>, WriteType),
    SetNotification(GattSlot, bool),
    WriteDescriptor(GattSlot, Uuid, Vec<u8>),
    Disconnect,
    Close,
}

/// How [FakeGatt] answers requests. `None` leaves the callback to the test.
#[derive(Debug, Clone)]
pub struct Behavior {
    pub connect: Option<bool>,
    pub topology: Option<ServiceTopology>,
    pub descriptor_status: Option<GattStatus>,
    pub write_status: Option<GattStatus>,
    pub reject_connect: bool,
    pub reject_writes: bool,
}

impl Default for Behavior {
    fn default() -> Self {
        Self {
            connect: Some(true),
            topology: Some(firmware_topology()),
            descriptor_status: Some(GattStatus::SUCCESS),
            write_status: Some(GattStatus::SUCCESS),
            reject_connect: false,
            reject_writes: false,
        }
    }
}

/// Host stack double answering requests synchronously through the callback.
#[derive(Default)]
pub struct FakeGatt {
    pub behavior: Mutex<Behavior>,
    calls: Mutex<Vec<Call>>,
    callback: Mutex<Option<GattCallback>>,
}

impl FakeGatt {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with(behavior: Behavior) -> Arc<Self> {
        Arc::new(Self {
            behavior: Mutex::new(behavior),
            ..Self::default()
        })
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }

    pub fn writes(&self) -> Vec<(GattSlot, Vec<u8>)> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Write(slot, value, _) => Some((slot, value)),
                _ => None,
            })
            .collect()
    }

    /// The callback handed over by the latest connect.
    pub fn callback(&self) -> GattCallback {
        self.callback.lock().unwrap().clone().expect("never connected")
    }

    pub fn notify(&self, slot: GattSlot, value: &[u8]) {
        self.callback().on_characteristic_changed(slot, value.to_vec());
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }

    fn behavior(&self) -> Behavior {
        self.behavior.lock().unwrap().clone()
    }
}

impl GattClient for FakeGatt {
    fn connect(
        &self,
        address: &gatt_led_client::PeripheralAddress,
        callback: GattCallback,
    ) -> Result<(), TransportFault> {
        self.record(Call::Connect(address.to_string()));
        let behavior = self.behavior();
        if behavior.reject_connect {
            return Err(TransportFault::CallReturnedFalse);
        }
        *self.callback.lock().unwrap() = Some(callback.clone());
        match behavior.connect {
            Some(true) => callback.on_connection_state_change(GattStatus::SUCCESS, true),
            Some(false) => callback.on_connection_state_change(GattStatus::GATT_ERROR, false),
            None => {}
        }
        Ok(())
    }

    fn discover_services(&self) -> Result<(), TransportFault> {
        self.record(Call::DiscoverServices);
        if let Some(topology) = self.behavior().topology {
            self.callback()
                .on_services_discovered(GattStatus::SUCCESS, topology);
        }
        Ok(())
    }

    fn write_characteristic(
        &self,
        slot: GattSlot,
        value: &[u8],
        write_type: WriteType,
    ) -> Result<(), TransportFault> {
        self.record(Call::Write(slot, value.to_vec(), write_type));
        let behavior = self.behavior();
        if behavior.reject_writes {
            return Err(TransportFault::CallReturnedFalse);
        }
        if let Some(status) = behavior.write_status {
            self.callback().on_characteristic_write(slot, status);
        }
        Ok(())
    }

    fn set_characteristic_notification(
        &self,
        slot: GattSlot,
        enable: bool,
    ) -> Result<(), TransportFault> {
        self.record(Call::SetNotification(slot, enable));
        Ok(())
    }

    fn write_descriptor(
        &self,
        slot: GattSlot,
        descriptor: Uuid,
        value: &[u8],
    ) -> Result<(), TransportFault> {
        self.record(Call::WriteDescriptor(slot, descriptor, value.to_vec()));
        if let Some(status) = self.behavior().descriptor_status {
            self.callback().on_descriptor_write(slot, status);
        }
        Ok(())
    }

    fn disconnect(&self) {
        self.record(Call::Disconnect);
    }

    fn close(&self) {
        self.record(Call::Close);
    }
}

/// Events already published, without waiting for more.
pub async fn drain<T: Clone>(events: &mut EventStream<T>) -> Vec<T> {
    let mut drained = Vec::new();
    while let Some(Some(event)) = future::poll_once(events.next()).await {
        drained.push(event);
    }
    drained
}

/// Yields to the driver until `condition` holds.
pub async fn until(mut condition: impl FnMut() -> bool) {
    for _ in 0..1000 {
        if condition() {
            return;
        }
        future::yield_now().await;
    }
    panic!("condition never became true");
}

pub fn states(events: &[gatt_led_client::SessionEvent]) -> Vec<ConnectionState> {
    events
        .iter()
        .filter_map(|event| match event {
            gatt_led_client::SessionEvent::StateChanged(state) => Some(*state),
            _ => None,
        })
        .collect()
}
