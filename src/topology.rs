//! Discovered GATT topology and the positional layout the peripheral firmware exposes.

use uuid::Uuid;

use crate::error::ErrorKind;
use crate::types::GattSlot;
use crate::{Error, Result};

/// Characteristic property bits, as in the Bluetooth Core Specification, Vol 3, Part G, §3.3.1.1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CharacteristicProperties(u8);

impl CharacteristicProperties {
    pub const BROADCAST: Self = Self(0x01);
    pub const READ: Self = Self(0x02);
    pub const WRITE_WITHOUT_RESPONSE: Self = Self(0x04);
    pub const WRITE: Self = Self(0x08);
    pub const NOTIFY: Self = Self(0x10);
    pub const INDICATE: Self = Self(0x20);

    pub const fn from_bits(bits: u8) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn is_writable(self) -> bool {
        self.contains(Self::WRITE) || self.contains(Self::WRITE_WITHOUT_RESPONSE)
    }
}

impl std::ops::BitOr for CharacteristicProperties {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        self.union(rhs)
    }
}

/// A characteristic as returned by service discovery.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DiscoveredCharacteristic {
    pub uuid: Uuid,
    pub properties: CharacteristicProperties,
}

/// A service as returned by service discovery, characteristics in discovery order.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DiscoveredService {
    pub uuid: Uuid,
    pub characteristics: Vec<DiscoveredCharacteristic>,
}

/// Services in discovery order.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ServiceTopology {
    pub services: Vec<DiscoveredService>,
}

impl ServiceTopology {
    pub fn new(services: Vec<DiscoveredService>) -> Self {
        Self { services }
    }

    /// Looks up the characteristic at `slot`.
    pub fn characteristic(&self, slot: GattSlot) -> Option<&DiscoveredCharacteristic> {
        self.services
            .get(slot.service)?
            .characteristics
            .get(slot.characteristic)
    }
}

/// Where the firmware places each characteristic this client talks to.
///
/// The peripheral is addressed by position, not by UUID, so connecting to a
/// different peripheral would hit the wrong characteristics; [GattLayout::validate]
/// rejects such a topology right after discovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct GattLayout {
    /// Receives the one-byte LED command.
    pub led_write: GattSlot,
    /// Notifies the primary button counter.
    pub primary_notify: GattSlot,
    /// Notifies the secondary button counter.
    pub secondary_notify: GattSlot,
}

impl GattLayout {
    /// Layout of the known STM32 firmware.
    pub const DEFAULT: GattLayout = GattLayout {
        led_write: GattSlot::new(2, 0),
        primary_notify: GattSlot::new(2, 1),
        secondary_notify: GattSlot::new(1, 0),
    };

    /// Notify slots in subscription order.
    pub fn notify_slots(&self) -> [GattSlot; 2] {
        [self.primary_notify, self.secondary_notify]
    }

    pub fn validate(&self, topology: &ServiceTopology) -> Result<()> {
        let led = self.require(topology, self.led_write, "LED write")?;
        if !led.properties.is_writable() {
            return Err(mismatch(format!(
                "LED write characteristic at {} is not writable",
                self.led_write
            )));
        }
        for slot in self.notify_slots() {
            let chr = self.require(topology, slot, "button notify")?;
            if !chr.properties.contains(CharacteristicProperties::NOTIFY) {
                return Err(mismatch(format!(
                    "button characteristic at {slot} does not support notifications"
                )));
            }
        }
        Ok(())
    }

    fn require<'a>(
        &self,
        topology: &'a ServiceTopology,
        slot: GattSlot,
        role: &str,
    ) -> Result<&'a DiscoveredCharacteristic> {
        if topology.services.get(slot.service).is_none() {
            return Err(mismatch(format!(
                "{role}: service {} missing, {} services discovered",
                slot.service,
                topology.services.len()
            )));
        }
        topology
            .characteristic(slot)
            .ok_or_else(|| mismatch(format!("{role}: no characteristic at {slot}")))
    }
}

impl Default for GattLayout {
    fn default() -> Self {
        Self::DEFAULT
    }
}

fn mismatch(message: String) -> Error {
    Error::new(ErrorKind::TopologyMismatch, None, message)
}
