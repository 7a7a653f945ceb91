use uuid::Uuid;

use crate::error::ErrorKind;

/// Namespace for the UUIDv5 identifiers derived from transport addresses.
const PERIPHERAL_ID_NAMESPACE: Uuid = Uuid::from_u128(0x6c0b_76d2_9a1e_4f43_8d5c_2f6e_1b7a_44c1);

/// Transport address of a peripheral, e.g. `"C4:64:E3:8A:10:2B"`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PeripheralAddress(String);

impl PeripheralAddress {
    /// Wraps the address as reported by the host stack.
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into())
    }

    /// Returns the address string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for PeripheralAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeripheralAddress {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Opaque, stable identifier of a peripheral.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PeripheralId(Uuid);

impl PeripheralId {
    /// The identifier for `address`; equal addresses always give equal identifiers.
    pub fn for_address(address: &PeripheralAddress) -> Self {
        Self(Uuid::new_v5(&PERIPHERAL_ID_NAMESPACE, address.as_str().as_bytes()))
    }

    /// The underlying [Uuid].
    pub fn uuid(&self) -> Uuid {
        self.0
    }
}

impl std::fmt::Display for PeripheralId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// A discovered peripheral the user can pick.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PeripheralHandle {
    id: PeripheralId,
    name: String,
    address: PeripheralAddress,
    rssi: Option<i16>,
}

impl PartialEq for PeripheralHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for PeripheralHandle {}

impl std::hash::Hash for PeripheralHandle {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl std::fmt::Display for PeripheralHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.name, self.address)
    }
}

impl PeripheralHandle {
    /// Builds a handle for a peripheral whose address is already known.
    pub fn new(name: impl Into<String>, address: PeripheralAddress) -> Self {
        Self {
            id: PeripheralId::for_address(&address),
            name: name.into(),
            address,
            rssi: None,
        }
    }

    pub(crate) fn with_rssi(mut self, rssi: Option<i16>) -> Self {
        self.rssi = rssi;
        self
    }

    /// Returns this peripheral’s unique identifier.
    pub fn id(&self) -> PeripheralId {
        self.id
    }

    /// The advertised local name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The transport address.
    pub fn address(&self) -> &PeripheralAddress {
        &self.address
    }

    /// Signal strength in dBm of the scan record that created this handle.
    pub fn rssi(&self) -> Option<i16> {
        self.rssi
    }
}

/// Positional address of a characteristic: the index of its service in the
/// discovered topology and its index within that service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct GattSlot {
    pub service: usize,
    pub characteristic: usize,
}

impl GattSlot {
    pub const fn new(service: usize, characteristic: usize) -> Self {
        Self {
            service,
            characteristic,
        }
    }
}

impl std::fmt::Display for GattSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "service {} / characteristic {}",
            self.service, self.characteristic
        )
    }
}

/// One of the three controllable LEDs, numbered from 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(try_from = "u8", into = "u8"))]
pub struct LedIndex(u8);

impl LedIndex {
    pub const COUNT: usize = 3;
    pub const ALL: [LedIndex; Self::COUNT] = [LedIndex(1), LedIndex(2), LedIndex(3)];

    /// Validates `index` against `1..=3`.
    pub fn new(index: u8) -> crate::Result<Self> {
        if (1..=Self::COUNT as u8).contains(&index) {
            Ok(Self(index))
        } else {
            Err(crate::Error::new(
                ErrorKind::InvalidParameter,
                None,
                format!("LED index {index} is outside 1..={}", Self::COUNT),
            ))
        }
    }

    pub fn get(self) -> u8 {
        self.0
    }

    fn position(self) -> usize {
        usize::from(self.0 - 1)
    }
}

impl TryFrom<u8> for LedIndex {
    type Error = crate::Error;

    fn try_from(index: u8) -> crate::Result<Self> {
        Self::new(index)
    }
}

impl From<LedIndex> for u8 {
    fn from(led: LedIndex) -> u8 {
        led.0
    }
}

impl std::fmt::Display for LedIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "LED {}", self.0)
    }
}

/// The two buttons whose press counters the peripheral reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ButtonIndex {
    /// Reported on the control service.
    Primary,
    /// Reported on the secondary service.
    Secondary,
}

impl ButtonIndex {
    pub const ALL: [ButtonIndex; 2] = [ButtonIndex::Primary, ButtonIndex::Secondary];

    fn position(self) -> usize {
        match self {
            ButtonIndex::Primary => 0,
            ButtonIndex::Secondary => 1,
        }
    }
}

/// Connection lifecycle of a GATT session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    ServicesDiscovered,
    SubscriptionsActive,
    Disconnecting,
}

impl ConnectionState {
    /// Whether characteristic writes may be issued.
    pub fn is_ready(&self) -> bool {
        matches!(
            self,
            ConnectionState::ServicesDiscovered | ConnectionState::SubscriptionsActive
        )
    }
}

/// On/off state of every LED.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LedState([bool; LedIndex::COUNT]);

impl LedState {
    pub fn is_on(&self, led: LedIndex) -> bool {
        self.0[led.position()]
    }

    pub(crate) fn set(&mut self, led: LedIndex, on: bool) {
        self.0[led.position()] = on;
    }

    pub fn iter(&self) -> impl Iterator<Item = (LedIndex, bool)> + '_ {
        LedIndex::ALL.into_iter().map(|led| (led, self.is_on(led)))
    }
}

/// Last reported press count of every button.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ButtonCounterState([u8; 2]);

impl ButtonCounterState {
    pub fn count(&self, button: ButtonIndex) -> u8 {
        self.0[button.position()]
    }

    pub(crate) fn set(&mut self, button: ButtonIndex, count: u8) {
        self.0[button.position()] = count;
    }
}
