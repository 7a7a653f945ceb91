//! Button counter notification decoding.
//!
//! Both notify characteristics carry two bytes, one counter per button. Which
//! byte belongs to which button differs between firmware builds, so the
//! convention is chosen with [CounterByteOrder] rather than guessed. A
//! notification only ever updates the button its characteristic reports.

use crate::topology::GattLayout;
use crate::types::{ButtonIndex, GattSlot};

/// Which payload byte carries which button counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum CounterByteOrder {
    /// Byte 0 is the primary counter, byte 1 the secondary one.
    #[default]
    PrimaryFirst,
    /// Byte 0 is the secondary counter, byte 1 the primary one.
    SecondaryFirst,
}

impl CounterByteOrder {
    fn byte_for(self, button: ButtonIndex) -> usize {
        match (self, button) {
            (CounterByteOrder::PrimaryFirst, ButtonIndex::Primary)
            | (CounterByteOrder::SecondaryFirst, ButtonIndex::Secondary) => 0,
            _ => 1,
        }
    }
}

/// A decoded button counter update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ButtonEvent {
    pub button: ButtonIndex,
    pub count: u8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    PayloadTooShort { len: usize },
    UnknownCharacteristic(GattSlot),
}

impl std::fmt::Display for DecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DecodeError::PayloadTooShort { len } => {
                write!(f, "button payload has {len} bytes, expected at least 2")
            }
            DecodeError::UnknownCharacteristic(slot) => {
                write!(f, "no button is reported on {slot}")
            }
        }
    }
}

impl std::error::Error for DecodeError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NotificationDecoder {
    layout: GattLayout,
    byte_order: CounterByteOrder,
}

impl NotificationDecoder {
    pub fn new(layout: GattLayout, byte_order: CounterByteOrder) -> Self {
        Self { layout, byte_order }
    }

    pub fn byte_order(&self) -> CounterByteOrder {
        self.byte_order
    }

    /// Decodes a counter update reported on one of the two notify slots.
    ///
    /// Any payload of at least two bytes on a notify slot decodes; other slots
    /// give [DecodeError::UnknownCharacteristic].
    pub fn decode_button_notification(
        &self,
        slot: GattSlot,
        payload: &[u8],
    ) -> Result<ButtonEvent, DecodeError> {
        if payload.len() < 2 {
            return Err(DecodeError::PayloadTooShort { len: payload.len() });
        }
        let button = if slot == self.layout.primary_notify {
            ButtonIndex::Primary
        } else if slot == self.layout.secondary_notify {
            ButtonIndex::Secondary
        } else {
            return Err(DecodeError::UnknownCharacteristic(slot));
        };
        Ok(ButtonEvent {
            button,
            count: payload[self.byte_order.byte_for(button)],
        })
    }
}
