//! LED command encoding.
//!
//! The firmware reads one byte from the LED characteristic: the LED number
//! switches that LED on, `0x00` switches it off.

use crate::topology::GattLayout;
use crate::types::{GattSlot, LedIndex};

/// Payload byte switching an LED off.
pub const LED_OFF: u8 = 0x00;

/// A write ready to be issued to the peripheral.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LedCommand {
    pub slot: GattSlot,
    pub payload: [u8; 1],
}

/// Encodes LED commands for the characteristic given by a [GattLayout].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CommandCodec {
    layout: GattLayout,
}

impl CommandCodec {
    pub fn new(layout: GattLayout) -> Self {
        Self { layout }
    }

    pub fn encode_led_command(&self, led: LedIndex, on: bool) -> LedCommand {
        LedCommand {
            slot: self.layout.led_write,
            payload: [if on { led.get() } else { LED_OFF }],
        }
    }
}

/// [CommandCodec::encode_led_command] for the default firmware layout.
pub fn encode_led_command(led: LedIndex, on: bool) -> LedCommand {
    CommandCodec::default().encode_led_command(led, on)
}
