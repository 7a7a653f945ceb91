//! BLE client core for an LED/button control peripheral.
//!
//! The crate scans for peripherals ([Scanner]), drives one GATT connection
//! through connect, discovery and notification subscription ([GattSession]),
//! encodes LED commands ([codec]) and decodes button counter notifications
//! ([decoder]). [ConnectionController] combines them behind a small command
//! and event interface for a UI.
//!
//! The host Bluetooth stack is not part of this crate: it is plugged in by
//! implementing the traits of [transport]. Nothing here depends on an async
//! runtime; the session and controller drivers are plain futures that can be
//! polled by any executor or run on their own thread.

pub use codec::{encode_led_command, CommandCodec, LedCommand};
pub use config::{ControllerConfig, SessionConfig};
pub use controller::{ConnectionController, ControllerDriver, ControllerEvent};
pub use decoder::{ButtonEvent, CounterByteOrder, DecodeError, NotificationDecoder};
pub use driver::SessionDriver;
pub use error::{Error, ErrorKind};
pub use scanner::{ScanStream, Scanner};
pub use session::{
    GattSession, Notification, SessionEvent, CLIENT_CHARACTERISTIC_CONFIGURATION,
    ENABLE_NOTIFICATION_VALUE,
};
pub use topology::{GattLayout, ServiceTopology};
pub use types::*;

/// Convenience alias for a result with [`Error`].
pub type Result<T, E = Error> = core::result::Result<T, E>;

pub use async_util::EventStream;
pub use uuid::Uuid;

pub mod codec;
pub mod decoder;
pub mod error;
pub mod topology;
pub mod transport;
pub mod util;
mod types;

mod async_util;
mod config;
mod controller;
mod driver;
mod scanner;
mod session;
