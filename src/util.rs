use uuid::Uuid;

use crate::error::{ErrorKind, GattStatus, TransportFault};

/// Expands a 16-bit assigned number onto the Bluetooth Base UUID.
pub const fn uuid_from_u16(short: u16) -> Uuid {
    Uuid::from_u128(((short as u128) << 96) | 0x0000_0000_0000_1000_8000_0080_5f9b_34fb)
}

pub(crate) trait FaultExt<T> {
    fn or_kind(self, kind: ErrorKind, message: &str) -> Result<T, crate::Error>;
}

impl<T> FaultExt<T> for Result<T, TransportFault> {
    #[track_caller]
    fn or_kind(self, kind: ErrorKind, message: &str) -> Result<T, crate::Error> {
        self.map_err(|fault| crate::Error::new(kind, Some(fault), message))
    }
}

pub(crate) trait StatusExt {
    fn check_status(self, kind: ErrorKind, message: &str) -> Result<(), crate::Error>;
}

impl StatusExt for GattStatus {
    #[track_caller]
    fn check_status(self, kind: ErrorKind, message: &str) -> Result<(), crate::Error> {
        if self.is_success() {
            Ok(())
        } else {
            Err(crate::Error::new(kind, Some(self.into()), message))
        }
    }
}
