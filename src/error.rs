//! Defines error types.

use std::fmt::Debug;

/// Failure reported by the host Bluetooth stack, kept as the source of an [`Error`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransportFault {
    /// A GATT callback carried a non-success status.
    Status(GattStatus),
    /// The stack refused to start the operation.
    CallReturnedFalse,
    /// The scanner callback reported a failure code.
    ScanFailed(i32),
    /// Any other stack-specific failure.
    Other(String),
}

impl std::error::Error for TransportFault {}

impl std::fmt::Display for TransportFault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Status(status) => write!(f, "GATT status: {status}"),
            Self::CallReturnedFalse => write!(f, "Bluetooth stack call unexpectedly returned false"),
            Self::ScanFailed(code) => write!(f, "scan failed with code {code}"),
            Self::Other(msg) => f.write_str(msg),
        }
    }
}

impl From<GattStatus> for TransportFault {
    fn from(status: GattStatus) -> Self {
        Self::Status(status)
    }
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        Error {
            kind,
            source: None,
            message: String::new(),
        }
    }
}

/// The error type for the BLE client core.
#[derive(Clone, Debug)]
pub struct Error {
    kind: ErrorKind,
    source: Option<TransportFault>,
    message: String,
}

impl Error {
    pub(crate) fn new<S: ToString>(
        kind: ErrorKind,
        source: Option<TransportFault>,
        message: S,
    ) -> Self {
        Error {
            kind,
            source,
            message: message.to_string(),
        }
    }

    /// Returns the corresponding [`ErrorKind`] for this error.
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns the message for this error.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns the transport failure behind this error, if any.
    pub fn fault(&self) -> Option<&TransportFault> {
        self.source.as_ref()
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (self.message.is_empty(), &self.source) {
            (true, None) => write!(f, "{}", &self.kind),
            (false, None) => write!(f, "{}: {}", &self.kind, &self.message),
            (true, Some(err)) => write!(f, "{}: {}", &self.kind, err),
            (false, Some(err)) => write!(f, "{}: {} ({})", &self.kind, &self.message, err),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.as_ref().map(|x| {
            let x: &(dyn std::error::Error + 'static) = x;
            x
        })
    }
}

/// A list of general categories of error.
///
/// Adapter and permission problems are kept apart from connection failures so
/// that a UI can tell the user what to fix.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ErrorKind {
    /// the Bluetooth adapter is absent or disabled
    AdapterUnavailable,
    /// scanning is unavailable
    ScanUnavailable,
    /// a scan session is already active
    AlreadyScanning,
    /// a required Bluetooth permission is missing
    PermissionDenied,
    /// connection failed
    ConnectFailed,
    /// the session is already connected or connecting
    AlreadyConnected,
    /// the peripheral isn't connected
    NotConnected,
    /// the peripheral does not expose the expected GATT layout
    TopologyMismatch,
    /// the session is not ready for this operation
    NotReady,
    /// too many GATT operations are queued
    Busy,
    /// invalid parameter
    InvalidParameter,
    /// the operation was rejected by the Bluetooth stack
    TransportError,
    /// timed out
    Timeout,
    /// an internal error has occured
    Internal,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::AdapterUnavailable => f.write_str("the Bluetooth adapter is not available"),
            ErrorKind::ScanUnavailable => f.write_str("scanning is unavailable"),
            ErrorKind::AlreadyScanning => f.write_str("a scan session is already active"),
            ErrorKind::PermissionDenied => f.write_str("permission denied"),
            ErrorKind::ConnectFailed => f.write_str("connection failed"),
            ErrorKind::AlreadyConnected => f.write_str("the session is already connected"),
            ErrorKind::NotConnected => f.write_str("the peripheral isn't connected"),
            ErrorKind::TopologyMismatch => f.write_str("unexpected GATT topology"),
            ErrorKind::NotReady => f.write_str("not ready"),
            ErrorKind::Busy => f.write_str("too many GATT operations are queued"),
            ErrorKind::InvalidParameter => f.write_str("invalid parameter"),
            ErrorKind::TransportError => f.write_str("rejected by the Bluetooth stack"),
            ErrorKind::Timeout => f.write_str("timed out"),
            ErrorKind::Internal => f.write_str("an internal error has occured"),
        }
    }
}

/// GATT status code as delivered by the host stack callbacks.
///
/// Values below `0x100` are Attribute Protocol error codes, see the Bluetooth
/// Core Specification, Vol 3, Part F, §3.4.1.1. See also
/// <https://developer.android.com/reference/android/bluetooth/BluetoothGatt>.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct GattStatus(u16);

impl GattStatus {
    /// The operation completed successfully.
    pub const SUCCESS: GattStatus = GattStatus(0x00);
    /// The attribute cannot be read.
    pub const READ_NOT_PERMITTED: GattStatus = GattStatus(0x02);
    /// The attribute cannot be written.
    pub const WRITE_NOT_PERMITTED: GattStatus = GattStatus(0x03);
    /// The attribute requires authentication before it can be read or written.
    pub const INSUFFICIENT_AUTHENTICATION: GattStatus = GattStatus(0x05);
    /// Attribute server does not support the request received from the client.
    pub const REQUEST_NOT_SUPPORTED: GattStatus = GattStatus(0x06);
    /// Offset specified was past the end of the attribute.
    pub const INVALID_OFFSET: GattStatus = GattStatus(0x07);
    /// The attribute requires authorization before it can be read or written.
    pub const INSUFFICIENT_AUTHORIZATION: GattStatus = GattStatus(0x08);
    /// The attribute value length is invalid for the operation.
    pub const INVALID_ATTRIBUTE_VALUE_LENGTH: GattStatus = GattStatus(0x0d);
    /// The attribute requires encryption before it can be read or written.
    pub const INSUFFICIENT_ENCRYPTION: GattStatus = GattStatus(0x0f);
    /// The generic error most often seen when a link drops (`GATT_ERROR`).
    pub const GATT_ERROR: GattStatus = GattStatus(0x85);
    /// A remote device connection is congested.
    pub const CONNECTION_CONGESTED: GattStatus = GattStatus(0x8f);
    /// A GATT operation failed (`GATT_FAILURE`).
    pub const FAILURE: GattStatus = GattStatus(0x101);

    /// Converts a raw status value to a [`GattStatus`].
    pub const fn from_u16(val: u16) -> Self {
        GattStatus(val)
    }

    /// Converts a [`GattStatus`] to its raw value.
    pub const fn as_u16(self) -> u16 {
        self.0
    }

    /// Checks if the status reports success.
    pub fn is_success(&self) -> bool {
        *self == Self::SUCCESS
    }

    /// Checks if the status code is in the application error range.
    pub fn is_application(&self) -> bool {
        (0x80..0xa0).contains(&self.0)
    }
}

impl std::fmt::Display for GattStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            GattStatus::SUCCESS => f.write_str("The operation completed successfully."),
            GattStatus::READ_NOT_PERMITTED => f.write_str("The attribute cannot be read."),
            GattStatus::WRITE_NOT_PERMITTED => f.write_str("The attribute cannot be written."),
            GattStatus::INSUFFICIENT_AUTHENTICATION => f.write_str("The attribute requires authentication before it can be read or written."),
            GattStatus::REQUEST_NOT_SUPPORTED => f.write_str("Attribute server does not support the request received from the client."),
            GattStatus::INVALID_OFFSET => f.write_str("Offset specified was past the end of the attribute."),
            GattStatus::INSUFFICIENT_AUTHORIZATION => f.write_str("The attribute requires authorization before it can be read or written."),
            GattStatus::INVALID_ATTRIBUTE_VALUE_LENGTH => f.write_str("The attribute value length is invalid for the operation."),
            GattStatus::INSUFFICIENT_ENCRYPTION => f.write_str("The attribute requires encryption before it can be read or written."),
            GattStatus::GATT_ERROR => f.write_str("GATT error."),
            GattStatus::CONNECTION_CONGESTED => f.write_str("A remote device connection is congested."),
            GattStatus::FAILURE => f.write_str("A GATT operation failed."),
            _ => f.write_str(&format!("Unknown status 0x{:02x}", self.0)),
        }
    }
}

impl From<u16> for GattStatus {
    fn from(number: u16) -> Self {
        GattStatus(number)
    }
}

impl From<GattStatus> for u16 {
    fn from(val: GattStatus) -> Self {
        val.0
    }
}
