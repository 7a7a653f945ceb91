use std::time::Duration;

use crate::decoder::CounterByteOrder;
use crate::topology::GattLayout;

/// Settings of a [crate::GattSession].
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SessionConfig {
    /// How long to wait for the connected callback.
    pub connect_timeout: Duration,
    /// How long to wait for any other GATT callback.
    pub operation_timeout: Duration,
    /// Capacity of the event broadcast; the oldest events are dropped on overflow.
    pub event_capacity: usize,
    /// Writes that may wait behind the outstanding GATT operation.
    pub max_queued_writes: usize,
    pub layout: GattLayout,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            operation_timeout: Duration::from_secs(5),
            event_capacity: 64,
            max_queued_writes: 16,
            layout: GattLayout::DEFAULT,
        }
    }
}

impl SessionConfig {
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = timeout;
        self
    }

    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity.max(1);
        self
    }

    pub fn max_queued_writes(mut self, max: usize) -> Self {
        self.max_queued_writes = max;
        self
    }

    pub fn layout(mut self, layout: GattLayout) -> Self {
        self.layout = layout;
        self
    }
}

/// Settings of a [crate::ConnectionController].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ControllerConfig {
    pub session: SessionConfig,
    /// Which notification byte carries which button counter.
    pub byte_order: CounterByteOrder,
}

impl ControllerConfig {
    pub fn session(mut self, session: SessionConfig) -> Self {
        self.session = session;
        self
    }

    pub fn byte_order(mut self, byte_order: CounterByteOrder) -> Self {
        self.byte_order = byte_order;
        self
    }
}
