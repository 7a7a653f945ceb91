use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_lock::Mutex;
use futures_lite::StreamExt;
use log::{debug, warn};

use crate::async_util::{EventHub, EventStream};
use crate::codec::CommandCodec;
use crate::config::ControllerConfig;
use crate::decoder::{ButtonEvent, NotificationDecoder};
use crate::driver::SessionDriver;
use crate::session::{GattSession, Notification, SessionEvent};
use crate::transport::{BluetoothAdapter, GattClient};
use crate::types::{
    ButtonCounterState, ButtonIndex, ConnectionState, LedIndex, LedState, PeripheralHandle,
};
use crate::{Error, Result};

/// What the UI needs to redraw, merged into one stream.
#[derive(Debug, Clone)]
pub enum ControllerEvent {
    ConnectionStateChanged(ConnectionState),
    LedStateChanged { led: LedIndex, on: bool },
    ButtonCounterChanged(ButtonEvent),
    /// Connection setup failed or the connection was lost.
    Failure(Error),
}

struct ControllerShared {
    // serializes LED writes; `leds` itself is only locked briefly
    led_writes: Mutex<()>,
    leds: Mutex<LedState>,
    counters: Mutex<ButtonCounterState>,
    primary_visible: AtomicBool,
    secondary_visible: AtomicBool,
    events: EventHub<ControllerEvent>,
    codec: CommandCodec,
    decoder: NotificationDecoder,
}

impl ControllerShared {
    fn visibility(&self, button: ButtonIndex) -> &AtomicBool {
        match button {
            ButtonIndex::Primary => &self.primary_visible,
            ButtonIndex::Secondary => &self.secondary_visible,
        }
    }

    fn handle_session_event(&self, event: SessionEvent) {
        match event {
            SessionEvent::StateChanged(state) => self
                .events
                .publish(ControllerEvent::ConnectionStateChanged(state)),
            SessionEvent::Failure(error) => self.events.publish(ControllerEvent::Failure(error)),
            SessionEvent::Notification(notification) => self.handle_notification(notification),
        }
    }

    fn handle_notification(&self, Notification { slot, value }: Notification) {
        let event = match self.decoder.decode_button_notification(slot, &value) {
            Ok(event) => event,
            Err(e) => {
                warn!("dropping notification on {slot}: {e}");
                return;
            }
        };
        self.counters.lock_blocking().set(event.button, event.count);
        if self.visibility(event.button).load(Ordering::SeqCst) {
            self.events
                .publish(ControllerEvent::ButtonCounterChanged(event));
        } else {
            debug!("{:?} counter is hidden, now {}", event.button, event.count);
        }
    }
}

/// Application-facing façade over one [GattSession].
///
/// This is the only writer of the LED and button counter state it exposes.
#[derive(Clone)]
pub struct ConnectionController {
    session: GattSession,
    shared: Arc<ControllerShared>,
}

impl ConnectionController {
    pub fn new(
        adapter: Arc<dyn BluetoothAdapter>,
        client: Arc<dyn GattClient>,
        config: ControllerConfig,
    ) -> (Self, ControllerDriver) {
        let layout = config.session.layout;
        let capacity = config.session.event_capacity;
        let (session, session_driver) = GattSession::new(adapter, client, config.session);
        let shared = Arc::new(ControllerShared {
            led_writes: Mutex::new(()),
            leds: Mutex::new(LedState::default()),
            counters: Mutex::new(ButtonCounterState::default()),
            primary_visible: AtomicBool::new(true),
            secondary_visible: AtomicBool::new(true),
            events: EventHub::new(capacity),
            codec: CommandCodec::new(layout),
            decoder: NotificationDecoder::new(layout, config.byte_order),
        });
        let driver = ControllerDriver {
            session: session_driver,
            session_events: session.events(),
            shared: shared.clone(),
        };
        (Self { session, shared }, driver)
    }

    pub fn session(&self) -> &GattSession {
        &self.session
    }

    /// See [GattSession::connect].
    pub async fn connect(&self, peripheral: &PeripheralHandle) -> Result<()> {
        self.session.connect(peripheral).await
    }

    pub async fn disconnect(&self) {
        self.session.disconnect().await
    }

    /// Flips `led` and returns its new state.
    ///
    /// The state only changes once the peripheral acknowledged the write.
    pub async fn toggle_led(&self, led: LedIndex) -> Result<bool> {
        let _guard = self.shared.led_writes.lock().await;
        let on = !self.shared.leds.lock_blocking().is_on(led);
        self.write_led(led, on).await?;
        Ok(on)
    }

    pub async fn set_led(&self, led: LedIndex, on: bool) -> Result<()> {
        let _guard = self.shared.led_writes.lock().await;
        self.write_led(led, on).await
    }

    async fn write_led(&self, led: LedIndex, on: bool) -> Result<()> {
        let command = self.shared.codec.encode_led_command(led, on);
        self.session.write(command.slot, &command.payload).await?;
        let changed = {
            let mut leds = self.shared.leds.lock_blocking();
            let changed = leds.is_on(led) != on;
            leds.set(led, on);
            changed
        };
        if changed {
            self.shared
                .events
                .publish(ControllerEvent::LedStateChanged { led, on });
        }
        Ok(())
    }

    /// Shows or hides the counter of `button` in the event stream.
    ///
    /// The peripheral keeps notifying and the counter keeps tracking; when
    /// shown again the current count is published once.
    pub fn set_notification_enabled(&self, button: ButtonIndex, enabled: bool) {
        let was_enabled = self.shared.visibility(button).swap(enabled, Ordering::SeqCst);
        if enabled && !was_enabled {
            let count = self.shared.counters.lock_blocking().count(button);
            self.shared
                .events
                .publish(ControllerEvent::ButtonCounterChanged(ButtonEvent { button, count }));
        }
    }

    pub fn is_notification_enabled(&self, button: ButtonIndex) -> bool {
        self.shared.visibility(button).load(Ordering::SeqCst)
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.session.state()
    }

    pub fn led_state(&self) -> LedState {
        *self.shared.leds.lock_blocking()
    }

    pub fn button_counters(&self) -> ButtonCounterState {
        *self.shared.counters.lock_blocking()
    }

    /// Subscribes to controller events published from now on.
    pub fn events(&self) -> EventStream<ControllerEvent> {
        self.shared.events.subscribe()
    }
}

/// Runs the session driver together with the task feeding session events
/// into the controller state.
pub struct ControllerDriver {
    session: SessionDriver,
    session_events: EventStream<SessionEvent>,
    shared: Arc<ControllerShared>,
}

impl ControllerDriver {
    pub async fn run(self) {
        let Self {
            session,
            mut session_events,
            shared,
        } = self;
        let pump = async move {
            while let Some(event) = session_events.next().await {
                shared.handle_session_event(event);
            }
            shared.events.close();
        };
        futures_lite::future::zip(session.run(), pump).await;
    }

    /// Runs the driver on a new thread.
    pub fn spawn(self) -> std::io::Result<std::thread::JoinHandle<()>> {
        std::thread::Builder::new()
            .name("gatt-controller".into())
            .spawn(move || futures_lite::future::block_on(self.run()))
    }
}
