mod common;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use common::*;
use futures_lite::future::{block_on, FutureExt};
use futures_lite::StreamExt;
use gatt_led_client::error::GattStatus;
use gatt_led_client::{
    ButtonEvent, ButtonIndex, ConnectionController, ConnectionState, ControllerConfig,
    ControllerEvent, CounterByteOrder, ErrorKind, EventStream, LedIndex,
};

fn controller_with(
    gatt: Arc<FakeGatt>,
    config: ControllerConfig,
    test: impl FnOnce(ConnectionController) -> Pin<Box<dyn Future<Output = ()>>>,
) {
    init_logger();
    let (controller, driver) = ConnectionController::new(FakeAdapter::new(), gatt, config);
    block_on(driver.run().or(test(controller)));
}

fn led(n: u8) -> LedIndex {
    LedIndex::new(n).unwrap()
}

async fn next_counter(events: &mut EventStream<ControllerEvent>) -> ButtonEvent {
    while let Some(event) = events.next().await {
        if let ControllerEvent::ButtonCounterChanged(event) = event {
            return event;
        }
    }
    panic!("controller events closed");
}

#[test]
fn toggling_led_2_writes_its_number() {
    let gatt = FakeGatt::new();
    let fake = gatt.clone();
    controller_with(gatt, ControllerConfig::default(), |controller| {
        Box::pin(async move {
            controller.connect(&peripheral()).await.unwrap();
            let mut events = controller.events();

            assert!(controller.toggle_led(led(2)).await.unwrap());
            assert_eq!(fake.writes(), [(LED, vec![0x02])]);
            assert!(controller.led_state().is_on(led(2)));
            assert!(!controller.led_state().is_on(led(1)));
            assert!(matches!(
                drain(&mut events).await.as_slice(),
                [ControllerEvent::LedStateChanged { led: l, on: true }] if *l == led(2)
            ));

            assert!(!controller.toggle_led(led(2)).await.unwrap());
            assert_eq!(fake.writes()[1], (LED, vec![0x00]));
            assert!(!controller.led_state().is_on(led(2)));
        })
    });
}

#[test]
fn set_led_reports_only_changes() {
    let gatt = FakeGatt::new();
    let fake = gatt.clone();
    controller_with(gatt, ControllerConfig::default(), |controller| {
        Box::pin(async move {
            controller.connect(&peripheral()).await.unwrap();
            let mut events = controller.events();
            controller.set_led(led(3), true).await.unwrap();
            controller.set_led(led(3), true).await.unwrap();
            assert_eq!(fake.writes(), [(LED, vec![0x03]), (LED, vec![0x03])]);
            assert_eq!(drain(&mut events).await.len(), 1);
        })
    });
}

#[test]
fn led_commands_need_a_ready_session() {
    let gatt = FakeGatt::new();
    let fake = gatt.clone();
    controller_with(gatt, ControllerConfig::default(), |controller| {
        Box::pin(async move {
            let err = controller.toggle_led(led(1)).await.unwrap_err();
            assert_eq!(err.kind(), ErrorKind::NotReady);
            assert_eq!(controller.connection_state(), ConnectionState::Disconnected);
            assert!(!controller.led_state().is_on(led(1)));
            assert!(fake.calls().is_empty());
        })
    });
}

#[test]
fn failed_write_leaves_the_led_unchanged() {
    let gatt = FakeGatt::with(Behavior {
        write_status: Some(GattStatus::WRITE_NOT_PERMITTED),
        ..Behavior::default()
    });
    controller_with(gatt, ControllerConfig::default(), |controller| {
        Box::pin(async move {
            controller.connect(&peripheral()).await.unwrap();
            let err = controller.toggle_led(led(1)).await.unwrap_err();
            assert_eq!(err.kind(), ErrorKind::TransportError);
            assert!(!controller.led_state().is_on(led(1)));
            assert_eq!(
                controller.connection_state(),
                ConnectionState::SubscriptionsActive
            );
        })
    });
}

#[test]
fn primary_notification_updates_only_the_primary_counter() {
    let gatt = FakeGatt::new();
    let fake = gatt.clone();
    controller_with(gatt, ControllerConfig::default(), |controller| {
        Box::pin(async move {
            controller.connect(&peripheral()).await.unwrap();
            let mut events = controller.events();
            fake.notify(PRIMARY, &[5, 7]);

            assert_eq!(
                next_counter(&mut events).await,
                ButtonEvent {
                    button: ButtonIndex::Primary,
                    count: 5
                }
            );
            let counters = controller.button_counters();
            assert_eq!(counters.count(ButtonIndex::Primary), 5);
            assert_eq!(counters.count(ButtonIndex::Secondary), 0);
        })
    });
}

#[test]
fn secondary_first_byte_order() {
    let gatt = FakeGatt::new();
    let fake = gatt.clone();
    let config = ControllerConfig::default().byte_order(CounterByteOrder::SecondaryFirst);
    controller_with(gatt, config, |controller| {
        Box::pin(async move {
            controller.connect(&peripheral()).await.unwrap();
            let mut events = controller.events();
            fake.notify(PRIMARY, &[5, 7]);
            fake.notify(SECONDARY, &[5, 7]);

            assert_eq!(next_counter(&mut events).await.count, 7);
            assert_eq!(
                next_counter(&mut events).await,
                ButtonEvent {
                    button: ButtonIndex::Secondary,
                    count: 5
                }
            );
        })
    });
}

#[test]
fn malformed_notification_is_dropped() {
    let gatt = FakeGatt::new();
    let fake = gatt.clone();
    controller_with(gatt, ControllerConfig::default(), |controller| {
        Box::pin(async move {
            controller.connect(&peripheral()).await.unwrap();
            let mut events = controller.events();
            fake.notify(PRIMARY, &[0x01]);
            fake.notify(SECONDARY, &[3, 4]);

            assert_eq!(
                next_counter(&mut events).await,
                ButtonEvent {
                    button: ButtonIndex::Secondary,
                    count: 4
                }
            );
            assert_eq!(controller.button_counters().count(ButtonIndex::Primary), 0);
            assert_eq!(
                controller.connection_state(),
                ConnectionState::SubscriptionsActive
            );
        })
    });
}

#[test]
fn hidden_counter_keeps_counting() {
    let gatt = FakeGatt::new();
    let fake = gatt.clone();
    controller_with(gatt, ControllerConfig::default(), |controller| {
        Box::pin(async move {
            controller.connect(&peripheral()).await.unwrap();
            let mut events = controller.events();
            controller.set_notification_enabled(ButtonIndex::Primary, false);
            assert!(!controller.is_notification_enabled(ButtonIndex::Primary));

            fake.notify(PRIMARY, &[9, 0]);
            fake.notify(SECONDARY, &[0, 2]);
            assert_eq!(next_counter(&mut events).await.button, ButtonIndex::Secondary);
            assert_eq!(controller.button_counters().count(ButtonIndex::Primary), 9);

            controller.set_notification_enabled(ButtonIndex::Primary, true);
            assert_eq!(
                next_counter(&mut events).await,
                ButtonEvent {
                    button: ButtonIndex::Primary,
                    count: 9
                }
            );
            // enabling an already shown counter publishes nothing
            controller.set_notification_enabled(ButtonIndex::Primary, true);
            assert!(drain(&mut events).await.is_empty());
        })
    });
}

#[test]
fn connection_changes_reach_the_controller_stream() {
    let mut topology = firmware_topology();
    topology.services.truncate(2);
    let gatt = FakeGatt::with(Behavior {
        topology: Some(topology),
        ..Behavior::default()
    });
    controller_with(gatt, ControllerConfig::default(), |controller| {
        Box::pin(async move {
            let mut events = controller.events();
            let err = controller.connect(&peripheral()).await.unwrap_err();
            assert_eq!(err.kind(), ErrorKind::TopologyMismatch);

            let mut states = Vec::new();
            let mut failure = None;
            while let Some(event) = events.next().await {
                match event {
                    ControllerEvent::ConnectionStateChanged(state) => {
                        states.push(state);
                        if state == ConnectionState::Disconnected {
                            break;
                        }
                    }
                    ControllerEvent::Failure(e) => failure = Some(e.kind()),
                    other => panic!("unexpected {other:?}"),
                }
            }
            assert_eq!(failure, Some(ErrorKind::TopologyMismatch));
            assert_eq!(
                states,
                [
                    ConnectionState::Connecting,
                    ConnectionState::Connected,
                    ConnectionState::Disconnecting,
                    ConnectionState::Disconnected
                ]
            );
        })
    });
}

#[test]
fn state_survives_a_reconnect() {
    let gatt = FakeGatt::new();
    let fake = gatt.clone();
    controller_with(gatt, ControllerConfig::default(), |controller| {
        Box::pin(async move {
            controller.connect(&peripheral()).await.unwrap();
            controller.toggle_led(led(1)).await.unwrap();
            let mut events = controller.events();
            fake.notify(SECONDARY, &[0, 6]);
            next_counter(&mut events).await;

            controller.disconnect().await;
            controller.connect(&peripheral()).await.unwrap();
            assert!(controller.led_state().is_on(led(1)));
            assert_eq!(controller.button_counters().count(ButtonIndex::Secondary), 6);
        })
    });
}
