use std::pin::Pin;
use std::task;
use std::time::Instant;

use async_broadcast::{InactiveReceiver, Receiver, Sender};
use futures_core::Stream;
use futures_timer::Delay;

/// Sending half of a one-shot reply, handed to the session driver along with a request.
pub struct Responder<T> {
    sender: async_channel::Sender<T>,
}

/// Waits for the reply sent through the matching [Responder].
pub struct ResponseWaiter<T> {
    receiver: async_channel::Receiver<T>,
}

pub fn response_channel<T>() -> (Responder<T>, ResponseWaiter<T>) {
    let (sender, receiver) = async_channel::bounded(1);
    (Responder { sender }, ResponseWaiter { receiver })
}

impl<T> Responder<T> {
    /// Delivers the reply; the caller may have stopped waiting, which is fine.
    pub fn send(self, value: T) {
        let _ = self.sender.try_send(value);
    }
}

impl<T> ResponseWaiter<T> {
    /// Returns `None` when the responder was dropped without replying.
    pub async fn wait(self) -> Option<T> {
        self.receiver.recv().await.ok()
    }
}

/// Broadcasts events to every live [EventStream].
///
/// Publishing never blocks: when a subscriber falls behind by more than the
/// capacity, its oldest events are dropped.
pub struct EventHub<T: Clone> {
    sender: Sender<T>,
    #[allow(unused)]
    sender_keeper: InactiveReceiver<T>,
}

impl<T: Clone> EventHub<T> {
    pub fn new(capacity: usize) -> Self {
        let (mut sender, receiver) = async_broadcast::broadcast(capacity.max(1));
        sender.set_overflow(true);
        Self {
            sender,
            sender_keeper: receiver.deactivate(),
        }
    }

    pub fn publish(&self, value: T) {
        // `Inactive` only means nobody is listening right now.
        let _ = self.sender.try_broadcast(value);
    }

    /// Subscribes to events published from now on.
    pub fn subscribe(&self) -> EventStream<T> {
        EventStream {
            receiver: Box::pin(self.sender.new_receiver()),
        }
    }

    /// Ends every subscribed stream.
    pub fn close(&self) {
        self.sender.close();
    }
}

/// Stream of events from an [EventHub]; ends when the hub is closed or dropped.
pub struct EventStream<T: Clone> {
    receiver: Pin<Box<Receiver<T>>>,
}

impl<T: Clone> Stream for EventStream<T> {
    type Item = T;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut task::Context<'_>) -> task::Poll<Option<T>> {
        self.receiver.as_mut().poll_next(cx)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.receiver.size_hint()
    }
}

/// Resolves at `deadline`, or never if there is none.
pub async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if !remaining.is_zero() {
                Delay::new(remaining).await;
            }
        }
        None => futures_lite::future::pending::<()>().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_lite::{future::block_on, StreamExt};
    use std::time::Duration;

    #[test]
    fn hub_drops_oldest_on_overflow() {
        let hub = EventHub::new(2);
        let stream = hub.subscribe();
        for i in 0..4 {
            hub.publish(i);
        }
        hub.close();
        let seen: Vec<i32> = block_on(stream.collect());
        assert_eq!(seen, vec![2, 3]);
    }

    #[test]
    fn publish_without_subscribers_is_silent() {
        let hub = EventHub::new(4);
        hub.publish("nobody");
        let mut late = hub.subscribe();
        hub.publish("late");
        assert_eq!(block_on(late.next()), Some("late"));
    }

    #[test]
    fn dropped_responder_yields_none() {
        let (responder, waiter) = response_channel::<u8>();
        drop(responder);
        assert_eq!(block_on(waiter.wait()), None);

        let (responder, waiter) = response_channel();
        responder.send(7u8);
        assert_eq!(block_on(waiter.wait()), Some(7));
    }

    #[test]
    fn deadline_in_the_past_resolves() {
        block_on(sleep_until(Some(Instant::now() - Duration::from_millis(5))));
    }
}
