//! Single-owner fan-out bus.
//!
//! One coordinator task owns the subscriber set; registration, removal and
//! publishing all happen by sending it messages, so the set needs no lock.
//! Delivery to a subscriber is a non-blocking send: a subscriber whose
//! buffer is full is evicted and must reconnect. Slow readers therefore
//! never wedge the ingest path; the only backpressure on publishers is the
//! bounded publish queue.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll};

use futures::Stream;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::oneshot;
use tracing::debug;

use crate::model::Event;

/// Publish queue depth; a full queue blocks publishers.
const PUBLISH_BUFFER: usize = 1024;

/// Per-subscriber buffer; overflowing it gets the subscriber evicted.
const SUBSCRIBER_BUFFER: usize = 16;

struct NewSubscriber {
    id: u64,
    tx: mpsc::Sender<Event>,
    ack: oneshot::Sender<()>,
}

/// Handle to the fan-out bus. Cheap to clone via `Arc`.
pub struct Broadcaster {
    register_tx: mpsc::Sender<NewSubscriber>,
    unregister_tx: mpsc::UnboundedSender<u64>,
    publish_tx: mpsc::Sender<Event>,
    next_id: AtomicU64,
}

impl Broadcaster {
    /// Spawn the coordinator task and return the handle.
    pub fn new() -> Self {
        // Registrations rendezvous with the coordinator; the publish queue
        // is the only buffered inbound path.
        let (register_tx, register_rx) = mpsc::channel(1);
        let (unregister_tx, unregister_rx) = mpsc::unbounded_channel();
        let (publish_tx, publish_rx) = mpsc::channel(PUBLISH_BUFFER);

        tokio::spawn(run_coordinator(register_rx, unregister_rx, publish_rx));

        Self {
            register_tx,
            unregister_tx,
            publish_tx,
            next_id: AtomicU64::new(0),
        }
    }

    /// Register a fresh subscriber channel.
    ///
    /// Blocks until the coordinator has picked the registration up, so a
    /// publish issued after this returns will reach the new subscriber.
    /// Events already queued before registration may or may not arrive.
    pub async fn subscribe(&self) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(SUBSCRIBER_BUFFER);
        let (ack_tx, ack_rx) = oneshot::channel();

        // Sends fail only when the coordinator is gone (process shutdown);
        // the subscription then simply yields no events.
        let _ = self
            .register_tx
            .send(NewSubscriber { id, tx, ack: ack_tx })
            .await;
        let _ = ack_rx.await;

        Subscription {
            id,
            rx,
            unregister_tx: self.unregister_tx.clone(),
        }
    }

    /// Hand an event to the coordinator for fan-out.
    ///
    /// Never blocks on any subscriber; waits only when the publish queue
    /// itself is full.
    pub async fn publish(&self, event: Event) {
        let _ = self.publish_tx.send(event).await;
    }
}

impl Default for Broadcaster {
    fn default() -> Self {
        Self::new()
    }
}

async fn run_coordinator(
    mut register_rx: mpsc::Receiver<NewSubscriber>,
    mut unregister_rx: mpsc::UnboundedReceiver<u64>,
    mut publish_rx: mpsc::Receiver<Event>,
) {
    let mut subscribers: HashMap<u64, mpsc::Sender<Event>> = HashMap::new();

    loop {
        tokio::select! {
            Some(subscriber) = register_rx.recv() => {
                subscribers.insert(subscriber.id, subscriber.tx);
                let _ = subscriber.ack.send(());
            }
            Some(id) = unregister_rx.recv() => {
                subscribers.remove(&id);
            }
            Some(event) = publish_rx.recv() => {
                let mut evicted = Vec::new();
                for (id, tx) in &subscribers {
                    match tx.try_send(event.clone()) {
                        Ok(()) => {}
                        Err(TrySendError::Full(_)) => {
                            debug!(subscriber = *id, "evicting slow subscriber");
                            evicted.push(*id);
                        }
                        Err(TrySendError::Closed(_)) => {
                            evicted.push(*id);
                        }
                    }
                }
                for id in evicted {
                    subscribers.remove(&id);
                }
            }
            else => break,
        }
    }
}

/// An ephemeral single-consumer event channel.
///
/// Identity is the channel itself; dropping the subscription unregisters
/// it from the coordinator.
pub struct Subscription {
    id: u64,
    rx: mpsc::Receiver<Event>,
    unregister_tx: mpsc::UnboundedSender<u64>,
}

impl Subscription {
    /// Next broadcast event; `None` once evicted or the bus shut down.
    pub async fn recv(&mut self) -> Option<Event> {
        self.rx.recv().await
    }
}

impl Stream for Subscription {
    type Item = Event;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Event>> {
        self.rx.poll_recv(cx)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let _ = self.unregister_tx.send(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::time::Duration;
    use tokio::time::timeout;

    fn make_event(id: &str) -> Event {
        Event {
            id: id.to_string(),
            timestamp: Utc::now(),
            level: "info".to_string(),
            service: "api".to_string(),
            name: "req".to_string(),
            trace_id: "t1".to_string(),
            data: None,
        }
    }

    async fn recv_soon(subscription: &mut Subscription) -> Option<Event> {
        timeout(Duration::from_secs(1), subscription.recv())
            .await
            .expect("timed out waiting for broadcast")
    }

    #[tokio::test]
    async fn test_subscriber_receives_published_events_in_order() {
        let broadcaster = Broadcaster::new();
        let mut subscription = broadcaster.subscribe().await;

        for i in 0..5 {
            broadcaster.publish(make_event(&format!("e{}", i))).await;
        }

        for i in 0..5 {
            let event = recv_soon(&mut subscription).await.unwrap();
            assert_eq!(event.id, format!("e{}", i));
        }
    }

    #[tokio::test]
    async fn test_multiple_subscribers_each_receive() {
        let broadcaster = Broadcaster::new();
        let mut first = broadcaster.subscribe().await;
        let mut second = broadcaster.subscribe().await;

        broadcaster.publish(make_event("e1")).await;

        assert_eq!(recv_soon(&mut first).await.unwrap().id, "e1");
        assert_eq!(recv_soon(&mut second).await.unwrap().id, "e1");
    }

    #[tokio::test]
    async fn test_slow_subscriber_is_evicted_without_losing_events_for_others() {
        let broadcaster = Broadcaster::new();
        let mut slow = broadcaster.subscribe().await;
        let mut fast = broadcaster.subscribe().await;

        // Exactly fill the slow subscriber's buffer.
        for i in 0..SUBSCRIBER_BUFFER {
            broadcaster.publish(make_event(&format!("e{}", i))).await;
        }

        // Draining the fast subscriber proves the coordinator has delivered
        // every publish so far; the slow one now sits on a full buffer.
        for i in 0..SUBSCRIBER_BUFFER {
            let event = recv_soon(&mut fast).await.unwrap();
            assert_eq!(event.id, format!("e{}", i));
        }

        // The overflowing publish evicts the slow subscriber but still
        // reaches the fast one.
        broadcaster.publish(make_event("overflow")).await;
        assert_eq!(recv_soon(&mut fast).await.unwrap().id, "overflow");

        // The slow one keeps its buffered events, then sees the channel
        // close.
        for i in 0..SUBSCRIBER_BUFFER {
            let event = recv_soon(&mut slow).await.unwrap();
            assert_eq!(event.id, format!("e{}", i));
        }
        assert!(recv_soon(&mut slow).await.is_none());
    }

    #[tokio::test]
    async fn test_dropped_subscription_unregisters() {
        let broadcaster = Broadcaster::new();
        let subscription = broadcaster.subscribe().await;
        drop(subscription);

        // Publishing after the drop must not wedge the coordinator; a
        // live subscriber still gets the event.
        let mut fresh = broadcaster.subscribe().await;
        broadcaster.publish(make_event("e1")).await;
        assert_eq!(recv_soon(&mut fresh).await.unwrap().id, "e1");
    }

    #[tokio::test]
    async fn test_late_subscriber_misses_earlier_events() {
        let broadcaster = Broadcaster::new();

        // The witness proves the coordinator has processed "early" before
        // the late subscriber registers.
        let mut witness = broadcaster.subscribe().await;
        broadcaster.publish(make_event("early")).await;
        assert_eq!(recv_soon(&mut witness).await.unwrap().id, "early");

        let mut late = broadcaster.subscribe().await;
        broadcaster.publish(make_event("late")).await;

        assert_eq!(recv_soon(&mut late).await.unwrap().id, "late");
    }
}
