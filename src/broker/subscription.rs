//! Subscriber queues and subscription handles
//!
//! Every registration on the bus owns one [`SubscriberQueue`]: a bounded FIFO
//! guarded by a mutex plus a `Notify` used to wake the single consumer. The
//! publisher only ever pushes and never waits; when the queue is full the
//! oldest event is discarded to make room.
//!
//! [`Subscription`] is the consumer side handed back to callers. Dropping it
//! removes the registration from the bus.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use futures::Stream;
use tokio::sync::Notify;

use crate::broker::engine::BrokerInner;
use crate::broker::topic::SubscriberId;

/// Outcome of offering an event to one subscriber queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Offer {
    Queued,
    /// The queue was full; the oldest pending event was dropped.
    Overflowed,
    /// The consumer is gone; the registration should be removed.
    Closed,
}

#[derive(Debug)]
struct QueueState<E> {
    events: VecDeque<E>,
    closed: bool,
    dropped: u64,
}

#[derive(Debug)]
pub struct SubscriberQueue<E> {
    state: Mutex<QueueState<E>>,
    notify: Notify,
    capacity: usize,
}

impl<E> SubscriberQueue<E> {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            state: Mutex::new(QueueState {
                events: VecDeque::with_capacity(capacity.min(64)),
                closed: false,
                dropped: 0,
            }),
            notify: Notify::new(),
            capacity,
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState<E>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Push `event`, evicting the oldest pending event when full.
    pub fn offer(&self, event: E) -> Offer {
        let outcome = {
            let mut state = self.lock();
            if state.closed {
                return Offer::Closed;
            }
            let outcome = if state.events.len() >= self.capacity {
                state.events.pop_front();
                state.dropped += 1;
                Offer::Overflowed
            } else {
                Offer::Queued
            };
            state.events.push_back(event);
            outcome
        };
        self.notify.notify_one();
        outcome
    }

    /// Stop accepting events. Already queued events can still be received.
    pub fn close(&self) {
        self.lock().closed = true;
        self.notify.notify_one();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub fn len(&self) -> usize {
        self.lock().events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of events discarded because the consumer fell behind.
    pub fn dropped(&self) -> u64 {
        self.lock().dropped
    }

    /// Wait for the next event. Returns `None` once closed and drained.
    pub async fn recv(&self) -> Option<E> {
        loop {
            let notified = self.notify.notified();
            {
                let mut state = self.lock();
                if let Some(event) = state.events.pop_front() {
                    return Some(event);
                }
                if state.closed {
                    return None;
                }
            }
            notified.await;
        }
    }
}

/// A live registration on one topic of the bus.
///
/// Events published after the registration are received through [`recv`] or
/// the stream returned by [`into_stream`]. Nothing published earlier is ever
/// delivered.
///
/// [`recv`]: Subscription::recv
/// [`into_stream`]: Subscription::into_stream
#[derive(Debug)]
pub struct Subscription<E> {
    id: SubscriberId,
    topic: String,
    queue: Arc<SubscriberQueue<E>>,
    bus: Weak<BrokerInner<E>>,
}

impl<E> Subscription<E> {
    pub(crate) fn new(
        id: SubscriberId,
        topic: String,
        queue: Arc<SubscriberQueue<E>>,
        bus: Weak<BrokerInner<E>>,
    ) -> Self {
        Self {
            id,
            topic,
            queue,
            bus,
        }
    }

    pub fn id(&self) -> SubscriberId {
        self.id
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Events lost to the drop-oldest overflow policy so far.
    pub fn dropped(&self) -> u64 {
        self.queue.dropped()
    }

    pub async fn recv(&self) -> Option<E> {
        self.queue.recv().await
    }

    /// Remove the registration now. Equivalent to dropping the handle.
    pub fn unsubscribe(self) {}

    fn detach(&self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.remove(&self.topic, self.id);
        }
        self.queue.close();
    }
}

impl<E: Send + 'static> Subscription<E> {
    /// Lazy, unbounded sequence of the events published to this topic.
    ///
    /// The registration lives as long as the stream does.
    pub fn into_stream(self) -> impl Stream<Item = E> + Send + 'static {
        futures::stream::unfold(self, |subscription| async move {
            let event = subscription.recv().await?;
            Some((event, subscription))
        })
    }
}

impl<E> Drop for Subscription<E> {
    fn drop(&mut self) {
        self.detach();
    }
}
