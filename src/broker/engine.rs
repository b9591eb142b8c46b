//! Broker engine
//!
//! This module contains the in-process topic bus responsible for:
//! - managing topics and their subscriber queues
//! - fanning published events out to every queue registered on a topic
//! - tearing registrations down on unsubscribe, handle drop or shutdown
//!
//! Concurrency and usage notes:
//! - `Broker` is a cheap `Clone` handle; every clone shares one registry.
//! - The registry lock is held only for map updates and the non-blocking
//!   fan-out, never across an `.await`. A registration removed under the lock
//!   is therefore invisible to every publish that starts afterwards.
//! - Slow consumers never stall `publish`: each queue is bounded and drops its
//!   oldest event on overflow.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, info};

use crate::broker::subscription::{SubscriberQueue, Subscription};
use crate::broker::topic::{SubscriberId, Topic};
use crate::utils::error::BusError;

#[derive(Debug)]
pub struct BrokerInner<E> {
    topics: Mutex<HashMap<String, Topic<E>>>,
    next_id: AtomicU64,
    capacity: usize,
    closed: AtomicBool,
}

impl<E> BrokerInner<E> {
    fn topics(&self) -> MutexGuard<'_, HashMap<String, Topic<E>>> {
        self.topics.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn remove(&self, topic: &str, id: SubscriberId) -> bool {
        let mut topics = self.topics();
        let removed = topics
            .get_mut(topic)
            .map(|t| t.unsubscribe(id))
            .unwrap_or(false);
        if topics.get(topic).is_some_and(Topic::is_empty) {
            topics.remove(topic);
        }
        if removed {
            debug!(topic, subscriber = id, "unsubscribed");
        }
        removed
    }
}

/// In-process publish/subscribe bus keyed by topic name.
#[derive(Debug)]
pub struct Broker<E> {
    inner: Arc<BrokerInner<E>>,
}

impl<E> Clone for Broker<E> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<E: Clone> Default for Broker<E> {
    fn default() -> Self {
        Self::new(Self::DEFAULT_QUEUE_CAPACITY)
    }
}

impl<E: Clone> Broker<E> {
    /// Queue capacity used by [`Broker::default`].
    pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

    /// Create a bus whose subscribers each buffer up to `capacity` events.
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(BrokerInner {
                topics: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                capacity: capacity.max(1),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Register a new subscriber on `topic`. Automatically creates the topic if it doesn't exist.
    pub fn subscribe(&self, topic: &str) -> Result<Subscription<E>, BusError> {
        let mut topics = self.inner.topics();
        // checked under the lock so a concurrent close cannot miss this registration
        if self.is_closed() {
            return Err(BusError::Closed);
        }

        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let queue = Arc::new(SubscriberQueue::new(self.inner.capacity));
        topics
            .entry(topic.to_string())
            .or_insert_with(|| Topic::new(topic))
            .subscribe(id, queue.clone());
        drop(topics);

        debug!(topic, subscriber = id, "subscribed");
        Ok(Subscription::new(
            id,
            topic.to_string(),
            queue,
            Arc::downgrade(&self.inner),
        ))
    }

    /// Remove subscriber `id` from `topic`. Idempotent; returns whether it was registered.
    pub fn unsubscribe(&self, topic: &str, id: SubscriberId) -> bool {
        self.inner.remove(topic, id)
    }

    /// Offer `event` to every subscriber currently registered on `topic`.
    ///
    /// Returns the number of subscribers offered the event, `0` when the topic
    /// has none. Never waits on a subscriber.
    pub fn publish(&self, topic: &str, event: E) -> Result<usize, BusError> {
        let mut topics = self.inner.topics();
        if self.is_closed() {
            return Err(BusError::Closed);
        }

        let offered = match topics.get_mut(topic) {
            Some(t) => t.fan_out(&event),
            None => 0,
        };
        if topics.get(topic).is_some_and(Topic::is_empty) {
            topics.remove(topic);
        }
        drop(topics);

        debug!(topic, offered, "published");
        Ok(offered)
    }

    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.inner
            .topics()
            .get(topic)
            .map(Topic::subscriber_count)
            .unwrap_or(0)
    }

    /// Names of the topics that currently have subscribers.
    pub fn topics(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.topics().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Shut the bus down: every subscription stream ends after draining what
    /// it already holds, and later subscribes/publishes fail with `BusError::Closed`.
    pub fn close(&self) {
        let mut topics = self.inner.topics();
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let mut subscribers = 0;
        for (_, mut topic) in topics.drain() {
            subscribers += topic.subscriber_count();
            topic.close_all();
        }
        info!(subscribers, "topic bus closed");
    }
}
