//! Topic management
//!
//! A `Topic` holds the delivery queues registered for a particular topic name.
//! Fan-out walks every queue, offering the event without waiting, and prunes
//! queues whose consumer has gone away.
//!
//! Concurrency note: callers must synchronize access to `Topic` (the bus keeps
//! every topic behind one registry lock).

use std::collections::HashMap;
use std::sync::Arc;

use tracing::warn;

use crate::broker::subscription::{Offer, SubscriberQueue};

pub type SubscriberId = u64;

#[derive(Debug)]
pub struct Topic<E> {
    pub name: String,
    subscribers: HashMap<SubscriberId, Arc<SubscriberQueue<E>>>,
}

impl<E> Topic<E> {
    /// Create a new topic with the given name.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            subscribers: HashMap::new(),
        }
    }

    /// Register a delivery queue under `id`.
    pub fn subscribe(&mut self, id: SubscriberId, queue: Arc<SubscriberQueue<E>>) {
        self.subscribers.insert(id, queue);
    }

    /// Remove a subscriber from the topic. Returns whether it was registered.
    pub fn unsubscribe(&mut self, id: SubscriberId) -> bool {
        match self.subscribers.remove(&id) {
            Some(queue) => {
                queue.close();
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, id: SubscriberId) -> bool {
        self.subscribers.contains_key(&id)
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }

    /// Close every queue, ending their streams once drained.
    pub fn close_all(&mut self) {
        for (_, queue) in self.subscribers.drain() {
            queue.close();
        }
    }
}

impl<E: Clone> Topic<E> {
    /// Offer `event` to every registered queue. Returns how many accepted it.
    pub fn fan_out(&mut self, event: &E) -> usize {
        let mut offered = 0;
        let mut gone = Vec::new();

        for (id, queue) in &self.subscribers {
            match queue.offer(event.clone()) {
                Offer::Queued => offered += 1,
                Offer::Overflowed => {
                    offered += 1;
                    warn!(
                        topic = %self.name,
                        subscriber = id,
                        dropped = queue.dropped(),
                        "subscriber queue full, dropped oldest event"
                    );
                }
                Offer::Closed => gone.push(*id),
            }
        }

        for id in gone {
            self.subscribers.remove(&id);
            warn!(topic = %self.name, subscriber = id, "removed closed subscriber");
        }

        offered
    }
}
