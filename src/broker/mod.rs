//! The topic bus: an in-process publish/subscribe mechanism keyed by topic
//! name.
//!
//! Public types:
//! - `Broker`: registers subscribers, fans published events out to them.
//! - `Subscription`: the consumer handle, also usable as a `Stream`.
//! - `FeedEvent` / `EventBus`: the events this server publishes and the bus
//!   carrying them.

pub mod engine;
pub mod message;
pub mod subscription;
pub mod topic;

pub use engine::Broker;
pub use message::{EventBus, FeedEvent, MESSAGE_POSTED};
pub use subscription::Subscription;
