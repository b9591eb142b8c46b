//! Events published on the bus by this server.
//!
//! Resolvers publish a `FeedEvent` after the corresponding store write has
//! committed; subscription resolvers map them back to schema output types.

use crate::broker::Broker;
use crate::persistence::ChatMessage;

/// Topic carrying [`FeedEvent::MessagePosted`].
pub const MESSAGE_POSTED: &str = "MESSAGE_POSTED";

#[derive(Debug, Clone, PartialEq)]
pub enum FeedEvent {
    MessagePosted(ChatMessage),
}

impl FeedEvent {
    /// The topic this event is published on.
    pub fn topic(&self) -> &'static str {
        match self {
            FeedEvent::MessagePosted(_) => MESSAGE_POSTED,
        }
    }
}

pub type EventBus = Broker<FeedEvent>;
