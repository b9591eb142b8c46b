use async_graphql::{Context, Result, Subscription};
use futures::StreamExt;
use futures::stream::BoxStream;

use crate::broker::{FeedEvent, MESSAGE_POSTED};
use crate::persistence::ChatMessage;
use crate::schema::ExecutionContext;

pub struct SubscriptionRoot;

#[Subscription]
impl SubscriptionRoot {
    /// Messages posted after the subscription starts. No history is replayed.
    async fn message_posted(&self, ctx: &Context<'_>) -> Result<BoxStream<'static, ChatMessage>> {
        let exec = ExecutionContext::of(ctx)?;
        let events = exec.bus.subscribe(MESSAGE_POSTED)?.into_stream();
        let messages = events.filter_map(|event| async move {
            match event {
                FeedEvent::MessagePosted(message) => Some(message),
            }
        });
        Ok(messages.boxed())
    }
}
