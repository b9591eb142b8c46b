use async_graphql::{Context, ID, Object, Result};
use tracing::{debug, warn};

use crate::broker::{EventBus, FeedEvent};
use crate::persistence::{Book, ChatMessage, Sale};
use crate::schema::{ExecutionContext, parse_id};

pub struct MutationRoot;

#[Object]
impl MutationRoot {
    /// Store a message, then notify every `messagePosted` subscriber.
    async fn post_message(
        &self,
        ctx: &Context<'_>,
        user: String,
        text: String,
    ) -> Result<ChatMessage> {
        let exec = ExecutionContext::of(ctx)?;
        let message = exec.store.insert_message(&user, &text).await?;
        publish(&exec.bus, FeedEvent::MessagePosted(message.clone()));
        Ok(message)
    }

    async fn create_book(&self, ctx: &Context<'_>, title: String, author: String) -> Result<Book> {
        let exec = ExecutionContext::of(ctx)?;
        Ok(exec.store.insert_book(&title, &author).await?)
    }

    /// Omitted arguments keep their current value. Returns null for an unknown id.
    async fn update_book(
        &self,
        ctx: &Context<'_>,
        id: ID,
        title: Option<String>,
        author: Option<String>,
    ) -> Result<Option<Book>> {
        let exec = ExecutionContext::of(ctx)?;
        let book = exec
            .store
            .update_book(parse_id(&id)?, title.as_deref(), author.as_deref())
            .await?;
        Ok(book)
    }

    /// Deletes the book and its sales.
    async fn delete_book(&self, ctx: &Context<'_>, id: ID) -> Result<bool> {
        let exec = ExecutionContext::of(ctx)?;
        Ok(exec.store.delete_book(parse_id(&id)?).await?)
    }

    async fn create_sale(
        &self,
        ctx: &Context<'_>,
        rs: String,
        #[graphql(name = "books_id")] books_id: ID,
    ) -> Result<Sale> {
        let exec = ExecutionContext::of(ctx)?;
        Ok(exec.store.insert_sale(&rs, parse_id(&books_id)?).await?)
    }

    async fn update_sale(
        &self,
        ctx: &Context<'_>,
        id: ID,
        rs: Option<String>,
        #[graphql(name = "books_id")] books_id: Option<ID>,
    ) -> Result<Option<Sale>> {
        let exec = ExecutionContext::of(ctx)?;
        let books_id = books_id.as_ref().map(parse_id).transpose()?;
        let sale = exec
            .store
            .update_sale(parse_id(&id)?, rs.as_deref(), books_id)
            .await?;
        Ok(sale)
    }

    async fn delete_sale(&self, ctx: &Context<'_>, id: ID) -> Result<bool> {
        let exec = ExecutionContext::of(ctx)?;
        Ok(exec.store.delete_sale(parse_id(&id)?).await?)
    }
}

/// Publish after a committed write. A failing publish is logged and leaves the
/// write in place.
pub(crate) fn publish(bus: &EventBus, event: FeedEvent) {
    let topic = event.topic();
    match bus.publish(topic, event) {
        Ok(offered) => debug!(topic, offered, "event published"),
        Err(e) => warn!(topic, error = %e, "write committed but event not published"),
    }
}
