use async_graphql::Context;

use crate::broker::EventBus;
use crate::persistence::Store;

/// Shared handles attached to one request or one subscription connection.
///
/// Built per HTTP request and per WebSocket connection, never reused across
/// them and never persisted.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub store: Store,
    pub bus: EventBus,
}

impl ExecutionContext {
    pub fn new(store: Store, bus: EventBus) -> Self {
        Self { store, bus }
    }

    /// The context attached to the operation `ctx` is resolving.
    pub fn of<'a>(ctx: &Context<'a>) -> async_graphql::Result<&'a ExecutionContext> {
        ctx.data::<ExecutionContext>()
    }
}
