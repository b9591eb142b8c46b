//! GraphQL schema and resolvers.
//!
//! Resolvers come in two kinds:
//! - value resolvers (`QueryRoot`, `MutationRoot`, nested fields such as
//!   `Book.sales`) compute one result from the parent value, the arguments and
//!   the [`ExecutionContext`]
//! - stream resolvers (`SubscriptionRoot`) pair a subscribe step on the topic
//!   bus with a map from raw bus events to the declared output type
//!
//! The schema carries no shared data of its own: each request or connection
//! attaches a fresh `ExecutionContext` with `Request::data`.

mod context;
mod mutation;
mod query;
mod subscription;
mod types;

pub use context::ExecutionContext;
pub use mutation::MutationRoot;
pub use query::QueryRoot;
pub use subscription::SubscriptionRoot;

use async_graphql::{ID, Schema};

pub type FeedSchema = Schema<QueryRoot, MutationRoot, SubscriptionRoot>;

/// Build the GraphQL schema.
pub fn build_schema() -> FeedSchema {
    Schema::build(QueryRoot, MutationRoot, SubscriptionRoot).finish()
}

/// Parse a GraphQL `ID` holding a store key.
pub(crate) fn parse_id(id: &ID) -> async_graphql::Result<i64> {
    id.parse::<i64>()
        .map_err(|_| async_graphql::Error::new(format!("invalid id: {}", id.as_str())))
}

#[cfg(test)]
mod tests;
