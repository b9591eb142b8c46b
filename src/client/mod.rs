//! The `client` module provides [`FeedClient`], a small
//! `graphql-transport-ws` client.
//!
//! The CLI uses it for `watch` and `post`; the end-to-end tests use it to drive
//! a running server.

pub mod feed_client;
pub use feed_client::FeedClient;

#[cfg(test)]
mod tests;
