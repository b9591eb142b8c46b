//! # gqlsub
//!
//! `gqlsub` is a GraphQL server that answers queries and mutations over HTTP
//! and pushes live `messagePosted` notifications to WebSocket subscribers
//! speaking `graphql-transport-ws`.
//!
//! ## Core Modules
//!
//! - `broker`: the in-process topic bus fanning events out to subscriber queues.
//! - `client`: a small protocol client used by the CLI and the tests.
//! - `config`: layered configuration from defaults, files and the environment.
//! - `persistence`: the relational store gateway (`sqlx` over SQLite).
//! - `schema`: GraphQL types and resolvers, value and stream alike.
//! - `transport`: the HTTP request gateway and the subscription transport.
//! - `utils`: error types and logging setup.

pub mod broker;
pub mod client;
pub mod config;
pub mod persistence;
pub mod schema;
pub mod transport;
pub mod utils;
