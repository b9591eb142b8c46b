//! The `transport` module is responsible for network communication with
//! clients over a single HTTP path.
//!
//! - `http`: the request gateway executing `POST` bodies against the schema
//! - `message`: the `graphql-transport-ws` frames and close codes
//! - `connection`: the per-socket subscription state machine
//! - `server`: the listener, upgrade negotiation and graceful shutdown

pub mod connection;
pub mod http;
pub mod message;
pub mod server;

pub use connection::{Connection, ConnectionState};
pub use server::{Server, ServerState};

#[cfg(test)]
pub(crate) mod testing;
