//! The `error` module defines the error types used within the `gqlsub` application.
//!
//! Each layer owns one enum (`SettingsError`, `StoreError`, `BusError`,
//! `TransportError`, `ClientError`) and the binary aggregates them in [`Error`].
//! Resolvers turn any of these into GraphQL field errors through `?`.

use std::io;
use std::time::Duration;

use thiserror::Error;

/// Failures while assembling [`crate::config::Settings`].
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("DATABASE_URL is not set; a store connection string is required")]
    MissingDatabaseUrl,
}

/// Failures reported by the relational store gateway.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("invalid store url `{url}`: {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("store query failed: {0}")]
    Query(#[from] sqlx::Error),
}

/// Failures reported by the topic bus. Subscriber-side problems never surface here.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum BusError {
    #[error("topic bus is closed")]
    Closed,
}

/// Failures on a single subscription connection.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("websocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),

    #[error("failed to encode protocol message: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("socket write timed out after {0:?}")]
    WriteTimeout(Duration),
}

/// Failures seen by [`crate::client::FeedClient`].
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("websocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),

    #[error("invalid server message: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("connection closed by server (code {code:?}): {reason}")]
    Closed { code: Option<u16>, reason: String },

    #[error("unexpected server message: {0}")]
    Unexpected(String),

    #[error("operation `{id}` failed: {message}")]
    Operation { id: String, message: String },
}

/// Process-level error returned by the binary's subcommands.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Settings(#[from] SettingsError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Bus(#[from] BusError),

    #[error(transparent)]
    Client(#[from] ClientError),

    #[error("invalid CORS origin `{0}`")]
    InvalidOrigin(String),

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },
}
