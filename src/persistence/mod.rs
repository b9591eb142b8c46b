//! The `persistence` module is the store gateway: it runs parameterized
//! queries against the relational store and maps rows to typed records.
//!
//! It uses `sqlx` over SQLite with a connection pool shared by every resolver.
//! Tables are created at startup when missing.

pub mod models;
pub mod sql_store;

pub use models::{Actor, Book, Category, ChatMessage, Film, FilmCategory, Sale};
pub use sql_store::Store;

#[cfg(test)]
pub(crate) mod testing;
