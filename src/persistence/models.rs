//! Row types returned by the store gateway.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A chat message. Immutable once committed; `id` and `created_at` are
/// assigned by the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct ChatMessage {
    pub id: i64,
    #[sqlx(rename = "user_name")]
    pub user: String,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

impl ChatMessage {
    /// `created_at` as RFC 3339 with millisecond precision, e.g. `2024-05-01T12:00:00.000Z`.
    pub fn created_at_rfc3339(&self) -> String {
        self.created_at.to_rfc3339_opts(SecondsFormat::Millis, true)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Book {
    pub id: i64,
    pub title: String,
    pub author: String,
}

/// A sale of a book; `rs` is the amount as entered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Sale {
    pub id: i64,
    pub rs: String,
    pub books_id: i64,
}

/// A film of the rental catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Film {
    pub id: i64,
    pub title: String,
    pub description: String,
    pub release_year: i64,
    pub rental_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Category {
    pub id: i64,
    pub name: String,
}

/// Link between a film and one of its categories.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct FilmCategory {
    pub film_id: i64,
    pub category_id: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Actor {
    pub id: i64,
    pub first_name: String,
    pub last_name: String,
}
