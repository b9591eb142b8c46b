//! Relational store backed by `sqlx` + SQLite
//!
//! `Store` is a cheap `Clone` handle around a connection pool. Every method
//! checks a connection out for exactly one statement (or one transaction) and
//! returns it before yielding results, so callers never hold a pooled
//! connection across unrelated awaits.
//!
//! Tables:
//! - `messages`: the chat feed; `id` and `created_at` are assigned by the store
//! - `books` / `sales`: the catalog, with `sales.books_id` referencing `books.id`
//! - `films`, `categories`, `actors`: the rental catalog, linked through
//!   `film_categories` and `film_actors`

use std::str::FromStr;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use tracing::info;

use crate::config::StoreSettings;
use crate::persistence::models::{Actor, Book, Category, ChatMessage, Film, FilmCategory, Sale};
use crate::utils::error::StoreError;

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS messages (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        user_name TEXT NOT NULL,
        text TEXT NOT NULL,
        created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
    )",
    "CREATE INDEX IF NOT EXISTS messages_created_at ON messages (created_at)",
    "CREATE TABLE IF NOT EXISTS books (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        title TEXT NOT NULL,
        author TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS sales (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        rs TEXT NOT NULL,
        books_id INTEGER NOT NULL REFERENCES books (id)
    )",
    "CREATE INDEX IF NOT EXISTS sales_books_id ON sales (books_id)",
    "CREATE TABLE IF NOT EXISTS films (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        title TEXT NOT NULL,
        description TEXT NOT NULL DEFAULT '',
        release_year INTEGER NOT NULL,
        rental_rate REAL NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS categories (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL UNIQUE
    )",
    "CREATE TABLE IF NOT EXISTS film_categories (
        film_id INTEGER NOT NULL REFERENCES films (id),
        category_id INTEGER NOT NULL REFERENCES categories (id),
        PRIMARY KEY (film_id, category_id)
    )",
    "CREATE TABLE IF NOT EXISTS actors (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        first_name TEXT NOT NULL,
        last_name TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS film_actors (
        film_id INTEGER NOT NULL REFERENCES films (id),
        actor_id INTEGER NOT NULL REFERENCES actors (id),
        PRIMARY KEY (film_id, actor_id)
    )",
];

#[derive(Debug, Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Open the pool described by `settings` and create missing tables.
    pub async fn connect(settings: &StoreSettings) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(&settings.database_url)
            .map_err(|source| StoreError::InvalidUrl {
                url: settings.database_url.clone(),
                source,
            })?
            .create_if_missing(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(settings.max_connections.max(1))
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        info!(
            max_connections = settings.max_connections,
            "store connected"
        );
        Ok(store)
    }

    /// Create the tables this server needs when they do not exist yet.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    /// Close the pool, waiting for checked-out connections to be returned.
    pub async fn close(&self) {
        self.pool.close().await;
        info!("store closed");
    }

    /// All messages, oldest first.
    pub async fn list_messages(&self) -> Result<Vec<ChatMessage>, StoreError> {
        let messages = sqlx::query_as::<_, ChatMessage>(
            "SELECT id, user_name, text, created_at FROM messages ORDER BY created_at ASC, id ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(messages)
    }

    /// Insert a message and return it with its store-assigned id and timestamp.
    pub async fn insert_message(&self, user: &str, text: &str) -> Result<ChatMessage, StoreError> {
        let message = sqlx::query_as::<_, ChatMessage>(
            "INSERT INTO messages (user_name, text) VALUES (?, ?)
             RETURNING id, user_name, text, created_at",
        )
        .bind(user)
        .bind(text)
        .fetch_one(&self.pool)
        .await?;
        Ok(message)
    }

    pub async fn list_books(&self) -> Result<Vec<Book>, StoreError> {
        let books = sqlx::query_as::<_, Book>("SELECT id, title, author FROM books ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        Ok(books)
    }

    pub async fn find_book(&self, id: i64) -> Result<Option<Book>, StoreError> {
        let book = sqlx::query_as::<_, Book>("SELECT id, title, author FROM books WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(book)
    }

    pub async fn insert_book(&self, title: &str, author: &str) -> Result<Book, StoreError> {
        let book = sqlx::query_as::<_, Book>(
            "INSERT INTO books (title, author) VALUES (?, ?) RETURNING id, title, author",
        )
        .bind(title)
        .bind(author)
        .fetch_one(&self.pool)
        .await?;
        Ok(book)
    }

    /// Update the given columns, keeping the current value for `None`.
    /// Returns `None` when no book has `id`.
    pub async fn update_book(
        &self,
        id: i64,
        title: Option<&str>,
        author: Option<&str>,
    ) -> Result<Option<Book>, StoreError> {
        let book = sqlx::query_as::<_, Book>(
            "UPDATE books SET title = COALESCE(?, title), author = COALESCE(?, author)
             WHERE id = ? RETURNING id, title, author",
        )
        .bind(title)
        .bind(author)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(book)
    }

    /// Delete a book together with its sales. Returns whether the book existed.
    pub async fn delete_book(&self, id: i64) -> Result<bool, StoreError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM sales WHERE books_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        let deleted = sqlx::query("DELETE FROM books WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        tx.commit().await?;
        Ok(deleted > 0)
    }

    pub async fn list_sales(&self) -> Result<Vec<Sale>, StoreError> {
        let sales = sqlx::query_as::<_, Sale>("SELECT id, rs, books_id FROM sales ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        Ok(sales)
    }

    pub async fn find_sale(&self, id: i64) -> Result<Option<Sale>, StoreError> {
        let sale = sqlx::query_as::<_, Sale>("SELECT id, rs, books_id FROM sales WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(sale)
    }

    /// Sales recorded against one book.
    pub async fn sales_for_book(&self, book_id: i64) -> Result<Vec<Sale>, StoreError> {
        let sales = sqlx::query_as::<_, Sale>(
            "SELECT id, rs, books_id FROM sales WHERE books_id = ? ORDER BY id",
        )
        .bind(book_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(sales)
    }

    pub async fn insert_sale(&self, rs: &str, books_id: i64) -> Result<Sale, StoreError> {
        let sale = sqlx::query_as::<_, Sale>(
            "INSERT INTO sales (rs, books_id) VALUES (?, ?) RETURNING id, rs, books_id",
        )
        .bind(rs)
        .bind(books_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(sale)
    }

    pub async fn update_sale(
        &self,
        id: i64,
        rs: Option<&str>,
        books_id: Option<i64>,
    ) -> Result<Option<Sale>, StoreError> {
        let sale = sqlx::query_as::<_, Sale>(
            "UPDATE sales SET rs = COALESCE(?, rs), books_id = COALESCE(?, books_id)
             WHERE id = ? RETURNING id, rs, books_id",
        )
        .bind(rs)
        .bind(books_id)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(sale)
    }

    pub async fn delete_sale(&self, id: i64) -> Result<bool, StoreError> {
        let deleted = sqlx::query("DELETE FROM sales WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?
            .rows_affected();
        Ok(deleted > 0)
    }

    pub async fn list_films(&self) -> Result<Vec<Film>, StoreError> {
        let films = sqlx::query_as::<_, Film>(
            "SELECT id, title, description, release_year, rental_rate FROM films ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(films)
    }

    pub async fn find_film(&self, id: i64) -> Result<Option<Film>, StoreError> {
        let film = sqlx::query_as::<_, Film>(
            "SELECT id, title, description, release_year, rental_rate FROM films WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(film)
    }

    pub async fn insert_film(
        &self,
        title: &str,
        description: &str,
        release_year: i64,
        rental_rate: f64,
    ) -> Result<Film, StoreError> {
        let film = sqlx::query_as::<_, Film>(
            "INSERT INTO films (title, description, release_year, rental_rate) VALUES (?, ?, ?, ?)
             RETURNING id, title, description, release_year, rental_rate",
        )
        .bind(title)
        .bind(description)
        .bind(release_year)
        .bind(rental_rate)
        .fetch_one(&self.pool)
        .await?;
        Ok(film)
    }

    /// Films filed under the category called `name`. Empty when no such category exists.
    pub async fn films_in_category(&self, name: &str) -> Result<Vec<Film>, StoreError> {
        let films = sqlx::query_as::<_, Film>(
            "SELECT f.id, f.title, f.description, f.release_year, f.rental_rate
             FROM films f
             JOIN film_categories fc ON fc.film_id = f.id
             JOIN categories c ON c.id = fc.category_id
             WHERE c.name = ?
             ORDER BY f.id",
        )
        .bind(name)
        .fetch_all(&self.pool)
        .await?;
        Ok(films)
    }

    pub async fn list_categories(&self) -> Result<Vec<Category>, StoreError> {
        let categories = sqlx::query_as::<_, Category>("SELECT id, name FROM categories ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        Ok(categories)
    }

    pub async fn find_category(&self, id: i64) -> Result<Option<Category>, StoreError> {
        let category = sqlx::query_as::<_, Category>("SELECT id, name FROM categories WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(category)
    }

    pub async fn insert_category(&self, name: &str) -> Result<Category, StoreError> {
        let category = sqlx::query_as::<_, Category>(
            "INSERT INTO categories (name) VALUES (?) RETURNING id, name",
        )
        .bind(name)
        .fetch_one(&self.pool)
        .await?;
        Ok(category)
    }

    pub async fn list_film_categories(&self) -> Result<Vec<FilmCategory>, StoreError> {
        let links = sqlx::query_as::<_, FilmCategory>(
            "SELECT film_id, category_id FROM film_categories ORDER BY film_id, category_id",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(links)
    }

    /// Category links of one film.
    pub async fn categories_for_film(&self, film_id: i64) -> Result<Vec<FilmCategory>, StoreError> {
        let links = sqlx::query_as::<_, FilmCategory>(
            "SELECT film_id, category_id FROM film_categories WHERE film_id = ? ORDER BY category_id",
        )
        .bind(film_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(links)
    }

    /// File a film under a category. Linking the same pair twice is a no-op.
    pub async fn link_film_category(&self, film_id: i64, category_id: i64) -> Result<(), StoreError> {
        sqlx::query("INSERT OR IGNORE INTO film_categories (film_id, category_id) VALUES (?, ?)")
            .bind(film_id)
            .bind(category_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn insert_actor(&self, first_name: &str, last_name: &str) -> Result<Actor, StoreError> {
        let actor = sqlx::query_as::<_, Actor>(
            "INSERT INTO actors (first_name, last_name) VALUES (?, ?)
             RETURNING id, first_name, last_name",
        )
        .bind(first_name)
        .bind(last_name)
        .fetch_one(&self.pool)
        .await?;
        Ok(actor)
    }

    /// Actors cast in one film.
    pub async fn actors_for_film(&self, film_id: i64) -> Result<Vec<Actor>, StoreError> {
        let actors = sqlx::query_as::<_, Actor>(
            "SELECT a.id, a.first_name, a.last_name
             FROM actors a
             JOIN film_actors fa ON fa.actor_id = a.id
             WHERE fa.film_id = ?
             ORDER BY a.id",
        )
        .bind(film_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(actors)
    }

    pub async fn cast_actor(&self, film_id: i64, actor_id: i64) -> Result<(), StoreError> {
        sqlx::query("INSERT OR IGNORE INTO film_actors (film_id, actor_id) VALUES (?, ?)")
            .bind(film_id)
            .bind(actor_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
