//! Output types. Store rows are exposed directly; nested collections are
//! resolved on demand per parent.

use async_graphql::{Context, ID, Object, Result, SimpleObject};

use crate::persistence::{Actor, Book, Category, ChatMessage, Film, FilmCategory, Sale};
use crate::schema::ExecutionContext;

#[Object(name = "Message")]
impl ChatMessage {
    async fn id(&self) -> ID {
        ID(self.id.to_string())
    }

    async fn user(&self) -> &str {
        &self.user
    }

    async fn text(&self) -> &str {
        &self.text
    }

    /// RFC 3339 timestamp assigned by the store.
    async fn created_at(&self) -> String {
        self.created_at_rfc3339()
    }
}

#[Object]
impl Book {
    async fn id(&self) -> ID {
        ID(self.id.to_string())
    }

    async fn title(&self) -> &str {
        &self.title
    }

    async fn author(&self) -> &str {
        &self.author
    }

    /// Sales of this book, queried when the field is selected.
    async fn sales(&self, ctx: &Context<'_>) -> Result<Vec<Sale>> {
        let exec = ExecutionContext::of(ctx)?;
        Ok(exec.store.sales_for_book(self.id).await?)
    }
}

#[Object(name = "Sales")]
impl Sale {
    async fn id(&self) -> ID {
        ID(self.id.to_string())
    }

    async fn rs(&self) -> &str {
        &self.rs
    }

    #[graphql(name = "books_id")]
    async fn books_id(&self) -> ID {
        ID(self.books_id.to_string())
    }
}

#[Object(rename_fields = "snake_case")]
impl Film {
    async fn film_id(&self) -> ID {
        ID(self.id.to_string())
    }

    async fn title(&self) -> &str {
        &self.title
    }

    async fn description(&self) -> &str {
        &self.description
    }

    async fn release_year(&self) -> i64 {
        self.release_year
    }

    async fn rental_rate(&self) -> f64 {
        self.rental_rate
    }

    /// Category links of this film, queried when the field is selected.
    async fn film_category(&self, ctx: &Context<'_>) -> Result<Vec<FilmCategory>> {
        let exec = ExecutionContext::of(ctx)?;
        Ok(exec.store.categories_for_film(self.id).await?)
    }
}

#[Object(name = "Film_category", rename_fields = "snake_case")]
impl FilmCategory {
    async fn film_id(&self) -> ID {
        ID(self.film_id.to_string())
    }

    async fn category_id(&self) -> ID {
        ID(self.category_id.to_string())
    }

    async fn category(&self, ctx: &Context<'_>) -> Result<Category> {
        let exec = ExecutionContext::of(ctx)?;
        exec.store
            .find_category(self.category_id)
            .await?
            .ok_or_else(|| async_graphql::Error::new(format!("category {} not found", self.category_id)))
    }
}

#[Object(rename_fields = "snake_case")]
impl Category {
    async fn category_id(&self) -> ID {
        ID(self.id.to_string())
    }

    async fn name(&self) -> &str {
        &self.name
    }
}

#[Object(rename_fields = "snake_case")]
impl Actor {
    async fn actor_id(&self) -> ID {
        ID(self.id.to_string())
    }

    async fn first_name(&self) -> &str {
        &self.first_name
    }

    async fn last_name(&self) -> &str {
        &self.last_name
    }
}

/// A film's title together with its cast.
#[derive(Debug, SimpleObject)]
pub struct FilmWithActors {
    pub film_title: String,
    pub actors: Vec<Actor>,
}
