use async_graphql::{Context, ID, Object, Result};

use crate::persistence::{Book, Category, ChatMessage, Film, FilmCategory, Sale};
use crate::schema::types::FilmWithActors;
use crate::schema::{ExecutionContext, parse_id};

pub struct QueryRoot;

#[Object]
impl QueryRoot {
    /// Every posted message, oldest first.
    async fn messages(&self, ctx: &Context<'_>) -> Result<Vec<ChatMessage>> {
        let exec = ExecutionContext::of(ctx)?;
        Ok(exec.store.list_messages().await?)
    }

    async fn books(&self, ctx: &Context<'_>) -> Result<Vec<Book>> {
        let exec = ExecutionContext::of(ctx)?;
        Ok(exec.store.list_books().await?)
    }

    async fn book(&self, ctx: &Context<'_>, id: ID) -> Result<Option<Book>> {
        let exec = ExecutionContext::of(ctx)?;
        Ok(exec.store.find_book(parse_id(&id)?).await?)
    }

    async fn sales(&self, ctx: &Context<'_>) -> Result<Vec<Sale>> {
        let exec = ExecutionContext::of(ctx)?;
        Ok(exec.store.list_sales().await?)
    }

    async fn sale(&self, ctx: &Context<'_>, id: ID) -> Result<Option<Sale>> {
        let exec = ExecutionContext::of(ctx)?;
        Ok(exec.store.find_sale(parse_id(&id)?).await?)
    }

    async fn films(&self, ctx: &Context<'_>) -> Result<Vec<Film>> {
        let exec = ExecutionContext::of(ctx)?;
        Ok(exec.store.list_films().await?)
    }

    async fn film(&self, ctx: &Context<'_>, id: ID) -> Result<Option<Film>> {
        let exec = ExecutionContext::of(ctx)?;
        Ok(exec.store.find_film(parse_id(&id)?).await?)
    }

    #[graphql(name = "film_categorys")]
    async fn film_categories(&self, ctx: &Context<'_>) -> Result<Vec<FilmCategory>> {
        let exec = ExecutionContext::of(ctx)?;
        Ok(exec.store.list_film_categories().await?)
    }

    #[graphql(name = "categorys")]
    async fn categories(&self, ctx: &Context<'_>) -> Result<Vec<Category>> {
        let exec = ExecutionContext::of(ctx)?;
        Ok(exec.store.list_categories().await?)
    }

    async fn category(&self, ctx: &Context<'_>, id: ID) -> Result<Option<Category>> {
        let exec = ExecutionContext::of(ctx)?;
        Ok(exec.store.find_category(parse_id(&id)?).await?)
    }

    /// Films filed under the category with this exact name.
    async fn films_by_category(&self, ctx: &Context<'_>, category: String) -> Result<Vec<Film>> {
        let exec = ExecutionContext::of(ctx)?;
        Ok(exec.store.films_in_category(&category).await?)
    }

    /// Title and cast of one film, or null when no film has `film_id`.
    async fn film_actors(&self, ctx: &Context<'_>, film_id: ID) -> Result<Option<FilmWithActors>> {
        let exec = ExecutionContext::of(ctx)?;
        let film_id = parse_id(&film_id)?;
        let Some(film) = exec.store.find_film(film_id).await? else {
            return Ok(None);
        };
        let actors = exec.store.actors_for_film(film_id).await?;
        Ok(Some(FilmWithActors {
            film_title: film.title,
            actors,
        }))
    }
}
