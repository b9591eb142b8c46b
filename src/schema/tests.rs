use super::{ExecutionContext, FeedSchema, build_schema};
use crate::broker::{EventBus, FeedEvent, MESSAGE_POSTED};
use crate::persistence::testing::temp_store;
use async_graphql::{Request, Variables};
use futures::StreamExt;
use serde_json::{Value, json};
use std::time::Duration;
use tempfile::TempDir;
use tokio::time::{sleep, timeout};

async fn harness() -> (FeedSchema, ExecutionContext, TempDir) {
    let (store, dir) = temp_store().await;
    let ctx = ExecutionContext::new(store, EventBus::new(16));
    (build_schema(), ctx, dir)
}

async fn run(schema: &FeedSchema, ctx: &ExecutionContext, query: &str, variables: Value) -> Value {
    let request = Request::new(query)
        .variables(Variables::from_json(variables))
        .data(ctx.clone());
    let response = schema.execute(request).await;
    assert!(response.errors.is_empty(), "unexpected errors: {:?}", response.errors);
    response.data.into_json().unwrap()
}

async fn wait_for_subscribers(bus: &EventBus, expected: usize) {
    timeout(Duration::from_secs(2), async {
        while bus.subscriber_count(MESSAGE_POSTED) != expected {
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("subscriber count never reached the expected value");
}

const POST: &str = "mutation Post($user: String!, $text: String!) {
    postMessage(user: $user, text: $text) { id user text createdAt }
}";

#[tokio::test]
async fn test_post_message_returns_store_assigned_fields() {
    let (schema, ctx, _dir) = harness().await;

    let data = run(&schema, &ctx, POST, json!({"user": "alice", "text": "hi"})).await;
    let posted = &data["postMessage"];

    assert_eq!(posted["user"], "alice");
    assert_eq!(posted["text"], "hi");
    assert!(posted["id"].as_str().unwrap().parse::<i64>().is_ok());
    let created_at = posted["createdAt"].as_str().unwrap();
    assert!(chrono::DateTime::parse_from_rfc3339(created_at).is_ok());
}

#[tokio::test]
async fn test_post_message_publishes_after_write() {
    let (schema, ctx, _dir) = harness().await;
    let sub = ctx.bus.subscribe(MESSAGE_POSTED).unwrap();

    run(&schema, &ctx, POST, json!({"user": "alice", "text": "hi"})).await;

    let FeedEvent::MessagePosted(message) = sub.recv().await.unwrap();
    assert_eq!(message.user, "alice");
    assert_eq!(ctx.store.list_messages().await.unwrap(), vec![message]);
}

#[tokio::test]
async fn test_post_message_is_stored_when_publish_fails() {
    let (schema, ctx, _dir) = harness().await;
    ctx.bus.close();

    let data = run(&schema, &ctx, POST, json!({"user": "bob", "text": "still here"})).await;
    assert_eq!(data["postMessage"]["text"], "still here");

    let stored = ctx.store.list_messages().await.unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].user, "bob");
}

#[tokio::test]
async fn test_messages_lists_oldest_first() {
    let (schema, ctx, _dir) = harness().await;
    for text in ["first", "second"] {
        run(&schema, &ctx, POST, json!({"user": "alice", "text": text})).await;
    }

    let data = run(&schema, &ctx, "{ messages { text } }", json!({})).await;
    assert_eq!(
        data["messages"],
        json!([{"text": "first"}, {"text": "second"}])
    );
}

#[tokio::test]
async fn test_subscription_streams_posted_messages() {
    let (schema, ctx, _dir) = harness().await;

    // posted before anyone listens: must not be replayed
    run(&schema, &ctx, POST, json!({"user": "early", "text": "missed"})).await;

    let request = Request::new("subscription { messagePosted { id user text createdAt } }")
        .data(ctx.clone());
    let mut stream = schema.execute_stream(request);
    let listener = tokio::spawn(async move { stream.next().await });
    wait_for_subscribers(&ctx.bus, 1).await;

    let posted = run(&schema, &ctx, POST, json!({"user": "alice", "text": "hi"})).await;

    let response = timeout(Duration::from_secs(2), listener)
        .await
        .expect("subscription event not delivered")
        .unwrap()
        .expect("stream ended early");
    assert!(response.errors.is_empty());
    let event = response.data.into_json().unwrap();
    assert_eq!(event["messagePosted"], posted["postMessage"]);
}

#[tokio::test]
async fn test_dropping_subscription_stream_unsubscribes() {
    let (schema, ctx, _dir) = harness().await;
    let request = Request::new("subscription { messagePosted { id } }").data(ctx.clone());
    let mut stream = schema.execute_stream(request);

    assert!(
        timeout(Duration::from_millis(50), stream.next())
            .await
            .is_err()
    );
    assert_eq!(ctx.bus.subscriber_count(MESSAGE_POSTED), 1);

    drop(stream);
    assert_eq!(ctx.bus.subscriber_count(MESSAGE_POSTED), 0);
}

#[tokio::test]
async fn test_subscription_on_closed_bus_is_an_error() {
    let (schema, ctx, _dir) = harness().await;
    ctx.bus.close();

    let request = Request::new("subscription { messagePosted { id } }").data(ctx.clone());
    let response = schema.execute_stream(request).next().await.unwrap();
    assert!(response.is_err());
    assert!(response.errors[0].message.contains("closed"));
}

#[tokio::test]
async fn test_book_sales_are_resolved_per_book() {
    let (schema, ctx, _dir) = harness().await;
    let hobbit = ctx.store.insert_book("The Hobbit", "J.R.R. Tolkien").await.unwrap();
    let potter = ctx.store.insert_book("Harry Potter", "J.K. Rowling").await.unwrap();
    ctx.store.insert_sale("200", hobbit.id).await.unwrap();
    ctx.store.insert_sale("400", potter.id).await.unwrap();
    ctx.store.insert_sale("300", hobbit.id).await.unwrap();

    let data = run(
        &schema,
        &ctx,
        "{ books { title sales { rs books_id } } }",
        json!({}),
    )
    .await;

    let hobbit_id = hobbit.id.to_string();
    let potter_id = potter.id.to_string();
    assert_eq!(
        data["books"],
        json!([
            {"title": "The Hobbit", "sales": [
                {"rs": "200", "books_id": hobbit_id},
                {"rs": "300", "books_id": hobbit_id}
            ]},
            {"title": "Harry Potter", "sales": [{"rs": "400", "books_id": potter_id}]}
        ])
    );
}

#[tokio::test]
async fn test_catalog_mutations() {
    let (schema, ctx, _dir) = harness().await;

    let created = run(
        &schema,
        &ctx,
        r#"mutation { createBook(title: "Dune", author: "Herbert") { id title author } }"#,
        json!({}),
    )
    .await;
    let book_id = created["createBook"]["id"].as_str().unwrap().to_string();

    let updated = run(
        &schema,
        &ctx,
        "mutation Update($id: ID!) { updateBook(id: $id, author: \"Frank Herbert\") { title author } }",
        json!({"id": book_id}),
    )
    .await;
    assert_eq!(
        updated["updateBook"],
        json!({"title": "Dune", "author": "Frank Herbert"})
    );

    let sale = run(
        &schema,
        &ctx,
        "mutation Sell($book: ID!) { createSale(rs: \"500\", books_id: $book) { id rs books_id } }",
        json!({"book": book_id}),
    )
    .await;
    let sale_id = sale["createSale"]["id"].as_str().unwrap().to_string();
    assert_eq!(sale["createSale"]["books_id"], book_id);

    let repriced = run(
        &schema,
        &ctx,
        "mutation Reprice($id: ID!) { updateSale(id: $id, rs: \"550\") { rs books_id } }",
        json!({"id": sale_id}),
    )
    .await;
    assert_eq!(repriced["updateSale"], json!({"rs": "550", "books_id": book_id}));

    let fetched = run(
        &schema,
        &ctx,
        "query One($id: ID!) { book(id: $id) { title sales { rs } } }",
        json!({"id": book_id}),
    )
    .await;
    assert_eq!(fetched["book"]["sales"], json!([{"rs": "550"}]));

    let deleted = run(
        &schema,
        &ctx,
        "mutation Delete($id: ID!) { deleteBook(id: $id) }",
        json!({"id": book_id}),
    )
    .await;
    assert_eq!(deleted["deleteBook"], true);

    let data = run(&schema, &ctx, "{ books { id } sales { id } }", json!({})).await;
    assert_eq!(data, json!({"books": [], "sales": []}));

    let missing = run(
        &schema,
        &ctx,
        "mutation { deleteSale(id: \"12345\") updateBook(id: \"12345\", title: \"x\") { id } }",
        json!({}),
    )
    .await;
    assert_eq!(missing, json!({"deleteSale": false, "updateBook": null}));
}

#[tokio::test]
async fn test_film_categories_are_resolved_per_film() {
    let (schema, ctx, _dir) = harness().await;
    let store = &ctx.store;
    let dinosaur = store.insert_film("Academy Dinosaur", "A epic drama", 2006, 0.99).await.unwrap();
    let gold = store.insert_film("Ace Goldfinger", "A astounding epistle", 2006, 4.99).await.unwrap();
    let documentary = store.insert_category("Documentary").await.unwrap();
    let horror = store.insert_category("Horror").await.unwrap();
    store.link_film_category(dinosaur.id, documentary.id).await.unwrap();
    store.link_film_category(gold.id, horror.id).await.unwrap();

    let data = run(
        &schema,
        &ctx,
        "{ films { film_id title release_year rental_rate film_category { category_id category { name } } } }",
        json!({}),
    )
    .await;
    assert_eq!(
        data["films"],
        json!([
            {
                "film_id": dinosaur.id.to_string(),
                "title": "Academy Dinosaur",
                "release_year": 2006,
                "rental_rate": 0.99,
                "film_category": [
                    {"category_id": documentary.id.to_string(), "category": {"name": "Documentary"}}
                ]
            },
            {
                "film_id": gold.id.to_string(),
                "title": "Ace Goldfinger",
                "release_year": 2006,
                "rental_rate": 4.99,
                "film_category": [
                    {"category_id": horror.id.to_string(), "category": {"name": "Horror"}}
                ]
            }
        ])
    );

    let data = run(
        &schema,
        &ctx,
        "{ categorys { name } film_categorys { film_id } }",
        json!({}),
    )
    .await;
    assert_eq!(data["categorys"], json!([{"name": "Documentary"}, {"name": "Horror"}]));
    assert_eq!(data["film_categorys"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_films_by_category() {
    let (schema, ctx, _dir) = harness().await;
    let store = &ctx.store;
    let film = store.insert_film("Alien Center", "A brilliant drama", 2006, 2.99).await.unwrap();
    let scifi = store.insert_category("Sci-Fi").await.unwrap();
    store.link_film_category(film.id, scifi.id).await.unwrap();

    const QUERY: &str = "query ByCategory($name: String!) { filmsByCategory(category: $name) { title } }";
    let data = run(&schema, &ctx, QUERY, json!({"name": "Sci-Fi"})).await;
    assert_eq!(data["filmsByCategory"], json!([{"title": "Alien Center"}]));

    let data = run(&schema, &ctx, QUERY, json!({"name": "Western"})).await;
    assert_eq!(data["filmsByCategory"], json!([]));
}

#[tokio::test]
async fn test_film_actors() {
    let (schema, ctx, _dir) = harness().await;
    let store = &ctx.store;
    let film = store.insert_film("Agent Truman", "A intrepid panorama", 2006, 2.99).await.unwrap();
    let penelope = store.insert_actor("Penelope", "Guiness").await.unwrap();
    let nick = store.insert_actor("Nick", "Wahlberg").await.unwrap();
    store.cast_actor(film.id, penelope.id).await.unwrap();
    store.cast_actor(film.id, nick.id).await.unwrap();

    const QUERY: &str =
        "query Cast($id: ID!) { filmActors(filmId: $id) { filmTitle actors { actor_id first_name last_name } } }";
    let data = run(&schema, &ctx, QUERY, json!({"id": film.id.to_string()})).await;
    assert_eq!(
        data["filmActors"],
        json!({
            "filmTitle": "Agent Truman",
            "actors": [
                {"actor_id": penelope.id.to_string(), "first_name": "Penelope", "last_name": "Guiness"},
                {"actor_id": nick.id.to_string(), "first_name": "Nick", "last_name": "Wahlberg"}
            ]
        })
    );

    let data = run(&schema, &ctx, QUERY, json!({"id": "999"})).await;
    assert_eq!(data["filmActors"], Value::Null);
}

#[tokio::test]
async fn test_malformed_id_is_a_field_error() {
    let (schema, ctx, _dir) = harness().await;
    let response = schema
        .execute(Request::new("{ book(id: \"abc\") { id } }").data(ctx.clone()))
        .await;
    assert_eq!(response.errors.len(), 1);
    assert_eq!(response.errors[0].message, "invalid id: abc");
}

#[tokio::test]
async fn test_missing_context_is_reported() {
    let schema = build_schema();
    let response = schema.execute("{ messages { id } }").await;
    assert_eq!(response.errors.len(), 1);
}
