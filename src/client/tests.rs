use super::FeedClient;
use crate::transport::message::{OperationPayload, ServerMessage};
use crate::transport::testing::TestServer;
use crate::utils::error::ClientError;
use serde_json::json;

#[tokio::test]
async fn test_connect_fails_without_server() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let result = FeedClient::connect(&format!("ws://{addr}/graphql")).await;
    assert!(matches!(result, Err(ClientError::WebSocket(_))));
}

#[tokio::test]
async fn test_execute_returns_payload() {
    let server = TestServer::start().await;
    let mut client = FeedClient::connect(&server.ws_url()).await.unwrap();

    let created = client
        .execute(OperationPayload::new(
            r#"mutation { createBook(title: "Dune", author: "Herbert") { title } }"#,
        ))
        .await
        .unwrap();
    assert_eq!(created, json!({ "data": { "createBook": { "title": "Dune" } } }));

    let listed = client
        .execute(OperationPayload::new("{ books { title } }"))
        .await
        .unwrap();
    assert_eq!(listed["data"]["books"], json!([{ "title": "Dune" }]));

    client.close().await.unwrap();
    server.shutdown().await;
}

#[tokio::test]
async fn test_execute_reports_operation_errors() {
    let server = TestServer::start().await;
    let mut client = FeedClient::connect(&server.ws_url()).await.unwrap();

    let result = client
        .execute(OperationPayload::new("{ definitelyNotAField }"))
        .await;
    match result {
        Err(ClientError::Operation { id, message }) => {
            assert_eq!(id, "1");
            assert!(message.contains("definitelyNotAField"), "{message}");
        }
        other => panic!("expected operation error, got {other:?}"),
    }

    // ids keep counting up on the same connection
    let id = client
        .subscribe(OperationPayload::new("{ messages { id } }"))
        .await
        .unwrap();
    assert_eq!(id, "2");
    assert!(matches!(
        client.next_message().await.unwrap(),
        ServerMessage::Next { .. }
    ));
    assert_eq!(
        client.next_message().await.unwrap(),
        ServerMessage::Complete { id }
    );

    server.shutdown().await;
}
