//! CLI for gqlsub
//!
//! Subcommands:
//! - `serve`: run the GraphQL server (HTTP + `graphql-transport-ws` on one path)
//! - `watch`: subscribe to `messagePosted` and print each message
//! - `post`: post one message over the WebSocket channel

use std::process::ExitCode;

use clap::Parser;
use serde_json::json;
use tracing::{error, info};

use gqlsub::broker::EventBus;
use gqlsub::client::FeedClient;
use gqlsub::config::load_config;
use gqlsub::persistence::Store;
use gqlsub::schema::build_schema;
use gqlsub::transport::message::{OperationPayload, ServerMessage};
use gqlsub::transport::{Server, ServerState};
use gqlsub::utils::error::{ClientError, Error};
use gqlsub::utils::logging;

const DEFAULT_URL: &str = "ws://127.0.0.1:4000/graphql";

#[derive(Parser)]
#[command(name = "gqlsub", version, about = "GraphQL server with live message subscriptions")]
enum Command {
    /// Start the server
    Serve,
    /// Print every message posted from now on
    Watch {
        #[arg(long, default_value = DEFAULT_URL)]
        url: String,
    },
    /// Post a message
    Post {
        #[arg(long, default_value = DEFAULT_URL)]
        url: String,
        #[arg(long)]
        user: String,
        #[arg(long)]
        text: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let _ = dotenvy::dotenv();
    logging::init("info");

    let result = match Command::parse() {
        Command::Serve => run_server().await,
        Command::Watch { url } => run_watch(&url).await,
        Command::Post { url, user, text } => run_post(&url, &user, &text).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

async fn run_server() -> Result<(), Error> {
    let config = load_config()?;
    let store = Store::connect(&config.store).await?;
    let bus = EventBus::new(config.broker.subscriber_queue_capacity);

    let state = ServerState::new(build_schema(), store.clone(), bus.clone(), config);
    let server = match Server::bind(state).await {
        Ok(server) => server,
        Err(e) => {
            store.close().await;
            return Err(e);
        }
    };

    server.serve(shutdown_signal()).await;

    bus.close();
    store.close().await;
    info!("shutdown complete");
    Ok(())
}

async fn run_watch(url: &str) -> Result<(), Error> {
    let mut client = FeedClient::connect(url).await?;
    let id = client
        .subscribe(OperationPayload::new(
            "subscription { messagePosted { id user text createdAt } }",
        ))
        .await?;
    info!(url, "watching for new messages");

    loop {
        tokio::select! {
            message = client.next_message() => match message? {
                ServerMessage::Next { payload, .. } => {
                    let posted = &payload["data"]["messagePosted"];
                    println!(
                        "[{}] {}: {}",
                        posted["createdAt"].as_str().unwrap_or("?"),
                        posted["user"].as_str().unwrap_or("?"),
                        posted["text"].as_str().unwrap_or(""),
                    );
                }
                ServerMessage::Error { id, payload } => {
                    return Err(ClientError::Operation { id, message: json!(payload).to_string() }.into());
                }
                ServerMessage::Complete { .. } => break,
                _ => {}
            },
            _ = tokio::signal::ctrl_c() => {
                client.complete(&id).await?;
                break;
            }
        }
    }

    client.close().await?;
    Ok(())
}

async fn run_post(url: &str, user: &str, text: &str) -> Result<(), Error> {
    let mut client = FeedClient::connect(url).await?;
    let result = client
        .execute(
            OperationPayload::new(
                "mutation Post($user: String!, $text: String!) { postMessage(user: $user, text: $text) { id createdAt } }",
            )
            .with_variables(json!({ "user": user, "text": text })),
        )
        .await?;
    client.close().await?;

    if let Some(errors) = result.get("errors") {
        return Err(ClientError::Operation {
            id: "post".to_string(),
            message: errors.to_string(),
        }
        .into());
    }
    let posted = &result["data"]["postMessage"];
    println!(
        "posted message {} at {}",
        posted["id"].as_str().unwrap_or("?"),
        posted["createdAt"].as_str().unwrap_or("?"),
    );
    Ok(())
}

/// Resolves on SIGINT, or on SIGTERM where supported.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT"),
        _ = terminate => info!("received SIGTERM"),
    }
}
