//! One `graphql-transport-ws` connection
//!
//! A [`Connection`] owns the socket for its whole life and walks
//! `Connecting → Accepted → Subscribed(n) → Closing → Closed`.
//!
//! Each `subscribe` spawns a forwarding task that pulls results from the
//! operation's response stream and pushes them into a bounded per-connection
//! channel. The connection loop is the only writer on the socket, so results of
//! one operation reach the client in the order the stream produced them.
//! Aborting a forwarding task drops its stream, which drops the bus
//! registration behind it.
//!
//! Every socket write is bounded by `transport.write_timeout_ms`. A peer that
//! stops reading is dropped once a write stalls, so one stuck client can
//! neither hold up the others nor block shutdown.

use std::collections::HashMap;
use std::time::Duration;

use async_graphql::Response;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tungstenite::Message as WsMessage;
use uuid::Uuid;

use crate::config::TransportSettings;
use crate::schema::{ExecutionContext, FeedSchema};
use crate::transport::message::{
    ClientMessage, OperationPayload, ServerMessage, close_code, close_frame, to_frame,
};
use crate::utils::error::TransportError;

/// How long a closing connection waits for the peer to answer its close frame.
const CLOSE_GRACE: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Upgraded, waiting for `connection_init`.
    Connecting,
    /// Acknowledged, no active operations.
    Accepted,
    /// Acknowledged with this many active operations.
    Subscribed(usize),
    Closing,
    Closed,
}

/// Produced by forwarding tasks. `serial` tells a stale event for a reused
/// operation id apart from the current one.
#[derive(Debug)]
enum OperationEvent {
    Next {
        id: String,
        serial: u64,
        payload: Value,
    },
    Failed {
        id: String,
        serial: u64,
        errors: Vec<Value>,
    },
    Completed {
        id: String,
        serial: u64,
    },
}

#[derive(Debug)]
struct Operation {
    serial: u64,
    task: JoinHandle<()>,
}

/// Why the receive loop stopped.
#[derive(Debug)]
enum Exit {
    /// The peer went away; nothing more can be written.
    Disconnected,
    /// The peer sent a close frame; only the queued close reply is left to flush.
    PeerClosed,
    /// Protocol violation or timeout: close with this code.
    Close(u16, String),
    /// Server shutdown: complete every operation, then close with 1001.
    Shutdown,
}

enum Flow {
    Continue,
    Stop(Exit),
}

pub struct Connection {
    id: Uuid,
    schema: FeedSchema,
    context: ExecutionContext,
    init_timeout: Duration,
    write_timeout: Duration,
    state: ConnectionState,
    operations: HashMap<String, Operation>,
    next_serial: u64,
    events_tx: mpsc::Sender<OperationEvent>,
    events_rx: mpsc::Receiver<OperationEvent>,
}

impl Connection {
    pub fn new(schema: FeedSchema, context: ExecutionContext, settings: &TransportSettings) -> Self {
        let (events_tx, events_rx) = mpsc::channel(settings.outbound_buffer.max(1));
        Self {
            id: Uuid::new_v4(),
            schema,
            context,
            init_timeout: Duration::from_millis(settings.connection_init_timeout_ms),
            write_timeout: Duration::from_millis(settings.write_timeout_ms),
            state: ConnectionState::Connecting,
            operations: HashMap::new(),
            next_serial: 0,
            events_tx,
            events_rx,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Serve the protocol on `socket` until the peer leaves, a protocol error
    /// ends the connection, or `shutdown` fires.
    ///
    /// Every active operation is cancelled before this returns, whatever the
    /// reason for leaving.
    pub async fn run<S>(mut self, mut socket: S, shutdown: CancellationToken) -> Result<(), TransportError>
    where
        S: Stream<Item = Result<WsMessage, tungstenite::Error>>
            + Sink<WsMessage, Error = tungstenite::Error>
            + Unpin,
    {
        info!(connection = %self.id, "connection opened");

        let exit = self.drive(&mut socket, &shutdown).await;
        self.state = ConnectionState::Closing;
        let cancelled = self.cancel_all();

        let result = match exit {
            Ok(exit) => self.finish(&mut socket, exit, cancelled).await,
            Err(e) => Err(e),
        };

        self.state = ConnectionState::Closed;
        match &result {
            Ok(()) => info!(connection = %self.id, "connection closed"),
            Err(e) => warn!(connection = %self.id, error = %e, "connection closed with error"),
        }
        result
    }

    async fn drive<S>(&mut self, socket: &mut S, shutdown: &CancellationToken) -> Result<Exit, TransportError>
    where
        S: Stream<Item = Result<WsMessage, tungstenite::Error>>
            + Sink<WsMessage, Error = tungstenite::Error>
            + Unpin,
    {
        let init_deadline = sleep(self.init_timeout);
        tokio::pin!(init_deadline);

        loop {
            let flow = tokio::select! {
                _ = shutdown.cancelled() => Flow::Stop(Exit::Shutdown),

                _ = &mut init_deadline, if self.state == ConnectionState::Connecting => {
                    Flow::Stop(Exit::Close(
                        close_code::INIT_TIMEOUT,
                        "Connection initialisation timeout".to_string(),
                    ))
                }

                frame = socket.next() => match frame {
                    Some(Ok(frame)) => self.on_frame(frame, socket).await?,
                    Some(Err(e)) => {
                        debug!(connection = %self.id, error = %e, "read failed");
                        Flow::Stop(Exit::Disconnected)
                    }
                    None => Flow::Stop(Exit::Disconnected),
                },

                Some(event) = self.events_rx.recv() => {
                    self.on_event(event, socket).await?;
                    Flow::Continue
                }
            };

            if let Flow::Stop(exit) = flow {
                return Ok(exit);
            }
        }
    }

    async fn on_frame<S>(&mut self, frame: WsMessage, socket: &mut S) -> Result<Flow, TransportError>
    where
        S: Sink<WsMessage, Error = tungstenite::Error> + Unpin,
    {
        let text = match frame {
            WsMessage::Text(text) => text,
            WsMessage::Close(_) => return Ok(Flow::Stop(Exit::PeerClosed)),
            WsMessage::Binary(_) => {
                return Ok(Flow::Stop(Exit::Close(
                    close_code::INVALID_MESSAGE,
                    "Binary frames are not supported".to_string(),
                )));
            }
            // control frames are answered by tungstenite itself
            _ => return Ok(Flow::Continue),
        };

        let message = match serde_json::from_str::<ClientMessage>(text.as_str()) {
            Ok(message) => message,
            Err(e) => {
                debug!(connection = %self.id, error = %e, "invalid client message");
                return Ok(Flow::Stop(Exit::Close(
                    close_code::INVALID_MESSAGE,
                    "Invalid message received".to_string(),
                )));
            }
        };

        match message {
            ClientMessage::ConnectionInit { .. } => {
                if self.state != ConnectionState::Connecting {
                    return Ok(Flow::Stop(Exit::Close(
                        close_code::TOO_MANY_INIT_REQUESTS,
                        "Too many initialisation requests".to_string(),
                    )));
                }
                self.state = ConnectionState::Accepted;
                self.write(socket, to_frame(&ServerMessage::ConnectionAck { payload: None })?)
                    .await?;
                debug!(connection = %self.id, "connection acknowledged");
            }

            ClientMessage::Ping { payload } => {
                self.write(socket, to_frame(&ServerMessage::Pong { payload })?)
                    .await?;
            }

            ClientMessage::Pong { .. } => {}

            ClientMessage::Subscribe { id, payload } => {
                if self.state == ConnectionState::Connecting {
                    return Ok(Flow::Stop(Exit::Close(
                        close_code::UNAUTHORIZED,
                        "Unauthorized".to_string(),
                    )));
                }
                if self.operations.contains_key(&id) {
                    return Ok(Flow::Stop(Exit::Close(
                        close_code::SUBSCRIBER_ALREADY_EXISTS,
                        format!("Subscriber for {id} already exists"),
                    )));
                }
                self.start_operation(id, payload);
            }

            ClientMessage::Complete { id } => {
                if let Some(operation) = self.operations.remove(&id) {
                    operation.task.abort();
                    debug!(connection = %self.id, operation = %id, "operation completed by client");
                    self.refresh_state();
                }
            }
        }

        Ok(Flow::Continue)
    }

    fn start_operation(&mut self, id: String, payload: OperationPayload) {
        let serial = self.next_serial;
        self.next_serial += 1;

        let request = payload.into_request().data(self.context.clone());
        let mut results = self.schema.execute_stream(request);
        let events = self.events_tx.clone();
        let operation_id = id.clone();

        let task = tokio::spawn(async move {
            let id = operation_id;
            let mut first = true;
            while let Some(response) = results.next().await {
                let event = if first && is_request_error(&response) {
                    let errors = response.errors.iter().map(error_to_json).collect();
                    let _ = events.send(OperationEvent::Failed { id, serial, errors }).await;
                    return;
                } else {
                    OperationEvent::Next {
                        id: id.clone(),
                        serial,
                        payload: response_to_json(&response),
                    }
                };
                first = false;
                if events.send(event).await.is_err() {
                    return;
                }
            }
            let _ = events.send(OperationEvent::Completed { id, serial }).await;
        });

        debug!(connection = %self.id, operation = %id, "operation started");
        self.operations.insert(id, Operation { serial, task });
        self.refresh_state();
    }

    async fn on_event<S>(&mut self, event: OperationEvent, socket: &mut S) -> Result<(), TransportError>
    where
        S: Sink<WsMessage, Error = tungstenite::Error> + Unpin,
    {
        let (id, serial) = match &event {
            OperationEvent::Next { id, serial, .. }
            | OperationEvent::Failed { id, serial, .. }
            | OperationEvent::Completed { id, serial } => (id.clone(), *serial),
        };
        if self.operations.get(&id).is_none_or(|op| op.serial != serial) {
            // completed by the client while this result was queued
            return Ok(());
        }

        let message = match event {
            OperationEvent::Next { id, payload, .. } => ServerMessage::Next { id, payload },
            OperationEvent::Failed { id, errors, .. } => {
                self.operations.remove(&id);
                ServerMessage::Error { id, payload: errors }
            }
            OperationEvent::Completed { id, .. } => {
                self.operations.remove(&id);
                ServerMessage::Complete { id }
            }
        };
        self.refresh_state();
        self.write(socket, to_frame(&message)?).await
    }

    /// Send one frame, giving up once the write timeout elapses.
    async fn write<S>(&self, socket: &mut S, frame: WsMessage) -> Result<(), TransportError>
    where
        S: Sink<WsMessage, Error = tungstenite::Error> + Unpin,
    {
        match timeout(self.write_timeout, socket.send(frame)).await {
            Ok(sent) => Ok(sent?),
            Err(_) => Err(TransportError::WriteTimeout(self.write_timeout)),
        }
    }

    /// Abort every forwarding task and return the ids that were still active.
    fn cancel_all(&mut self) -> Vec<String> {
        let mut ids: Vec<String> = Vec::with_capacity(self.operations.len());
        for (id, operation) in self.operations.drain() {
            operation.task.abort();
            ids.push(id);
        }
        ids.sort();
        if !ids.is_empty() {
            debug!(connection = %self.id, operations = ids.len(), "operations cancelled");
        }
        ids
    }

    async fn finish<S>(&mut self, socket: &mut S, exit: Exit, cancelled: Vec<String>) -> Result<(), TransportError>
    where
        S: Stream<Item = Result<WsMessage, tungstenite::Error>>
            + Sink<WsMessage, Error = tungstenite::Error>
            + Unpin,
    {
        let (code, reason) = match exit {
            Exit::Disconnected => return Ok(()),
            Exit::PeerClosed => {
                // flushes the close reply tungstenite queued on receipt
                match timeout(self.write_timeout, socket.close()).await {
                    Ok(Err(e)) => debug!(connection = %self.id, error = %e, "close reply failed"),
                    Err(_) => debug!(connection = %self.id, "close reply timed out"),
                    Ok(Ok(())) => {}
                }
                return Ok(());
            }
            Exit::Close(code, reason) => (code, reason),
            Exit::Shutdown => {
                for id in cancelled {
                    self.write(socket, to_frame(&ServerMessage::Complete { id })?)
                        .await?;
                }
                (close_code::GOING_AWAY, "Server shutting down".to_string())
            }
        };

        info!(connection = %self.id, code, reason = %reason, "closing connection");
        self.write(socket, close_frame(code, &reason)).await?;

        // wait for the peer's close reply so the close handshake completes
        let _ = timeout(CLOSE_GRACE, async {
            while let Some(Ok(_)) = socket.next().await {}
        })
        .await;
        Ok(())
    }

    fn refresh_state(&mut self) {
        if matches!(
            self.state,
            ConnectionState::Accepted | ConnectionState::Subscribed(_)
        ) {
            self.state = match self.operations.len() {
                0 => ConnectionState::Accepted,
                n => ConnectionState::Subscribed(n),
            };
        }
    }
}

/// Whether a first result means the operation never started.
///
/// Parse and validation errors carry no path; a failing subscribe step is
/// reported against the root field alone. Errors raised while resolving the
/// fields of an event sit deeper in the path and travel as `next`.
pub(crate) fn is_request_error(response: &Response) -> bool {
    response.data == async_graphql::Value::Null
        && response.is_err()
        && response.errors.iter().all(|error| error.path.len() <= 1)
}

fn response_to_json(response: &Response) -> Value {
    serde_json::to_value(response).unwrap_or_else(|e| json!({ "errors": [{ "message": e.to_string() }] }))
}

fn error_to_json(error: &async_graphql::ServerError) -> Value {
    serde_json::to_value(error).unwrap_or_else(|_| json!({ "message": error.message }))
}
