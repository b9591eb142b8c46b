use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::debug;
use tungstenite::Message as WsMessage;
use tungstenite::client::IntoClientRequest;
use tungstenite::http::HeaderValue;
use tungstenite::http::header::SEC_WEBSOCKET_PROTOCOL;

use crate::transport::message::{
    ClientMessage, OperationPayload, PROTOCOL, ServerMessage, to_frame,
};
use crate::utils::error::ClientError;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// A `graphql-transport-ws` client speaking to one server connection.
///
/// Operation ids are generated per client (`"1"`, `"2"`, ...). Server pings are
/// answered transparently while waiting for messages.
pub struct FeedClient {
    socket: Socket,
    next_id: u64,
}

impl FeedClient {
    /// Open the socket, send `connection_init` and wait for `connection_ack`.
    pub async fn connect(url: &str) -> Result<Self, ClientError> {
        let mut client = Self::open(url).await?;
        client.init().await?;
        Ok(client)
    }

    /// Open the socket with the protocol negotiated but without initialising it.
    pub async fn open(url: &str) -> Result<Self, ClientError> {
        let mut request = url.into_client_request()?;
        request
            .headers_mut()
            .insert(SEC_WEBSOCKET_PROTOCOL, HeaderValue::from_static(PROTOCOL));
        let (socket, _response) = connect_async(request).await?;
        debug!(url, "connected");
        Ok(Self { socket, next_id: 1 })
    }

    pub async fn init(&mut self) -> Result<(), ClientError> {
        self.send(&ClientMessage::ConnectionInit { payload: None })
            .await?;
        match self.next_message().await? {
            ServerMessage::ConnectionAck { .. } => Ok(()),
            other => Err(ClientError::Unexpected(format!("{other:?}"))),
        }
    }

    /// Start an operation and return its id.
    pub async fn subscribe(&mut self, payload: OperationPayload) -> Result<String, ClientError> {
        let id = self.next_id.to_string();
        self.next_id += 1;
        self.subscribe_with_id(&id, payload).await?;
        Ok(id)
    }

    pub async fn subscribe_with_id(
        &mut self,
        id: &str,
        payload: OperationPayload,
    ) -> Result<(), ClientError> {
        self.send(&ClientMessage::Subscribe {
            id: id.to_string(),
            payload,
        })
        .await
    }

    /// Stop an operation. The server sends nothing more for `id`.
    pub async fn complete(&mut self, id: &str) -> Result<(), ClientError> {
        self.send(&ClientMessage::Complete { id: id.to_string() })
            .await
    }

    pub async fn ping(&mut self) -> Result<(), ClientError> {
        self.send(&ClientMessage::Ping { payload: None }).await
    }

    /// Run a single-result operation (query or mutation) and return its
    /// `{data, errors?}` payload.
    pub async fn execute(&mut self, payload: OperationPayload) -> Result<Value, ClientError> {
        let id = self.subscribe(payload).await?;
        let mut result = None;
        loop {
            match self.next_message().await? {
                ServerMessage::Next { id: got, payload } if got == id => result = Some(payload),
                ServerMessage::Error { id: got, payload } if got == id => {
                    return Err(ClientError::Operation {
                        id,
                        message: error_messages(&payload),
                    });
                }
                ServerMessage::Complete { id: got } if got == id => {
                    return result.ok_or_else(|| {
                        ClientError::Unexpected(format!("operation {id} completed without a result"))
                    });
                }
                _ => {}
            }
        }
    }

    pub async fn send(&mut self, message: &ClientMessage) -> Result<(), ClientError> {
        self.socket.send(to_frame(message)?).await?;
        Ok(())
    }

    /// Send an arbitrary frame, bypassing the protocol encoding.
    pub async fn send_raw(&mut self, frame: WsMessage) -> Result<(), ClientError> {
        self.socket.send(frame).await?;
        Ok(())
    }

    /// Wait for the next protocol message.
    ///
    /// A close frame from the server becomes [`ClientError::Closed`] carrying
    /// its code.
    pub async fn next_message(&mut self) -> Result<ServerMessage, ClientError> {
        loop {
            let frame = match self.socket.next().await {
                Some(frame) => frame?,
                None => {
                    return Err(ClientError::Closed {
                        code: None,
                        reason: String::new(),
                    });
                }
            };
            match frame {
                WsMessage::Text(text) => match serde_json::from_str(text.as_str())? {
                    ServerMessage::Ping { payload } => {
                        self.send(&ClientMessage::Pong { payload }).await?
                    }
                    message => return Ok(message),
                },
                WsMessage::Close(frame) => {
                    let (code, reason) = match frame {
                        Some(frame) => (Some(u16::from(frame.code)), frame.reason.as_str().to_string()),
                        None => (None, String::new()),
                    };
                    return Err(ClientError::Closed { code, reason });
                }
                WsMessage::Binary(_) => {
                    return Err(ClientError::Unexpected("binary frame".to_string()));
                }
                _ => {}
            }
        }
    }

    /// Close the socket with a normal close frame.
    pub async fn close(mut self) -> Result<(), ClientError> {
        self.socket.close(None).await?;
        Ok(())
    }
}

fn error_messages(errors: &[Value]) -> String {
    errors
        .iter()
        .map(|e| {
            e.get("message")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| e.to_string())
        })
        .collect::<Vec<_>>()
        .join("; ")
}
