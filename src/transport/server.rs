//! Listener and connection supervision
//!
//! One TCP listener serves both the request gateway and the subscription
//! transport on `server.path`. Every accepted socket runs as a hyper HTTP/1
//! connection inside a [`TaskTracker`]; WebSocket upgrades are handed to a
//! [`Connection`] spawned into the same tracker. Requests pass through a
//! [`CorsLayer`] first, which answers preflights and tags responses with the
//! configured allowed origin.
//!
//! Shutdown: once the signal future resolves the accept loop stops, the shared
//! [`CancellationToken`] is cancelled (HTTP connections finish their in-flight
//! exchange, WebSocket connections complete their operations and close with
//! 1001), and `serve` returns after every tracked task has ended.

use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::SinkExt;
use hyper::body::Incoming;
use hyper::header::{self, HeaderMap, HeaderValue};
use hyper::server::conn::http1;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use hyper_util::service::TowerToHyperService;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::WebSocketStream;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tower::ServiceBuilder;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tracing::{debug, info, warn};
use tungstenite::handshake::derive_accept_key;
use tungstenite::protocol::Role;

use crate::broker::EventBus;
use crate::config::{Settings, TransportSettings};
use crate::persistence::Store;
use crate::schema::{ExecutionContext, FeedSchema};
use crate::transport::connection::Connection;
use crate::transport::http::{self as gateway, HttpResponse};
use crate::transport::message::{PROTOCOL, close_code, close_frame};
use crate::utils::error::Error;

/// Handles shared by every connection. Cheap to clone.
#[derive(Clone)]
pub struct ServerState {
    schema: FeedSchema,
    store: Store,
    bus: EventBus,
    settings: Arc<Settings>,
}

impl ServerState {
    pub fn new(schema: FeedSchema, store: Store, bus: EventBus, settings: Settings) -> Self {
        Self {
            schema,
            store,
            bus,
            settings: Arc::new(settings),
        }
    }

    pub fn schema(&self) -> &FeedSchema {
        &self.schema
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// A fresh execution context for one request or one connection.
    pub fn context(&self) -> ExecutionContext {
        ExecutionContext::new(self.store.clone(), self.bus.clone())
    }
}

pub struct Server {
    listener: TcpListener,
    state: ServerState,
    cors: CorsLayer,
    tracker: TaskTracker,
    shutdown: CancellationToken,
}

impl Server {
    /// Bind the listener on `server.host:server.port`.
    pub async fn bind(state: ServerState) -> Result<Self, Error> {
        let cors = cors_layer(&state.settings.transport)?;
        let addr = state.settings.bind_addr();
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| Error::Bind { addr, source })?;
        Ok(Self {
            listener,
            state,
            cors,
            tracker: TaskTracker::new(),
            shutdown: CancellationToken::new(),
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept connections until `signal` resolves, then drain them.
    pub async fn serve<F>(self, signal: F)
    where
        F: Future<Output = ()>,
    {
        let path = &self.state.settings.server.path;
        match self.local_addr() {
            Ok(addr) => info!("listening on http://{addr}{path} (ws://{addr}{path})"),
            Err(e) => warn!(error = %e, "listening on an unknown address"),
        }

        tokio::pin!(signal);
        loop {
            tokio::select! {
                _ = &mut signal => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => self.spawn_connection(stream, peer),
                    Err(e) => warn!(error = %e, "accept failed"),
                },
            }
        }

        info!(
            connections = self.tracker.len(),
            "shutdown requested, draining connections"
        );
        self.shutdown.cancel();
        self.tracker.close();
        self.tracker.wait().await;
        drop(self.listener);
        info!("listener closed");
    }

    fn spawn_connection(&self, stream: TcpStream, peer: SocketAddr) {
        debug!(%peer, "accepted connection");
        let io = TokioIo::new(stream);
        let state = self.state.clone();
        let shutdown = self.shutdown.clone();
        let tracker = self.tracker.clone();
        let cors = self.cors.clone();

        self.tracker.spawn(async move {
            let service = {
                let shutdown = shutdown.clone();
                ServiceBuilder::new()
                    .layer(cors)
                    .service(tower::service_fn(move |req| {
                        let state = state.clone();
                        let shutdown = shutdown.clone();
                        let tracker = tracker.clone();
                        async move { Ok::<_, Infallible>(route(req, state, shutdown, tracker).await) }
                    }))
            };
            let service = TowerToHyperService::new(service);

            let conn = http1::Builder::new()
                .serve_connection(io, service)
                .with_upgrades();
            tokio::pin!(conn);

            tokio::select! {
                result = conn.as_mut() => {
                    if let Err(e) = result {
                        debug!(%peer, error = %e, "http connection ended with error");
                    }
                }
                _ = shutdown.cancelled() => {
                    conn.as_mut().graceful_shutdown();
                    if let Err(e) = conn.await {
                        debug!(%peer, error = %e, "http connection ended with error during shutdown");
                    }
                }
            }
        });
    }
}

/// Cross-origin policy for browser clients of the request gateway.
fn cors_layer(settings: &TransportSettings) -> Result<CorsLayer, Error> {
    let origin = match settings.cors_allow_origin.trim() {
        "*" => AllowOrigin::any(),
        origin => HeaderValue::from_str(origin)
            .map(AllowOrigin::exact)
            .map_err(|_| Error::InvalidOrigin(origin.to_string()))?,
    };
    Ok(CorsLayer::new()
        .allow_origin(origin)
        .allow_methods([Method::POST, Method::OPTIONS])
        .allow_headers(Any))
}

async fn route(
    req: Request<Incoming>,
    state: ServerState,
    shutdown: CancellationToken,
    tracker: TaskTracker,
) -> HttpResponse {
    if req.uri().path() != state.settings.server.path {
        return gateway::not_found();
    }
    if is_websocket_upgrade(&req) {
        return upgrade(req, state, shutdown, &tracker);
    }
    if req.method() != Method::POST {
        return gateway::method_not_allowed();
    }
    gateway::execute(req, &state).await
}

fn is_websocket_upgrade(req: &Request<Incoming>) -> bool {
    let headers = req.headers();
    req.method() == Method::GET
        && header_has_token(headers, header::CONNECTION, "upgrade")
        && header_has_token(headers, header::UPGRADE, "websocket")
}

fn header_has_token(headers: &HeaderMap, name: header::HeaderName, token: &str) -> bool {
    headers
        .get_all(name)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .any(|candidate| candidate.trim().eq_ignore_ascii_case(token))
}

/// Answer the upgrade with `101` and run the protocol on the upgraded socket.
///
/// A client that does not offer `graphql-transport-ws` is still upgraded, then
/// closed with 4406.
fn upgrade(
    mut req: Request<Incoming>,
    state: ServerState,
    shutdown: CancellationToken,
    tracker: &TaskTracker,
) -> HttpResponse {
    let Some(key) = req.headers().get(header::SEC_WEBSOCKET_KEY) else {
        return gateway::error(StatusCode::BAD_REQUEST, "missing Sec-WebSocket-Key");
    };
    let Ok(accept) = HeaderValue::from_str(&derive_accept_key(key.as_bytes())) else {
        return gateway::error(StatusCode::BAD_REQUEST, "invalid Sec-WebSocket-Key");
    };
    let protocol_offered = header_has_token(req.headers(), header::SEC_WEBSOCKET_PROTOCOL, PROTOCOL);
    let on_upgrade = hyper::upgrade::on(&mut req);

    tracker.spawn(async move {
        let upgraded = match on_upgrade.await {
            Ok(upgraded) => upgraded,
            Err(e) => {
                warn!(error = %e, "websocket upgrade failed");
                return;
            }
        };
        let mut socket =
            WebSocketStream::from_raw_socket(TokioIo::new(upgraded), Role::Server, None).await;

        if !protocol_offered {
            warn!("client did not offer {PROTOCOL}, closing");
            let close = close_frame(close_code::SUBPROTOCOL_NOT_ACCEPTABLE, "Subprotocol not acceptable");
            if let Err(e) = socket.send(close).await {
                debug!(error = %e, "failed to send close frame");
            }
            return;
        }

        let connection = Connection::new(
            state.schema.clone(),
            state.context(),
            &state.settings.transport,
        );
        // errors are logged by the connection itself
        let _ = connection.run(socket, shutdown).await;
    });

    let mut response = Response::new(Default::default());
    *response.status_mut() = StatusCode::SWITCHING_PROTOCOLS;
    let headers = response.headers_mut();
    headers.insert(header::CONNECTION, HeaderValue::from_static("upgrade"));
    headers.insert(header::UPGRADE, HeaderValue::from_static("websocket"));
    headers.insert(header::SEC_WEBSOCKET_ACCEPT, accept);
    if protocol_offered {
        headers.insert(header::SEC_WEBSOCKET_PROTOCOL, HeaderValue::from_static(PROTOCOL));
    }
    response
}
