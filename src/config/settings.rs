use serde::Deserialize;

/// Top-level configuration settings for the application.
///
/// Includes settings for the listener, the relational store, the topic bus and
/// the subscription transport.
#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub store: StoreSettings,
    pub broker: BrokerSettings,
    pub transport: TransportSettings,
}

/// Configuration settings for the server.
///
/// Defines the host and port the server will bind to and the single path
/// serving both HTTP operations and WebSocket subscriptions.
#[derive(Debug, Deserialize, Clone)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    pub path: String,
}

/// Configuration settings for the relational store.
#[derive(Debug, Deserialize, Clone)]
pub struct StoreSettings {
    /// SQLite connection string, e.g. `sqlite://chat.db`. Required.
    pub database_url: String,
    /// Pool size shared by every concurrent resolver.
    pub max_connections: u32,
}

/// Configuration settings for the topic bus.
#[derive(Debug, Deserialize, Clone)]
pub struct BrokerSettings {
    /// Events buffered per subscriber before the oldest one is dropped.
    pub subscriber_queue_capacity: usize,
}

/// Configuration settings for the HTTP/WebSocket transport.
#[derive(Debug, Deserialize, Clone)]
pub struct TransportSettings {
    pub connection_init_timeout_ms: u64,
    /// Results buffered per connection between operation streams and the socket writer.
    pub outbound_buffer: usize,
    pub max_body_bytes: usize,
    /// Longest a single socket write may take before the peer is dropped.
    pub write_timeout_ms: u64,
    /// Value of `Access-Control-Allow-Origin`; `*` allows any origin.
    pub cors_allow_origin: String,
}

/// Partial configuration settings loaded from files or environment.
///
/// Allows partial specification of settings. Missing values are filled using defaults.
#[derive(Debug, Deserialize)]
pub struct PartialSettings {
    pub server: Option<PartialServerSettings>,
    pub store: Option<PartialStoreSettings>,
    pub broker: Option<PartialBrokerSettings>,
    pub transport: Option<PartialTransportSettings>,
}

#[derive(Debug, Deserialize)]
pub struct PartialServerSettings {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub path: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PartialStoreSettings {
    pub database_url: Option<String>,
    pub max_connections: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct PartialBrokerSettings {
    pub subscriber_queue_capacity: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct PartialTransportSettings {
    pub connection_init_timeout_ms: Option<u64>,
    pub outbound_buffer: Option<usize>,
    pub max_body_bytes: Option<usize>,
    pub write_timeout_ms: Option<u64>,
    pub cors_allow_origin: Option<String>,
}

/// Provides default values for `Settings`.
///
/// Every value has a default except the database URL, which must come from the
/// environment or a config file.
impl Default for Settings {
    fn default() -> Self {
        Self {
            server: ServerSettings {
                host: "0.0.0.0".to_string(),
                port: 4000,
                path: "/graphql".to_string(),
            },
            store: StoreSettings {
                database_url: String::new(),
                max_connections: 5,
            },
            broker: BrokerSettings {
                subscriber_queue_capacity: 256,
            },
            transport: TransportSettings {
                connection_init_timeout_ms: 3_000,
                outbound_buffer: 64,
                max_body_bytes: 1024 * 1024,
                write_timeout_ms: 5_000,
                cors_allow_origin: "*".to_string(),
            },
        }
    }
}

impl Settings {
    /// `host:port` string handed to the listener.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    pub(crate) fn merge(partial: PartialSettings) -> Self {
        let default = Settings::default();
        let server = partial.server;
        let store = partial.store;
        let broker = partial.broker;
        let transport = partial.transport;

        Settings {
            server: ServerSettings {
                host: server
                    .as_ref()
                    .and_then(|s| s.host.clone())
                    .unwrap_or(default.server.host),
                port: server
                    .as_ref()
                    .and_then(|s| s.port)
                    .unwrap_or(default.server.port),
                path: server
                    .as_ref()
                    .and_then(|s| s.path.clone())
                    .unwrap_or(default.server.path),
            },
            store: StoreSettings {
                database_url: store
                    .as_ref()
                    .and_then(|s| s.database_url.clone())
                    .unwrap_or(default.store.database_url),
                max_connections: store
                    .as_ref()
                    .and_then(|s| s.max_connections)
                    .unwrap_or(default.store.max_connections),
            },
            broker: BrokerSettings {
                subscriber_queue_capacity: broker
                    .as_ref()
                    .and_then(|b| b.subscriber_queue_capacity)
                    .unwrap_or(default.broker.subscriber_queue_capacity),
            },
            transport: TransportSettings {
                connection_init_timeout_ms: transport
                    .as_ref()
                    .and_then(|t| t.connection_init_timeout_ms)
                    .unwrap_or(default.transport.connection_init_timeout_ms),
                outbound_buffer: transport
                    .as_ref()
                    .and_then(|t| t.outbound_buffer)
                    .unwrap_or(default.transport.outbound_buffer),
                max_body_bytes: transport
                    .as_ref()
                    .and_then(|t| t.max_body_bytes)
                    .unwrap_or(default.transport.max_body_bytes),
                write_timeout_ms: transport
                    .as_ref()
                    .and_then(|t| t.write_timeout_ms)
                    .unwrap_or(default.transport.write_timeout_ms),
                cors_allow_origin: transport
                    .as_ref()
                    .and_then(|t| t.cors_allow_origin.clone())
                    .unwrap_or(default.transport.cors_allow_origin),
            },
        }
    }
}
