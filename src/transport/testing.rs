use std::net::SocketAddr;
use std::time::Duration;

use tempfile::TempDir;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};

use crate::broker::{EventBus, MESSAGE_POSTED};
use crate::config::Settings;
use crate::persistence::Store;
use crate::persistence::testing::temp_store;
use crate::schema::build_schema;
use crate::transport::{Server, ServerState};

/// A server on an ephemeral local port backed by a throwaway store.
pub(crate) struct TestServer {
    pub addr: SocketAddr,
    pub store: Store,
    pub bus: EventBus,
    stop: Option<oneshot::Sender<()>>,
    handle: JoinHandle<()>,
    _dir: TempDir,
}

impl TestServer {
    pub async fn start() -> Self {
        Self::start_with(|_| {}).await
    }

    pub async fn start_with(tweak: impl FnOnce(&mut Settings)) -> Self {
        let (store, dir) = temp_store().await;
        let bus = EventBus::new(64);

        let mut settings = Settings::default();
        settings.server.host = "127.0.0.1".to_string();
        settings.server.port = 0;
        tweak(&mut settings);

        let state = ServerState::new(build_schema(), store.clone(), bus.clone(), settings);
        let server = Server::bind(state).await.expect("bind test server");
        let addr = server.local_addr().expect("local addr");

        let (stop, stopped) = oneshot::channel();
        let handle = tokio::spawn(server.serve(async {
            let _ = stopped.await;
        }));

        Self {
            addr,
            store,
            bus,
            stop: Some(stop),
            handle,
            _dir: dir,
        }
    }

    pub fn http_url(&self) -> String {
        format!("http://{}/graphql", self.addr)
    }

    pub fn ws_url(&self) -> String {
        format!("ws://{}/graphql", self.addr)
    }

    /// Wait until `MESSAGE_POSTED` has exactly `expected` subscribers.
    pub async fn wait_for_subscribers(&self, expected: usize) {
        timeout(Duration::from_secs(5), async {
            while self.bus.subscriber_count(MESSAGE_POSTED) != expected {
                sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap_or_else(|_| {
            panic!(
                "expected {expected} subscribers, found {}",
                self.bus.subscriber_count(MESSAGE_POSTED)
            )
        });
    }

    /// Trigger graceful shutdown and wait for `serve` to return.
    pub async fn shutdown(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        timeout(Duration::from_secs(5), &mut self.handle)
            .await
            .expect("server did not shut down")
            .expect("server task panicked");
    }
}
