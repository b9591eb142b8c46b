use tempfile::TempDir;

use crate::config::StoreSettings;
use crate::persistence::Store;

/// A store on a fresh SQLite file. Keep the `TempDir` alive for the test's duration.
pub(crate) async fn temp_store() -> (Store, TempDir) {
    let dir = tempfile::tempdir().expect("create temp dir");
    let settings = StoreSettings {
        database_url: format!("sqlite://{}", dir.path().join("feed.db").display()),
        max_connections: 4,
    };
    let store = Store::connect(&settings).await.expect("connect store");
    (store, dir)
}
