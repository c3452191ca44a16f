use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use querywire::db::SqliteExecutor;
use querywire::mcp::server::{serve_tcp, Dispatcher};
use querywire::ResultCache;

/// Create `sales.db` in a fresh temp dir with `clientes` and `ventas`.
#[allow(dead_code)]
pub fn seeded_database() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().expect("failed to create tempdir");
    let path = tmp.path().join("sales.db");
    let conn = rusqlite::Connection::open(&path).expect("failed to create database");
    conn.execute_batch(
        "CREATE TABLE clientes (id INTEGER PRIMARY KEY, nombre VARCHAR(50) NOT NULL);
         CREATE TABLE ventas (
             id INTEGER PRIMARY KEY,
             cliente_id INTEGER NOT NULL,
             total REAL,
             fecha TEXT
         );
         INSERT INTO clientes (id, nombre) VALUES (1, 'Ana'), (2, 'Luis');
         INSERT INTO ventas (cliente_id, total, fecha) VALUES
             (1, 120.5, '2025-09-02'),
             (2, 80.0, '2025-09-15'),
             (1, 42.0, '2025-08-30');",
    )
    .expect("failed to seed database");
    (tmp, path)
}

/// Insert one more sale behind the server's back.
#[allow(dead_code)]
pub fn insert_sale(db: &Path, total: f64) {
    let conn = rusqlite::Connection::open(db).expect("failed to open database");
    conn.execute(
        "INSERT INTO ventas (cliente_id, total, fecha) VALUES (2, ?1, '2025-09-20')",
        [total],
    )
    .expect("failed to insert sale");
}

/// A running TCP server.
#[allow(dead_code)]
pub struct TestServer {
    pub addr: SocketAddr,
    pub shutdown: CancellationToken,
    pub handle: JoinHandle<anyhow::Result<()>>,
}

#[allow(dead_code)]
impl TestServer {
    /// Start a server on `addr` (port 0 for any) backed by `db`.
    pub async fn start(addr: &str, db: &Path, cache_ttl: Option<Duration>) -> Self {
        let executor = Arc::new(SqliteExecutor::open(db).expect("failed to open database"));
        let mut dispatcher = Dispatcher::new(executor);
        if let Some(ttl) = cache_ttl {
            dispatcher = dispatcher.with_cache(Arc::new(ResultCache::new(ttl)));
        }

        let listener = TcpListener::bind(addr).await.expect("failed to bind");
        let addr = listener.local_addr().expect("no local address");
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(serve_tcp(
            listener,
            Arc::new(dispatcher),
            shutdown.clone(),
        ));

        Self {
            addr,
            shutdown,
            handle,
        }
    }

    pub async fn stop(self) {
        self.shutdown.cancel();
        let _ = self.handle.await;
    }
}

#[allow(dead_code)]
pub fn temp_config_file(contents: &str) -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().expect("failed to create tempdir");
    let config_path = temp_dir.path().join("querywire.yaml");
    fs::write(&config_path, contents).expect("failed to write config file");
    (temp_dir, config_path)
}
