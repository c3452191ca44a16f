//! Sessions over stdio against a spawned `querywire serve --stdio`
//!
//! Cargo injects `CARGO_BIN_EXE_querywire` for integration tests, so the
//! child is always the freshly built binary.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use querywire::mcp::reconnect::ReconnectPolicy;
use querywire::mcp::session::{ClientOptions, McpClient};
use querywire::mcp::transport::stdio::StdioConnector;

mod common;

fn stdio_client(db: &Path) -> McpClient {
    let connector = StdioConnector::new(
        env!("CARGO_BIN_EXE_querywire"),
        vec![
            "serve".to_string(),
            "--stdio".to_string(),
            "--database".to_string(),
            db.display().to_string(),
        ],
    )
    .env("RUST_LOG", "querywire=debug");

    let options = ClientOptions {
        request_timeout: Duration::from_secs(10),
        reconnect: ReconnectPolicy::new(0, Duration::from_millis(100)),
    };
    McpClient::new(Arc::new(connector), options)
}

#[tokio::test]
async fn test_stdio_session_lists_and_calls_tools() {
    let (_tmp, db) = common::seeded_database();
    let client = stdio_client(&db);

    client.connect().await.unwrap();
    let init = client.initialize().await.unwrap();
    assert_eq!(init.protocol_version, "2024-11-05");

    let tools = client.list_tools().await.unwrap();
    assert_eq!(tools.len(), 3);

    let out = client
        .call_tool(
            "execute_query",
            json!({"query": "SELECT nombre FROM clientes ORDER BY id"}),
        )
        .await
        .unwrap();
    assert_eq!(
        out.result.payload().unwrap(),
        json!({"rowCount": 2, "rows": [{"nombre": "Ana"}, {"nombre": "Luis"}]})
    );

    client.disconnect();
}

#[tokio::test]
async fn test_stdio_session_rejects_writes() {
    let (_tmp, db) = common::seeded_database();
    let client = stdio_client(&db);
    client.connect().await.unwrap();

    let err = client
        .call_tool(
            "execute_query",
            json!({"query": "UPDATE clientes SET nombre = 'x'"}),
        )
        .await
        .unwrap_err();
    assert!(err.to_string().contains("read-only"));

    client.disconnect();
}

#[tokio::test]
async fn test_missing_executable_fails_to_connect() {
    let connector = StdioConnector::new("/nonexistent/querywire", vec![]);
    let client = McpClient::new(Arc::new(connector), ClientOptions::default());
    assert!(client.connect().await.is_err());
    assert!(!client.is_connected());
}
