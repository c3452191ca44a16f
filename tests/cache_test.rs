//! Result cache behaviour, standalone and behind the dispatcher

use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use serde_json::json;

use querywire::cache::{month_bucket, CacheKey, ResultCache};
use querywire::mcp::session::{ClientOptions, McpClient};
use querywire::mcp::transport::tcp::TcpConnector;

mod common;
use common::TestServer;

#[tokio::test(start_paused = true)]
async fn test_monthly_sales_entry_expires_after_an_hour() {
    let cache = ResultCache::new(Duration::from_secs(3600));
    let key = CacheKey::new("ventas")
        .period("ultimo_mes")
        .dimension(month_bucket(NaiveDate::from_ymd_opt(2025, 9, 14).unwrap()))
        .build();
    assert_eq!(key, "ventas_ultimo_mes_2025-9");

    let stored = cache.set(key.clone(), json!({"total": 200.5}));
    let hit = cache.get(&key).unwrap();
    assert!(Arc::ptr_eq(&stored, &hit));

    tokio::time::advance(Duration::from_secs(3599)).await;
    assert!(cache.get(&key).is_some());

    tokio::time::advance(Duration::from_secs(2)).await;
    tokio::task::yield_now().await;
    assert!(cache.get(&key).is_none());
}

#[tokio::test(start_paused = true)]
async fn test_rewrite_restarts_the_clock() {
    let cache = ResultCache::new(Duration::from_secs(60));
    cache.set("k", json!(1));

    tokio::time::advance(Duration::from_secs(50)).await;
    cache.set("k", json!(2));

    tokio::time::advance(Duration::from_secs(20)).await;
    tokio::task::yield_now().await;
    assert_eq!(*cache.get("k").unwrap(), json!(2));

    tokio::time::advance(Duration::from_secs(41)).await;
    tokio::task::yield_now().await;
    assert!(cache.get("k").is_none());
}

async fn sales_total(client: &McpClient) -> serde_json::Value {
    let out = client
        .call_tool(
            "execute_query",
            json!({"query": "SELECT COUNT(*) AS n FROM ventas"}),
        )
        .await
        .unwrap();
    out.result.payload().unwrap()["rows"][0]["n"].clone()
}

#[tokio::test]
async fn test_dispatcher_serves_cached_tool_results() {
    let (_tmp, db) = common::seeded_database();
    let server = TestServer::start("127.0.0.1:0", &db, Some(Duration::from_secs(3600))).await;
    let client = McpClient::new(
        Arc::new(TcpConnector::new("127.0.0.1", server.addr.port())),
        ClientOptions::default(),
    );
    client.connect().await.unwrap();

    assert_eq!(sales_total(&client).await, 3);
    common::insert_sale(&db, 10.0);
    // Same tool and arguments: answered from the cache.
    assert_eq!(sales_total(&client).await, 3);

    client.disconnect();
    server.stop().await;
}

#[tokio::test]
async fn test_without_cache_results_are_fresh() {
    let (_tmp, db) = common::seeded_database();
    let server = TestServer::start("127.0.0.1:0", &db, None).await;
    let client = McpClient::new(
        Arc::new(TcpConnector::new("127.0.0.1", server.addr.port())),
        ClientOptions::default(),
    );
    client.connect().await.unwrap();

    assert_eq!(sales_total(&client).await, 3);
    common::insert_sale(&db, 10.0);
    assert_eq!(sales_total(&client).await, 4);

    client.disconnect();
    server.stop().await;
}
