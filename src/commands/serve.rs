//! `serve` command handler

use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::cache::ResultCache;
use crate::config::Config;
use crate::db::sqlite::SqliteExecutor;
use crate::db::QueryExecutor;
use crate::error::{QuerywireError, Result};
use crate::mcp::server::{serve_stdio, serve_tcp, Dispatcher};

/// Build the dispatcher described by `config` around `executor`.
///
/// Returns the cache too so the caller can stop its timers on shutdown.
pub fn build_dispatcher(
    config: &Config,
    executor: Arc<dyn QueryExecutor>,
) -> (Dispatcher, Option<Arc<ResultCache>>) {
    let mut dispatcher =
        Dispatcher::new(executor).with_max_concurrent_queries(config.server.max_concurrent_queries);

    let cache = config.server.cache_enabled.then(|| {
        Arc::new(ResultCache::new(Duration::from_secs(
            config.server.cache_ttl_secs,
        )))
    });
    if let Some(cache) = &cache {
        dispatcher = dispatcher.with_cache(Arc::clone(cache));
    }

    (dispatcher, cache)
}

/// Run the server until Ctrl-C (TCP) or end of input (stdio).
///
/// # Errors
///
/// Fails if the database cannot be opened or the listener cannot bind.
pub async fn run_serve(config: Config, stdio: bool) -> Result<()> {
    let executor: Arc<dyn QueryExecutor> = Arc::new(SqliteExecutor::open(&config.database.path)?);
    let (dispatcher, cache) = build_dispatcher(&config, executor);
    let dispatcher = Arc::new(dispatcher);

    let result = if stdio {
        tracing::info!("Serving on stdio");
        serve_stdio(dispatcher).await
    } else {
        let addr = format!("{}:{}", config.server.bind_host, config.server.port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| QuerywireError::Transport(format!("Cannot bind {}: {}", addr, e)))?;

        let shutdown = CancellationToken::new();
        let trigger = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Shutdown requested");
                trigger.cancel();
            }
        });

        serve_tcp(listener, dispatcher, shutdown).await
    };

    if let Some(cache) = cache {
        cache.shutdown();
    }
    result
}
