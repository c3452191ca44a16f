//! JSON-RPC server and method dispatcher
//!
//! [`Dispatcher`] owns everything a request handler may touch: the tool
//! registry, the prompt catalog, the query executor, the optional result
//! cache, and the semaphore that bounds concurrent database work. It is
//! shared by every connection behind an [`Arc`].
//!
//! [`serve_connection`] runs one connection over any duplex byte stream:
//! each inbound request is handled in its own task so a slow tool never
//! blocks later requests, and responses are written back as they complete.
//! [`serve_tcp`] and [`serve_stdio`] are thin adapters over it.

use std::sync::Arc;

use chrono::Utc;
use futures::{SinkExt, StreamExt};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, Semaphore, SemaphorePermit};
use tokio_stream::wrappers::TcpListenerStream;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::cache::{month_bucket, CacheKey, ResultCache};
use crate::db::QueryExecutor;
use crate::error::{QuerywireError, Result};
use crate::mcp::codec::{Frame, FrameCodec};
use crate::mcp::types::{
    CallToolParams, CallToolResult, GetPromptParams, Implementation, InitializeParams,
    InitializeResult, JsonRpcError, JsonRpcRequest, JsonRpcResponse, ListPromptsResult,
    ListResourcesResult, ListToolsResult, Message, ReadResourceParams, ReadResourceResult,
    Resource, ResourceContents, ServerCapabilities, METHOD_INITIALIZE, METHOD_INITIALIZED,
    METHOD_PING, METHOD_PROMPTS_GET, METHOD_PROMPTS_LIST, METHOD_RESOURCES_LIST,
    METHOD_RESOURCES_READ, METHOD_TOOLS_CALL, METHOD_TOOLS_LIST, PROTOCOL_VERSION,
};
use crate::prompts::PromptCatalog;
use crate::tools::{ToolHandler, ToolRegistry};

/// Default cap on concurrent database work (tool calls and resource reads).
pub const DEFAULT_MAX_CONCURRENT_QUERIES: usize = 8;

const TABLES_URI: &str = "schema://tables";
const JSON_MIME: &str = "application/json";

type HandlerResult = std::result::Result<Value, JsonRpcError>;

/// Convert a handler failure into the error sent to the caller.
///
/// Protocol faults (bad arguments, unknown prompt) become `-32602`; every
/// other failure becomes `-32000` carrying the underlying message.
fn to_rpc_error(err: anyhow::Error) -> JsonRpcError {
    match err.downcast_ref::<QuerywireError>() {
        Some(QuerywireError::Protocol(msg)) => JsonRpcError::invalid_params(msg.clone()),
        Some(QuerywireError::Query(msg) | QuerywireError::Handler(msg)) => {
            JsonRpcError::handler(msg.clone())
        }
        _ => JsonRpcError::handler(err.to_string()),
    }
}

fn parse_params<T: DeserializeOwned>(method: &str, params: Value) -> std::result::Result<T, JsonRpcError> {
    serde_json::from_value(params)
        .map_err(|e| JsonRpcError::invalid_params(format!("Invalid params for {method}: {e}")))
}

fn to_result<T: serde::Serialize>(value: T) -> HandlerResult {
    serde_json::to_value(value).map_err(|e| JsonRpcError::internal(e.to_string()))
}

/// Routes requests to their handlers.
pub struct Dispatcher {
    tools: ToolRegistry,
    prompts: PromptCatalog,
    executor: Arc<dyn QueryExecutor>,
    cache: Option<Arc<ResultCache>>,
    permits: Arc<Semaphore>,
    max_concurrent: usize,
    server_info: Implementation,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("tools", &self.tools)
            .field("cache", &self.cache.is_some())
            .field("max_concurrent", &self.max_concurrent)
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    /// Dispatcher with the three query tools, the built-in prompts, no
    /// cache, and the default concurrency cap.
    pub fn new(executor: Arc<dyn QueryExecutor>) -> Self {
        Self {
            tools: ToolRegistry::with_query_tools(Arc::clone(&executor)),
            prompts: PromptCatalog::builtin(),
            executor,
            cache: None,
            permits: Arc::new(Semaphore::new(DEFAULT_MAX_CONCURRENT_QUERIES)),
            max_concurrent: DEFAULT_MAX_CONCURRENT_QUERIES,
            server_info: Implementation::querywire(),
        }
    }

    /// Cache successful tool results in `cache`.
    pub fn with_cache(mut self, cache: Arc<ResultCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Allow at most `limit` tool calls and resource reads to touch the
    /// database at once (minimum 1).
    pub fn with_max_concurrent_queries(mut self, limit: usize) -> Self {
        let limit = limit.max(1);
        self.permits = Arc::new(Semaphore::new(limit));
        self.max_concurrent = limit;
        self
    }

    /// Register an additional tool.
    pub fn with_tool(mut self, handler: Arc<dyn ToolHandler>) -> Self {
        self.tools.register(handler);
        self
    }

    pub fn with_prompts(mut self, prompts: PromptCatalog) -> Self {
        self.prompts = prompts;
        self
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    /// Handle one request and build its response. Never fails: every error
    /// becomes an error response for the request's id.
    pub async fn handle_request(&self, req: JsonRpcRequest) -> JsonRpcResponse {
        let JsonRpcRequest {
            id, method, params, ..
        } = req;

        let outcome = match method.as_str() {
            METHOD_INITIALIZE => self.initialize(params),
            METHOD_PING => Ok(json!({})),
            METHOD_TOOLS_LIST => to_result(ListToolsResult {
                tools: self.tools.descriptors(),
            }),
            METHOD_TOOLS_CALL => self.call_tool(params).await,
            METHOD_PROMPTS_LIST => to_result(ListPromptsResult {
                prompts: self.prompts.list(),
            }),
            METHOD_PROMPTS_GET => self.get_prompt(params),
            METHOD_RESOURCES_LIST => self.list_resources().await,
            METHOD_RESOURCES_READ => self.read_resource(params).await,
            _ => Err(JsonRpcError::method_not_found(&method)),
        };

        match outcome {
            Ok(result) => JsonRpcResponse::success(id, result),
            Err(error) => {
                tracing::debug!(id, %method, code = error.code, "request failed: {}", error.message);
                JsonRpcResponse::failure(id, error)
            }
        }
    }

    /// Handle `req` in its own task so a panicking handler yields `-32603`
    /// instead of taking the connection down.
    pub async fn respond(self: Arc<Self>, req: JsonRpcRequest) -> JsonRpcResponse {
        let id = req.id;
        let method = req.method.clone();
        let span = tracing::info_span!("request", id, method = %method);

        match tokio::spawn(async move { self.handle_request(req).await }.instrument(span)).await {
            Ok(response) => response,
            Err(e) => {
                tracing::error!(id, %method, "handler task failed: {e}");
                JsonRpcResponse::failure(
                    id,
                    JsonRpcError::internal(format!("Internal error while handling {method}")),
                )
            }
        }
    }

    fn initialize(&self, params: Value) -> HandlerResult {
        let params = if params.is_null() { json!({}) } else { params };
        let init: InitializeParams = parse_params(METHOD_INITIALIZE, params)?;
        tracing::info!(
            client = %init.client_info.name,
            version = %init.protocol_version,
            "client initializing"
        );
        to_result(InitializeResult {
            protocol_version: PROTOCOL_VERSION.to_string(),
            capabilities: ServerCapabilities {
                tools: Some(json!({})),
                prompts: Some(json!({})),
                resources: Some(json!({})),
            },
            server_info: self.server_info.clone(),
        })
    }

    async fn call_tool(&self, params: Value) -> HandlerResult {
        let CallToolParams { name, arguments } = parse_params(METHOD_TOOLS_CALL, params)?;
        let handler = self
            .tools
            .get(&name)
            .ok_or_else(|| JsonRpcError::invalid_params(format!("Unknown tool: {name}")))?;

        let key = CacheKey::new(name.as_str())
            .period(month_bucket(Utc::now().date_naive()))
            .dimension(arguments.to_string())
            .build();
        if let Some(cache) = &self.cache {
            if let Some(hit) = cache.get(&key) {
                return to_result(CallToolResult::json(&hit));
            }
        }

        let payload = {
            let _permit = self.query_permit().await?;
            handler.execute(arguments).await.map_err(|e| {
                tracing::warn!(tool = %name, "tool failed: {e}");
                to_rpc_error(e)
            })?
        };

        if let Some(cache) = &self.cache {
            cache.set(key, payload.clone());
        }
        to_result(CallToolResult::json(&payload))
    }

    fn get_prompt(&self, params: Value) -> HandlerResult {
        let params: GetPromptParams = parse_params(METHOD_PROMPTS_GET, params)?;
        let rendered = self
            .prompts
            .render(&params.name, &params.arguments)
            .map_err(to_rpc_error)?;
        to_result(rendered)
    }

    /// A slot under the concurrency cap; held for any database access.
    async fn query_permit(&self) -> std::result::Result<SemaphorePermit<'_>, JsonRpcError> {
        self.permits
            .acquire()
            .await
            .map_err(|_| JsonRpcError::internal("server is shutting down"))
    }

    async fn list_resources(&self) -> HandlerResult {
        let tables = {
            let _permit = self.query_permit().await?;
            self.executor
                .list_base_tables()
                .await
                .map_err(to_rpc_error)?
        };

        let mut resources = vec![Resource {
            uri: TABLES_URI.to_string(),
            name: "tables".to_string(),
            description: Some("Names of all base tables".to_string()),
            mime_type: Some(JSON_MIME.to_string()),
        }];
        resources.extend(tables.into_iter().map(|table| Resource {
            uri: format!("{TABLES_URI}/{table}"),
            description: Some(format!("Column metadata for {table}")),
            name: table,
            mime_type: Some(JSON_MIME.to_string()),
        }));
        to_result(ListResourcesResult { resources })
    }

    async fn read_resource(&self, params: Value) -> HandlerResult {
        let ReadResourceParams { uri } = parse_params(METHOD_RESOURCES_READ, params)?;
        let unknown = || JsonRpcError::invalid_params(format!("Unknown resource: {uri}"));

        let _permit = self.query_permit().await?;
        let body = if uri == TABLES_URI {
            let tables = self
                .executor
                .list_base_tables()
                .await
                .map_err(to_rpc_error)?;
            json!({ "tables": tables })
        } else if let Some(table) = uri
            .strip_prefix(TABLES_URI)
            .and_then(|rest| rest.strip_prefix('/'))
            .filter(|t| !t.is_empty())
        {
            let columns = self
                .executor
                .describe_columns(table)
                .await
                .map_err(to_rpc_error)?;
            if columns.is_empty() {
                return Err(unknown());
            }
            json!({ "table": table, "columns": columns })
        } else {
            return Err(unknown());
        };

        to_result(ReadResourceResult {
            contents: vec![ResourceContents {
                uri: uri.clone(),
                mime_type: Some(JSON_MIME.to_string()),
                text: body.to_string(),
            }],
        })
    }
}

/// Serve one connection until the peer closes it.
///
/// Requests are handled concurrently; responses are written in completion
/// order. A malformed request whose `id` is readable is answered with
/// `-32600`. Inbound notifications and stray responses are logged and never
/// answered. Returns once the read side has ended and every in-flight
/// response has been written.
pub async fn serve_connection<R, W>(reader: R, writer: W, dispatcher: Arc<Dispatcher>, peer: &str)
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Message>();

    let writer_peer = peer.to_string();
    let writer_task = tokio::spawn(async move {
        let mut sink = FramedWrite::new(writer, FrameCodec::new());
        while let Some(message) = out_rx.recv().await {
            if let Err(e) = sink.send(message).await {
                tracing::warn!(peer = %writer_peer, "write failed: {e}");
                break;
            }
        }
    });

    let mut frames = FramedRead::new(reader, FrameCodec::new());
    while let Some(frame) = frames.next().await {
        match frame {
            Ok(Frame::Message(Message::Request(req))) => {
                let dispatcher = Arc::clone(&dispatcher);
                let out_tx = out_tx.clone();
                tokio::spawn(async move {
                    let response = dispatcher.respond(req).await;
                    // The writer is gone only if the connection died.
                    let _ = out_tx.send(response.into());
                });
            }
            Ok(Frame::Invalid { id, reason }) => {
                tracing::debug!(%peer, id, "answering invalid request: {reason}");
                let error = JsonRpcError::invalid_request(format!("Invalid request: {reason}"));
                let _ = out_tx.send(JsonRpcResponse::failure(id, error).into());
            }
            Ok(Frame::Message(Message::Notification(n))) if n.method == METHOD_INITIALIZED => {
                tracing::info!(%peer, "client initialized");
            }
            Ok(Frame::Message(Message::Notification(n))) => {
                tracing::debug!(%peer, method = %n.method, "ignoring notification");
            }
            Ok(Frame::Message(Message::Response(resp))) => {
                tracing::debug!(%peer, id = resp.id, "ignoring unexpected response");
            }
            Err(e) => {
                tracing::warn!(%peer, "read failed: {e}");
                break;
            }
        }
    }

    drop(out_tx);
    let _ = writer_task.await;
    tracing::info!(%peer, "connection closed");
}

/// Accept TCP connections until `shutdown` is cancelled.
///
/// A failed accept is logged and the loop keeps going. Cancelling
/// `shutdown` also ends every open connection.
///
/// # Errors
///
/// Returns [`QuerywireError::Io`] if the listener has no local address.
pub async fn serve_tcp(
    listener: TcpListener,
    dispatcher: Arc<Dispatcher>,
    shutdown: CancellationToken,
) -> Result<()> {
    let local = listener.local_addr().map_err(QuerywireError::from)?;
    tracing::info!(%local, "listening");

    let mut incoming = TcpListenerStream::new(listener);
    loop {
        let stream = tokio::select! {
            _ = shutdown.cancelled() => break,
            next = incoming.next() => match next {
                Some(Ok(stream)) => stream,
                Some(Err(e)) => {
                    tracing::warn!(%local, "accept failed: {e}");
                    continue;
                }
                None => break,
            },
        };

        let peer = stream
            .peer_addr()
            .map(|addr| addr.to_string())
            .unwrap_or_else(|_| "unknown".to_string());
        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!(%peer, "set_nodelay failed: {e}");
        }
        tracing::info!(%peer, "connection accepted");

        let dispatcher = Arc::clone(&dispatcher);
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            let (reader, writer) = stream.into_split();
            tokio::select! {
                _ = serve_connection(reader, writer, dispatcher, &peer) => {}
                _ = shutdown.cancelled() => {}
            }
        });
    }

    tracing::info!(%local, "server stopped");
    Ok(())
}

/// Serve a single session over this process's stdin and stdout.
pub async fn serve_stdio(dispatcher: Arc<Dispatcher>) -> Result<()> {
    serve_connection(tokio::io::stdin(), tokio::io::stdout(), dispatcher, "stdio").await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{ColumnInfo, MockQueryExecutor, QueryResult};
    use crate::mcp::types::{
        HANDLER_ERROR, INTERNAL_ERROR, INVALID_PARAMS, INVALID_REQUEST, METHOD_NOT_FOUND,
    };
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

    fn request(id: u64, method: &str, params: Value) -> JsonRpcRequest {
        JsonRpcRequest::new(id, method, params)
    }

    fn error_of(resp: &JsonRpcResponse) -> &JsonRpcError {
        resp.error.as_ref().expect("expected an error response")
    }

    fn tool_payload(resp: JsonRpcResponse) -> Value {
        let result: CallToolResult = serde_json::from_value(resp.result.unwrap()).unwrap();
        result.payload().unwrap()
    }

    #[tokio::test]
    async fn test_unknown_method_is_method_not_found() {
        let d = Dispatcher::new(Arc::new(MockQueryExecutor::new()));
        let resp = d.handle_request(request(1, "tools/delete", json!({}))).await;
        assert_eq!(resp.id, 1);
        assert_eq!(error_of(&resp).code, METHOD_NOT_FOUND);
    }

    #[tokio::test]
    async fn test_tools_list_publishes_three_query_tools() {
        let d = Dispatcher::new(Arc::new(MockQueryExecutor::new()));
        let resp = d.handle_request(request(1, METHOD_TOOLS_LIST, json!({}))).await;
        let list: ListToolsResult = serde_json::from_value(resp.result.unwrap()).unwrap();
        let names: Vec<_> = list.tools.into_iter().map(|t| t.name).collect();
        assert_eq!(names, ["get_tables", "describe_table", "execute_query"]);
    }

    #[tokio::test]
    async fn test_initialize_reports_capabilities() {
        let d = Dispatcher::new(Arc::new(MockQueryExecutor::new()));
        let resp = d
            .handle_request(request(
                1,
                METHOD_INITIALIZE,
                json!({
                    "protocolVersion": PROTOCOL_VERSION,
                    "capabilities": {},
                    "clientInfo": {"name": "test", "version": "0"}
                }),
            ))
            .await;
        let init: InitializeResult = serde_json::from_value(resp.result.unwrap()).unwrap();
        assert_eq!(init.protocol_version, PROTOCOL_VERSION);
        assert!(init.capabilities.tools.is_some());
        assert_eq!(init.server_info.name, "querywire");
    }

    #[tokio::test]
    async fn test_initialize_accepts_empty_or_missing_params() {
        let d = Dispatcher::new(Arc::new(MockQueryExecutor::new()));
        for params in [json!({}), Value::Null] {
            let resp = d
                .handle_request(request(1, METHOD_INITIALIZE, params.clone()))
                .await;
            assert!(resp.error.is_none(), "{params}: {:?}", resp.error);
            let init: InitializeResult = serde_json::from_value(resp.result.unwrap()).unwrap();
            assert_eq!(init.protocol_version, PROTOCOL_VERSION);
        }

        // A frame with no `params` key at all.
        let Message::Request(req) = Message::parse(r#"{"id":2,"method":"initialize"}"#).unwrap()
        else {
            panic!("expected a request");
        };
        assert!(d.handle_request(req).await.error.is_none());
    }

    #[tokio::test]
    async fn test_initialize_rejects_mistyped_params() {
        let d = Dispatcher::new(Arc::new(MockQueryExecutor::new()));
        let resp = d
            .handle_request(request(1, METHOD_INITIALIZE, json!({"protocolVersion": 7})))
            .await;
        assert_eq!(error_of(&resp).code, INVALID_PARAMS);
    }

    #[tokio::test]
    async fn test_unknown_tool_names_tool() {
        let d = Dispatcher::new(Arc::new(MockQueryExecutor::new()));
        let resp = d
            .handle_request(request(2, METHOD_TOOLS_CALL, json!({"name": "drop_all"})))
            .await;
        let err = error_of(&resp);
        assert_eq!(err.code, INVALID_PARAMS);
        assert_eq!(err.message, "Unknown tool: drop_all");
    }

    #[tokio::test]
    async fn test_rejected_query_is_handler_error() {
        let mut mock = MockQueryExecutor::new();
        mock.expect_execute_read_only().never();
        let d = Dispatcher::new(Arc::new(mock));
        let resp = d
            .handle_request(request(
                3,
                METHOD_TOOLS_CALL,
                json!({"name": "execute_query", "arguments": {"query": "DELETE FROM t"}}),
            ))
            .await;
        let err = error_of(&resp);
        assert_eq!(err.code, HANDLER_ERROR);
        assert_eq!(err.message, "Only read-only SELECT statements are permitted");
    }

    #[tokio::test]
    async fn test_missing_tool_argument_is_invalid_params() {
        let d = Dispatcher::new(Arc::new(MockQueryExecutor::new()));
        let resp = d
            .handle_request(request(
                4,
                METHOD_TOOLS_CALL,
                json!({"name": "describe_table", "arguments": {}}),
            ))
            .await;
        assert_eq!(error_of(&resp).code, INVALID_PARAMS);
    }

    #[tokio::test]
    async fn test_cached_result_skips_executor() {
        let mut mock = MockQueryExecutor::new();
        mock.expect_execute_read_only().times(1).returning(|_, _| {
            Ok(QueryResult {
                row_count: 0,
                rows: vec![],
            })
        });
        let cache = Arc::new(ResultCache::new(Duration::from_secs(60)));
        let d = Dispatcher::new(Arc::new(mock)).with_cache(Arc::clone(&cache));

        let call = || {
            request(
                5,
                METHOD_TOOLS_CALL,
                json!({"name": "execute_query", "arguments": {"query": "SELECT 1"}}),
            )
        };
        let first = tool_payload(d.handle_request(call()).await);
        let second = tool_payload(d.handle_request(call()).await);
        assert_eq!(first, second);
        assert_eq!(first, json!({"rowCount": 0, "rows": []}));
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn test_failed_call_is_not_cached() {
        let mut mock = MockQueryExecutor::new();
        mock.expect_list_base_tables()
            .times(2)
            .returning(|| Err(QuerywireError::Query("locked".into()).into()));
        let cache = Arc::new(ResultCache::new(Duration::from_secs(60)));
        let d = Dispatcher::new(Arc::new(mock)).with_cache(Arc::clone(&cache));

        for _ in 0..2 {
            let resp = d
                .handle_request(request(6, METHOD_TOOLS_CALL, json!({"name": "get_tables"})))
                .await;
            assert_eq!(error_of(&resp).message, "locked");
        }
        assert!(cache.is_empty());
    }

    struct Slow {
        running: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl ToolHandler for Slow {
        fn descriptor(&self) -> crate::mcp::types::ToolDescriptor {
            crate::mcp::types::ToolDescriptor {
                name: "slow".into(),
                description: "sleeps".into(),
                input_schema: json!({"type": "object"}),
            }
        }

        async fn execute(&self, _args: Value) -> Result<Value> {
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.running.fetch_sub(1, Ordering::SeqCst);
            Ok(json!("done"))
        }
    }

    #[tokio::test]
    async fn test_concurrent_tool_calls_are_capped() {
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let d = Arc::new(
            Dispatcher::new(Arc::new(MockQueryExecutor::new()))
                .with_max_concurrent_queries(2)
                .with_tool(Arc::new(Slow {
                    running: Arc::clone(&running),
                    peak: Arc::clone(&peak),
                })),
        );

        let calls: Vec<_> = (0..6)
            .map(|i| {
                let d = Arc::clone(&d);
                tokio::spawn(async move {
                    d.handle_request(request(
                        i,
                        METHOD_TOOLS_CALL,
                        json!({"name": "slow", "arguments": {"i": i}}),
                    ))
                    .await
                })
            })
            .collect();
        for call in calls {
            assert!(call.await.unwrap().error.is_none());
        }
        assert_eq!(peak.load(Ordering::SeqCst), 2);
    }

    /// Executor that records how many calls overlap.
    struct CountingExecutor {
        running: AtomicUsize,
        peak: AtomicUsize,
    }

    impl CountingExecutor {
        async fn enter(&self) {
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.running.fetch_sub(1, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl QueryExecutor for CountingExecutor {
        async fn list_base_tables(&self) -> Result<Vec<String>> {
            self.enter().await;
            Ok(vec!["ventas".into()])
        }

        async fn describe_columns(&self, _table: &str) -> Result<Vec<ColumnInfo>> {
            self.enter().await;
            Ok(vec![ColumnInfo {
                name: "total".into(),
                data_type: "REAL".into(),
                nullable: true,
                max_length: None,
            }])
        }

        async fn execute_read_only(
            &self,
            _statement: &str,
            _params: &serde_json::Map<String, Value>,
        ) -> Result<QueryResult> {
            self.enter().await;
            Ok(QueryResult {
                row_count: 0,
                rows: vec![],
            })
        }
    }

    #[tokio::test]
    async fn test_resource_reads_share_the_query_cap() {
        let executor = Arc::new(CountingExecutor {
            running: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        });
        let d = Arc::new(
            Dispatcher::new(Arc::clone(&executor) as Arc<dyn QueryExecutor>)
                .with_max_concurrent_queries(2),
        );

        let requests = [
            request(1, METHOD_RESOURCES_LIST, json!({})),
            request(2, METHOD_RESOURCES_READ, json!({"uri": "schema://tables"})),
            request(3, METHOD_RESOURCES_READ, json!({"uri": "schema://tables/ventas"})),
            request(4, METHOD_RESOURCES_LIST, json!({})),
            request(5, METHOD_TOOLS_CALL, json!({"name": "get_tables"})),
            request(6, METHOD_RESOURCES_READ, json!({"uri": "schema://tables"})),
        ];
        let calls: Vec<_> = requests
            .into_iter()
            .map(|req| {
                let d = Arc::clone(&d);
                tokio::spawn(async move { d.handle_request(req).await })
            })
            .collect();
        for call in calls {
            let resp = call.await.unwrap();
            assert!(resp.error.is_none(), "{:?}", resp.error);
        }
        assert_eq!(executor.peak.load(Ordering::SeqCst), 2);
    }

    struct Panics;

    #[async_trait]
    impl ToolHandler for Panics {
        fn descriptor(&self) -> crate::mcp::types::ToolDescriptor {
            crate::mcp::types::ToolDescriptor {
                name: "panics".into(),
                description: "always panics".into(),
                input_schema: json!({"type": "object"}),
            }
        }

        async fn execute(&self, _args: Value) -> Result<Value> {
            panic!("boom");
        }
    }

    #[tokio::test]
    async fn test_panicking_handler_becomes_internal_error() {
        let d = Arc::new(
            Dispatcher::new(Arc::new(MockQueryExecutor::new())).with_tool(Arc::new(Panics)),
        );
        let resp = Arc::clone(&d)
            .respond(request(7, METHOD_TOOLS_CALL, json!({"name": "panics"})))
            .await;
        assert_eq!(error_of(&resp).code, INTERNAL_ERROR);

        // The dispatcher keeps working afterwards.
        let resp = d.respond(request(8, METHOD_PING, json!({}))).await;
        assert_eq!(resp.result, Some(json!({})));
    }

    #[tokio::test]
    async fn test_prompt_errors_are_invalid_params() {
        let d = Dispatcher::new(Arc::new(MockQueryExecutor::new()));
        let resp = d
            .handle_request(request(9, METHOD_PROMPTS_GET, json!({"name": "nope"})))
            .await;
        assert_eq!(error_of(&resp).code, INVALID_PARAMS);

        let resp = d
            .handle_request(request(
                10,
                METHOD_PROMPTS_GET,
                json!({"name": "analyze_table", "arguments": {"table_name": "ventas"}}),
            ))
            .await;
        assert!(resp.error.is_none());
    }

    #[tokio::test]
    async fn test_resources_list_and_read() {
        let mut mock = MockQueryExecutor::new();
        mock.expect_list_base_tables()
            .returning(|| Ok(vec!["ventas".into()]));
        mock.expect_describe_columns()
            .withf(|t| t == "ventas")
            .returning(|_| {
                Ok(vec![ColumnInfo {
                    name: "total".into(),
                    data_type: "REAL".into(),
                    nullable: true,
                    max_length: None,
                }])
            });
        mock.expect_describe_columns()
            .returning(|_| Ok(vec![]));
        let d = Dispatcher::new(Arc::new(mock));

        let resp = d
            .handle_request(request(1, METHOD_RESOURCES_LIST, json!({})))
            .await;
        let list: ListResourcesResult = serde_json::from_value(resp.result.unwrap()).unwrap();
        let uris: Vec<_> = list.resources.iter().map(|r| r.uri.as_str()).collect();
        assert_eq!(uris, ["schema://tables", "schema://tables/ventas"]);

        let resp = d
            .handle_request(request(
                2,
                METHOD_RESOURCES_READ,
                json!({"uri": "schema://tables/ventas"}),
            ))
            .await;
        let read: ReadResourceResult = serde_json::from_value(resp.result.unwrap()).unwrap();
        let body: Value = serde_json::from_str(&read.contents[0].text).unwrap();
        assert_eq!(body["columns"][0]["name"], "total");

        for uri in ["schema://tables/ghost", "file:///etc/passwd", "schema://tables/"] {
            let resp = d
                .handle_request(request(3, METHOD_RESOURCES_READ, json!({"uri": uri})))
                .await;
            assert_eq!(error_of(&resp).code, INVALID_PARAMS, "{uri}");
        }
    }

    #[tokio::test]
    async fn test_serve_connection_survives_malformed_frames() {
        let d = Arc::new(Dispatcher::new(Arc::new(MockQueryExecutor::new())));
        let (client, server) = tokio::io::duplex(16 * 1024);
        let (sr, sw) = tokio::io::split(server);
        let served = tokio::spawn(async move { serve_connection(sr, sw, d, "duplex").await });

        let (cr, mut cw) = tokio::io::split(client);
        cw.write_all(
            b"not json\n{\"jsonrpc\":\"2.0\",\"method\":\"notifications/initialized\"}\n{\"id\":1,\"method\":\"tools/list\"}\n",
        )
        .await
        .unwrap();

        let mut lines = BufReader::new(cr).lines();
        let line = tokio::time::timeout(Duration::from_secs(5), lines.next_line())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        let resp: Value = serde_json::from_str(&line).unwrap();
        assert_eq!(resp["id"], 1);
        assert_eq!(resp["result"]["tools"].as_array().unwrap().len(), 3);

        drop(cw);
        tokio::time::timeout(Duration::from_secs(5), served)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_malformed_request_with_id_gets_invalid_request() {
        let d = Arc::new(Dispatcher::new(Arc::new(MockQueryExecutor::new())));
        let (client, server) = tokio::io::duplex(16 * 1024);
        let (sr, sw) = tokio::io::split(server);
        tokio::spawn(async move { serve_connection(sr, sw, d, "duplex").await });

        let (cr, mut cw) = tokio::io::split(client);
        cw.write_all(b"{\"id\":4,\"method\":[\"ping\"]}\n{\"id\":5,\"method\":\"ping\"}\n")
            .await
            .unwrap();

        let mut lines = BufReader::new(cr).lines();
        let mut by_id = std::collections::HashMap::new();
        for _ in 0..2 {
            let line = tokio::time::timeout(Duration::from_secs(5), lines.next_line())
                .await
                .unwrap()
                .unwrap()
                .unwrap();
            let resp: Value = serde_json::from_str(&line).unwrap();
            by_id.insert(resp["id"].as_u64().unwrap(), resp);
        }
        assert_eq!(by_id[&4]["error"]["code"], INVALID_REQUEST);
        assert_eq!(by_id[&5]["result"], json!({}));
    }
}
