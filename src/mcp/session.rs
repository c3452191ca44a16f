//! Client session with typed calls and automatic reconnection
//!
//! [`McpClient`] wraps a [`Connector`] and keeps at most one live
//! [`JsonRpcClient`]. When that connection drops unexpectedly a supervisor
//! task drives the [`ReconnectMachine`] until a new connection is up or the
//! budget is spent. Progress is published as [`ClientEvent`]s on a broadcast
//! channel.
//!
//! Requests in flight on a lost connection are not replayed. They stay in
//! that connection's correlation table and time out; the replacement
//! connection starts with an empty table and ids from 1.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde_json::{Map, Value};
use tokio::process::Child;
use tokio::sync::broadcast;
use tokio::time::Instant;

use crate::config::ClientConfig;
use crate::error::{QuerywireError, Result};
use crate::mcp::client::JsonRpcClient;
use crate::mcp::pending::DEFAULT_REQUEST_TIMEOUT;
use crate::mcp::reconnect::{
    Action, ConnectionEvent, ConnectionState, ReconnectMachine, ReconnectPolicy, Sleeper,
    TokioSleeper,
};
use crate::mcp::transport::Connector;
use crate::mcp::types::{
    CallToolParams, CallToolResult, GetPromptParams, GetPromptResult, Implementation,
    InitializeParams, InitializeResult, ListPromptsResult, ListResourcesResult, ListToolsResult,
    Prompt, ReadResourceParams, ReadResourceResult, Resource, ToolDescriptor, METHOD_INITIALIZE,
    METHOD_INITIALIZED, METHOD_PING, METHOD_PROMPTS_GET, METHOD_PROMPTS_LIST,
    METHOD_RESOURCES_LIST, METHOD_RESOURCES_READ, METHOD_TOOLS_CALL, METHOD_TOOLS_LIST,
    PROTOCOL_VERSION,
};

const EVENT_CAPACITY: usize = 64;

/// Lifecycle notifications published by [`McpClient`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    Connected { peer: String },
    Disconnected { peer: String },
    Error { message: String },
    Reconnecting { attempt: u32, delay: Duration },
    /// Terminal until the owner calls [`McpClient::connect`] again.
    ReconnectBudgetExhausted { attempts: u32 },
}

/// Tunables for an [`McpClient`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientOptions {
    pub request_timeout: Duration,
    pub reconnect: ReconnectPolicy,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            reconnect: ReconnectPolicy::default(),
        }
    }
}

impl From<&ClientConfig> for ClientOptions {
    fn from(config: &ClientConfig) -> Self {
        Self {
            request_timeout: Duration::from_secs(config.request_timeout_secs),
            reconnect: ReconnectPolicy::new(
                config.max_reconnect_attempts,
                Duration::from_millis(config.reconnect_base_delay_ms),
            ),
        }
    }
}

/// Result of [`McpClient::call_tool`] with its wall-clock duration.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCallOutcome {
    pub result: CallToolResult,
    pub elapsed: Duration,
}

struct Live {
    rpc: Arc<JsonRpcClient>,
    _child: Option<Child>,
}

struct Inner {
    connector: Arc<dyn Connector>,
    sleeper: Arc<dyn Sleeper>,
    options: ClientOptions,
    machine: Mutex<ReconnectMachine>,
    live: Mutex<Option<Live>>,
    events: broadcast::Sender<ClientEvent>,
    /// Bumped by every explicit connect/disconnect; supervisors for an older
    /// generation stand down.
    generation: AtomicU64,
}

impl Inner {
    fn machine(&self) -> MutexGuard<'_, ReconnectMachine> {
        self.machine.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn live(&self) -> MutexGuard<'_, Option<Live>> {
        self.live.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn current(&self) -> Option<Arc<JsonRpcClient>> {
        self.live().as_ref().map(|l| Arc::clone(&l.rpc))
    }

    fn emit(&self, event: ClientEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn is_current_generation(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    async fn open(&self) -> Result<Live> {
        let conn = self.connector.connect().await?;
        let rpc = JsonRpcClient::spawn(
            conn.reader,
            conn.writer,
            conn.peer,
            self.options.request_timeout,
        );
        Ok(Live {
            rpc,
            _child: conn.child,
        })
    }

    /// Make `live` the current connection, unless a disconnect or a newer
    /// connect has moved past `generation`; then it is closed and dropped.
    ///
    /// The generation is checked under the live-slot lock, so a concurrent
    /// [`McpClient::disconnect`] either sees the new connection and takes
    /// it, or makes this call refuse it.
    fn install(&self, live: Live, generation: u64) -> Option<Arc<JsonRpcClient>> {
        let rpc = Arc::clone(&live.rpc);
        {
            let mut slot = self.live();
            if !self.is_current_generation(generation) {
                drop(slot);
                rpc.close();
                return None;
            }
            if let Some(old) = slot.replace(live) {
                old.rpc.close();
            }
        }
        self.emit(ClientEvent::Connected {
            peer: rpc.peer().to_string(),
        });
        Some(rpc)
    }

    /// Drop `rpc` from the live slot if it is still the current connection.
    fn retire(&self, rpc: &Arc<JsonRpcClient>) {
        let mut live = self.live();
        if live.as_ref().is_some_and(|l| Arc::ptr_eq(&l.rpc, rpc)) {
            *live = None;
        }
    }
}

/// Watches one connection at a time and reconnects after unexpected loss.
async fn supervise(inner: Arc<Inner>, mut rpc: Arc<JsonRpcClient>, generation: u64) {
    loop {
        rpc.closed().await;
        inner.retire(&rpc);
        if !inner.is_current_generation(generation) {
            return;
        }

        tracing::warn!(peer = %rpc.peer(), "connection lost");
        inner.emit(ClientEvent::Disconnected {
            peer: rpc.peer().to_string(),
        });

        let mut action = inner.machine().handle(ConnectionEvent::Closed);
        loop {
            match action {
                Action::Wait(delay) => {
                    let attempt = inner.machine().attempts();
                    tracing::warn!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        endpoint = %inner.connector.endpoint(),
                        "scheduling reconnect"
                    );
                    inner.emit(ClientEvent::Reconnecting { attempt, delay });
                    inner.sleeper.sleep(delay).await;
                    if !inner.is_current_generation(generation) {
                        return;
                    }
                    action = inner.machine().handle(ConnectionEvent::BackoffElapsed);
                }
                Action::Connect => match inner.open().await {
                    Ok(live) => {
                        let Some(installed) = inner.install(live, generation) else {
                            return;
                        };
                        inner.machine().handle(ConnectionEvent::ConnectSucceeded);
                        rpc = installed;
                        tracing::info!(peer = %rpc.peer(), "reconnected");
                        break;
                    }
                    Err(e) => {
                        tracing::warn!("reconnect attempt failed: {e}");
                        inner.emit(ClientEvent::Error {
                            message: e.to_string(),
                        });
                        action = inner.machine().handle(ConnectionEvent::ConnectFailed);
                    }
                },
                Action::GiveUp { attempts } => {
                    tracing::error!(
                        attempts,
                        endpoint = %inner.connector.endpoint(),
                        "reconnect budget exhausted"
                    );
                    inner.emit(ClientEvent::ReconnectBudgetExhausted { attempts });
                    return;
                }
                Action::None => return,
            }
        }
    }
}

/// Typed JSON-RPC client session.
///
/// # Examples
///
/// ```no_run
/// use std::sync::Arc;
/// use querywire::mcp::session::{ClientOptions, McpClient};
/// use querywire::mcp::transport::tcp::TcpConnector;
///
/// # #[tokio::main]
/// # async fn main() -> anyhow::Result<()> {
/// let client = McpClient::new(Arc::new(TcpConnector::new("127.0.0.1", 3001)), ClientOptions::default());
/// client.connect().await?;
/// client.initialize().await?;
/// for tool in client.list_tools().await? {
///     println!("{}", tool.name);
/// }
/// # Ok(())
/// # }
/// ```
pub struct McpClient {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for McpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpClient")
            .field("endpoint", &self.inner.connector.endpoint())
            .field("state", &self.state())
            .finish()
    }
}

impl McpClient {
    /// Create a disconnected client that sleeps with Tokio timers.
    pub fn new(connector: Arc<dyn Connector>, options: ClientOptions) -> Self {
        Self::with_sleeper(connector, Arc::new(TokioSleeper), options)
    }

    /// Create a disconnected client with a custom [`Sleeper`].
    pub fn with_sleeper(
        connector: Arc<dyn Connector>,
        sleeper: Arc<dyn Sleeper>,
        options: ClientOptions,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                connector,
                sleeper,
                options,
                machine: Mutex::new(ReconnectMachine::new(options.reconnect)),
                live: Mutex::new(None),
                events,
                generation: AtomicU64::new(0),
            }),
        }
    }

    /// Subscribe to lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.inner.events.subscribe()
    }

    /// Current reconnection state.
    pub fn state(&self) -> ConnectionState {
        self.inner.machine().state()
    }

    pub fn is_connected(&self) -> bool {
        self.inner.current().is_some_and(|rpc| !rpc.is_closed())
    }

    /// Open a connection. Also the only way out of the exhausted state.
    ///
    /// Connecting while already connected is a no-op. A failed explicit
    /// connect is returned to the caller and not retried.
    ///
    /// # Errors
    ///
    /// Returns [`QuerywireError::Transport`] if the endpoint is unreachable,
    /// if another connect is already in progress, or if
    /// [`disconnect`](Self::disconnect) ran before the connection opened.
    pub async fn connect(&self) -> Result<()> {
        let action = self.inner.machine().handle(ConnectionEvent::ConnectRequested);
        match action {
            Action::Connect => {}
            _ if self.state() == ConnectionState::Connected => return Ok(()),
            _ => {
                return Err(QuerywireError::Transport(
                    "a connection attempt is already in progress".into(),
                )
                .into())
            }
        }

        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        match self.inner.open().await {
            Ok(live) => {
                let Some(rpc) = self.inner.install(live, generation) else {
                    tracing::debug!("connect superseded by disconnect; closing new connection");
                    return Err(QuerywireError::Transport(
                        "connect was cancelled by a disconnect".into(),
                    )
                    .into());
                };
                self.inner
                    .machine()
                    .handle(ConnectionEvent::ConnectSucceeded);
                tokio::spawn(supervise(Arc::clone(&self.inner), rpc, generation));
                Ok(())
            }
            Err(e) if !self.inner.is_current_generation(generation) => Err(e),
            Err(e) => {
                self.inner.machine().handle(ConnectionEvent::ConnectFailed);
                self.inner.emit(ClientEvent::Error {
                    message: e.to_string(),
                });
                Err(e)
            }
        }
    }

    /// Close the connection and stop any reconnect in progress.
    pub fn disconnect(&self) {
        self.inner.generation.fetch_add(1, Ordering::SeqCst);
        self.inner
            .machine()
            .handle(ConnectionEvent::DisconnectRequested);
        let live = self.inner.live().take();
        if let Some(live) = live {
            live.rpc.close();
            self.inner.emit(ClientEvent::Disconnected {
                peer: live.rpc.peer().to_string(),
            });
        }
    }

    /// The live connection, or why there is none.
    fn live_client(&self) -> Result<Arc<JsonRpcClient>> {
        if let Some(rpc) = self.inner.current() {
            return Ok(rpc);
        }
        match self.state() {
            ConnectionState::Exhausted { attempts } => {
                Err(QuerywireError::ReconnectBudgetExhausted { attempts }.into())
            }
            _ => Err(QuerywireError::NotConnected.into()),
        }
    }

    /// Send a raw request on the live connection.
    ///
    /// # Errors
    ///
    /// [`QuerywireError::NotConnected`] when no connection is live,
    /// [`QuerywireError::ReconnectBudgetExhausted`] after the client gave up
    /// reconnecting, otherwise as [`JsonRpcClient::send_request`].
    pub async fn send_request(&self, method: &str, params: Value) -> Result<Value> {
        let rpc = self.live_client()?;
        rpc.send_request(method, params).await
    }

    async fn request<P, R>(&self, method: &str, params: P) -> Result<R>
    where
        P: serde::Serialize + Send,
        R: serde::de::DeserializeOwned,
    {
        let rpc = self.live_client()?;
        rpc.request(method, params).await
    }

    /// Perform the `initialize` handshake and send `notifications/initialized`.
    pub async fn initialize(&self) -> Result<InitializeResult> {
        let params = InitializeParams {
            protocol_version: PROTOCOL_VERSION.to_string(),
            capabilities: Value::Object(Map::new()),
            client_info: Implementation::querywire(),
        };
        let result: InitializeResult = self.request(METHOD_INITIALIZE, params).await?;
        if result.protocol_version != PROTOCOL_VERSION {
            tracing::warn!(
                server = %result.protocol_version,
                client = PROTOCOL_VERSION,
                "protocol version mismatch"
            );
        }

        let rpc = self.live_client()?;
        rpc.notify(METHOD_INITIALIZED, Value::Object(Map::new()))?;
        tracing::info!(server = %result.server_info.name, "session initialized");
        Ok(result)
    }

    pub async fn ping(&self) -> Result<()> {
        self.send_request(METHOD_PING, Value::Object(Map::new()))
            .await
            .map(|_| ())
    }

    pub async fn list_tools(&self) -> Result<Vec<ToolDescriptor>> {
        let result: ListToolsResult = self.request(METHOD_TOOLS_LIST, Map::new()).await?;
        Ok(result.tools)
    }

    /// Invoke a tool and measure the round trip.
    ///
    /// # Errors
    ///
    /// A tool failure on the server arrives as [`QuerywireError::Rpc`]
    /// carrying the handler's message.
    pub async fn call_tool(&self, name: &str, arguments: Value) -> Result<ToolCallOutcome> {
        let params = CallToolParams {
            name: name.to_string(),
            arguments,
        };
        let started = Instant::now();
        let outcome = self.request::<_, CallToolResult>(METHOD_TOOLS_CALL, params).await;
        let elapsed = started.elapsed();

        metrics::histogram!(
            "querywire_tool_call_seconds",
            elapsed.as_secs_f64(),
            "tool" => name.to_string()
        );
        tracing::info!(
            tool = name,
            elapsed_ms = elapsed.as_millis() as u64,
            ok = outcome.is_ok(),
            "tool call finished"
        );

        Ok(ToolCallOutcome {
            result: outcome?,
            elapsed,
        })
    }

    pub async fn list_prompts(&self) -> Result<Vec<Prompt>> {
        let result: ListPromptsResult = self.request(METHOD_PROMPTS_LIST, Map::new()).await?;
        Ok(result.prompts)
    }

    pub async fn get_prompt(
        &self,
        name: &str,
        arguments: Map<String, Value>,
    ) -> Result<GetPromptResult> {
        let params = GetPromptParams {
            name: name.to_string(),
            arguments,
        };
        self.request(METHOD_PROMPTS_GET, params).await
    }

    pub async fn list_resources(&self) -> Result<Vec<Resource>> {
        let result: ListResourcesResult =
            self.request(METHOD_RESOURCES_LIST, Map::new()).await?;
        Ok(result.resources)
    }

    pub async fn read_resource(&self, uri: &str) -> Result<ReadResourceResult> {
        let params = ReadResourceParams {
            uri: uri.to_string(),
        };
        self.request(METHOD_RESOURCES_READ, params).await
    }
}

impl Drop for McpClient {
    fn drop(&mut self) {
        self.inner.generation.fetch_add(1, Ordering::SeqCst);
        if let Some(live) = self.inner.live().take() {
            live.rpc.close();
        }
    }
}
