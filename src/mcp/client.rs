//! Per-connection async JSON-RPC 2.0 client
//!
//! This module provides [`JsonRpcClient`], which owns one live connection:
//! a [`FrameCodec`] on each half of a duplex byte stream, a
//! [`CorrelationTable`] for in-flight requests, and a monotonically
//! increasing id counter starting at 1.
//!
//! # Design
//!
//! - Outbound messages go through an unbounded channel to a single writer
//!   task, so frames reach the socket in the order `request` is called.
//! - A read loop decodes inbound frames and classifies each one:
//!   responses resolve or reject the matching pending call, server-initiated
//!   requests are answered with `-32601 Method not found`, malformed
//!   requests with a readable `id` get `-32600`, and notifications are
//!   logged.
//! - When either half fails or reaches EOF the connection's
//!   [`CancellationToken`] is cancelled. Pending calls are left in place and
//!   expire on their own deadline; a replacement connection starts with a
//!   fresh table and a fresh counter.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;

use crate::error::{QuerywireError, Result};
use crate::mcp::codec::{Frame, FrameCodec};
use crate::mcp::pending::CorrelationTable;
use crate::mcp::types::{
    JsonRpcError, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, Message,
};

/// Async JSON-RPC 2.0 client bound to a single connection.
///
/// Create one with [`JsonRpcClient::spawn`], passing the read and write
/// halves of a byte stream. Issue requests with [`JsonRpcClient::request`]
/// and fire-and-forget notifications with [`JsonRpcClient::notify`].
///
/// # Examples
///
/// ```no_run
/// use std::time::Duration;
/// use querywire::mcp::client::JsonRpcClient;
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let stream = tokio::net::TcpStream::connect("127.0.0.1:3001").await?;
///     let (reader, writer) = stream.into_split();
///     let client = JsonRpcClient::spawn(reader, writer, "127.0.0.1:3001", Duration::from_secs(30));
///     let tools = client.send_request("tools/list", serde_json::json!({})).await?;
///     println!("{tools}");
///     Ok(())
/// }
/// ```
#[derive(Debug)]
pub struct JsonRpcClient {
    /// Monotonically increasing request id counter.
    next_id: AtomicU64,
    /// In-flight requests waiting for a response.
    pending: Arc<CorrelationTable>,
    /// Channel feeding the writer task.
    outbound_tx: mpsc::UnboundedSender<Message>,
    /// Cancelled once the connection is gone.
    closed: CancellationToken,
    /// Human-readable peer description for logs.
    peer: String,
}

impl JsonRpcClient {
    /// Wire a client over the given stream halves and start its I/O tasks.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn spawn<R, W>(
        reader: R,
        writer: W,
        peer: impl Into<String>,
        request_timeout: Duration,
    ) -> Arc<Self>
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel::<Message>();
        let client = Arc::new(Self {
            next_id: AtomicU64::new(1),
            pending: CorrelationTable::new(request_timeout),
            outbound_tx,
            closed: CancellationToken::new(),
            peer: peer.into(),
        });

        tokio::spawn(write_loop(
            writer,
            outbound_rx,
            client.closed.clone(),
            client.peer.clone(),
        ));
        tokio::spawn(read_loop(
            reader,
            Arc::clone(&client.pending),
            client.outbound_tx.clone(),
            client.closed.clone(),
            client.peer.clone(),
        ));

        client
    }

    /// Peer description given at construction.
    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// Whether the connection has been lost or closed.
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Resolves once the connection is lost or closed.
    pub async fn closed(&self) {
        self.closed.cancelled().await;
    }

    /// Close the connection. In-flight calls expire on their deadlines.
    pub fn close(&self) {
        self.closed.cancel();
    }

    /// Number of requests awaiting a response.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Send a request and await its raw `result` value.
    ///
    /// # Errors
    ///
    /// - [`QuerywireError::NotConnected`] if the connection is closed.
    /// - [`QuerywireError::Timeout`] if no response arrives in time.
    /// - [`QuerywireError::Rpc`] if the peer answers with an error.
    pub async fn send_request(&self, method: &str, params: Value) -> Result<Value> {
        if self.is_closed() {
            return Err(QuerywireError::NotConnected.into());
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);

        // Register before sending so the response can never arrive first.
        let call = self.pending.register(id, method)?;

        metrics::increment_counter!("querywire_requests_total", "method" => method.to_string());
        self.outbound_tx
            .send(JsonRpcRequest::new(id, method, params).into())
            .map_err(|_| QuerywireError::NotConnected)?;

        let outcome = call.wait().await;
        if outcome.is_err() {
            metrics::increment_counter!(
                "querywire_request_errors_total",
                "method" => method.to_string()
            );
        }
        outcome
    }

    /// Send a request and deserialize its `result` into `R`.
    ///
    /// # Errors
    ///
    /// As [`JsonRpcClient::send_request`], plus
    /// [`QuerywireError::Serialization`] if params or result do not
    /// (de)serialize.
    pub async fn request<P, R>(&self, method: &str, params: P) -> Result<R>
    where
        P: Serialize + Send,
        R: DeserializeOwned,
    {
        let params = serde_json::to_value(params).map_err(QuerywireError::from)?;
        let value = self.send_request(method, params).await?;
        serde_json::from_value(value).map_err(|e| QuerywireError::Serialization(e).into())
    }

    /// Send a notification; no response is expected.
    ///
    /// # Errors
    ///
    /// Returns [`QuerywireError::NotConnected`] if the connection is closed.
    pub fn notify<P: Serialize>(&self, method: &str, params: P) -> Result<()> {
        if self.is_closed() {
            return Err(QuerywireError::NotConnected.into());
        }
        let params = serde_json::to_value(params).map_err(QuerywireError::from)?;
        self.outbound_tx
            .send(JsonRpcNotification::new(method, params).into())
            .map_err(|_| QuerywireError::NotConnected)?;
        Ok(())
    }
}

impl Drop for JsonRpcClient {
    fn drop(&mut self) {
        self.closed.cancel();
    }
}

async fn write_loop<W>(
    writer: W,
    mut outbound_rx: mpsc::UnboundedReceiver<Message>,
    closed: CancellationToken,
    peer: String,
) where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let mut sink = FramedWrite::new(writer, FrameCodec::new());
    loop {
        tokio::select! {
            biased;

            _ = closed.cancelled() => break,

            maybe_msg = outbound_rx.recv() => {
                let Some(message) = maybe_msg else { break };
                if let Err(e) = sink.send(message).await {
                    tracing::warn!(%peer, "write failed: {e}");
                    closed.cancel();
                    break;
                }
            }
        }
    }
}

async fn read_loop<R>(
    reader: R,
    pending: Arc<CorrelationTable>,
    outbound_tx: mpsc::UnboundedSender<Message>,
    closed: CancellationToken,
    peer: String,
) where
    R: AsyncRead + Unpin + Send + 'static,
{
    let mut frames = FramedRead::new(reader, FrameCodec::new());
    loop {
        tokio::select! {
            biased;

            _ = closed.cancelled() => break,

            frame = frames.next() => match frame {
                Some(Ok(Frame::Message(message))) => {
                    dispatch_inbound(message, &pending, &outbound_tx)
                }
                Some(Ok(Frame::Invalid { id, reason })) => {
                    tracing::debug!(%peer, id, "answering invalid request: {reason}");
                    let error = JsonRpcError::invalid_request(format!("Invalid request: {reason}"));
                    let _ = outbound_tx.send(JsonRpcResponse::failure(id, error).into());
                }
                Some(Err(e)) => {
                    tracing::warn!(%peer, "read failed: {e}");
                    break;
                }
                None => {
                    tracing::info!(%peer, "connection closed by peer");
                    break;
                }
            }
        }
    }
    closed.cancel();
}

/// Route one decoded inbound message.
fn dispatch_inbound(
    message: Message,
    pending: &CorrelationTable,
    outbound_tx: &mpsc::UnboundedSender<Message>,
) {
    match message {
        Message::Response(response) => {
            let id = response.id;
            match response.into_outcome() {
                Ok(result) => pending.resolve(id, result),
                Err(error) => pending.reject(id, error),
            };
        }
        Message::Request(request) => {
            tracing::debug!(
                "peer sent request '{}' (id {}); answering method not found",
                request.method,
                request.id
            );
            let reply = JsonRpcResponse::failure(
                request.id,
                JsonRpcError::method_not_found(&request.method),
            );
            let _ = outbound_tx.send(reply.into());
        }
        Message::Notification(notification) => {
            tracing::debug!("peer notification '{}'; ignoring", notification.method);
        }
    }
}
