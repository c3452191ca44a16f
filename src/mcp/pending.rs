//! Request/response correlation for one connection
//!
//! [`CorrelationTable`] maps an outstanding request id to the
//! [`tokio::sync::oneshot`] sender of the caller waiting on it. Each
//! registration returns a [`PendingCall`] that resolves when the matching
//! response arrives, or fails with [`QuerywireError::Timeout`] once the
//! per-request deadline passes.
//!
//! Resolution is at-most-once: whichever of `resolve`, `reject`, or the
//! deadline removes the entry first wins; later attempts find nothing and
//! are ignored.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::error::{QuerywireError, Result};
use crate::mcp::types::JsonRpcError;

/// Default deadline applied to every request.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

type Outcome = std::result::Result<Value, JsonRpcError>;

#[derive(Debug)]
struct PendingEntry {
    method: String,
    submitted_at: Instant,
    tx: oneshot::Sender<Outcome>,
}

/// Pending-request table owned by exactly one connection.
#[derive(Debug)]
pub struct CorrelationTable {
    entries: Mutex<HashMap<u64, PendingEntry>>,
    timeout: Duration,
}

impl CorrelationTable {
    /// Create an empty table whose registrations expire after `timeout`.
    pub fn new(timeout: Duration) -> Arc<Self> {
        Arc::new(Self {
            entries: Mutex::new(HashMap::new()),
            timeout,
        })
    }

    /// Deadline applied to new registrations.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Register `id` and return the handle its caller awaits.
    ///
    /// # Errors
    ///
    /// Returns [`QuerywireError::Protocol`] if `id` is already pending.
    pub fn register(self: &Arc<Self>, id: u64, method: &str) -> Result<PendingCall> {
        let (tx, rx) = oneshot::channel();
        let submitted_at = Instant::now();
        {
            let mut entries = self.lock();
            if entries.contains_key(&id) {
                return Err(QuerywireError::Protocol(format!("request id {id} is already pending")).into());
            }
            entries.insert(
                id,
                PendingEntry {
                    method: method.to_string(),
                    submitted_at,
                    tx,
                },
            );
        }

        Ok(PendingCall {
            id,
            method: method.to_string(),
            deadline: submitted_at + self.timeout,
            rx: Some(rx),
            table: Arc::clone(self),
        })
    }

    /// Fulfill the caller waiting on `id` with `result`.
    ///
    /// Returns `false` when `id` is unknown or already completed.
    pub fn resolve(&self, id: u64, result: Value) -> bool {
        self.complete(id, Ok(result))
    }

    /// Fail the caller waiting on `id` with `error`.
    ///
    /// Returns `false` when `id` is unknown or already completed.
    pub fn reject(&self, id: u64, error: JsonRpcError) -> bool {
        self.complete(id, Err(error))
    }

    /// Number of requests still awaiting a response.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether no request is awaiting a response.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Whether `id` is still awaiting a response.
    pub fn contains(&self, id: u64) -> bool {
        self.lock().contains_key(&id)
    }

    fn complete(&self, id: u64, outcome: Outcome) -> bool {
        let Some(entry) = self.lock().remove(&id) else {
            tracing::debug!("no pending request for id {id}; discarding response");
            return false;
        };

        tracing::trace!(
            id,
            method = %entry.method,
            elapsed_ms = entry.submitted_at.elapsed().as_millis() as u64,
            "request completed"
        );

        // The receiver is gone only if the caller dropped its handle.
        entry.tx.send(outcome).is_ok()
    }

    fn remove(&self, id: u64) -> bool {
        self.lock().remove(&id).is_some()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<u64, PendingEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Handle for one in-flight request.
///
/// Dropping the handle before completion removes the entry, so an abandoned
/// call never leaks a table slot.
#[derive(Debug)]
pub struct PendingCall {
    id: u64,
    method: String,
    deadline: Instant,
    rx: Option<oneshot::Receiver<Outcome>>,
    table: Arc<CorrelationTable>,
}

impl PendingCall {
    /// The correlation id of this request.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Wait for the response or the deadline, whichever comes first.
    ///
    /// # Errors
    ///
    /// - [`QuerywireError::Timeout`] when the deadline passes first.
    /// - [`QuerywireError::Rpc`] when the peer answered with an error.
    /// - [`QuerywireError::Transport`] when the table dropped the entry
    ///   without answering.
    pub async fn wait(mut self) -> Result<Value> {
        let Some(rx) = self.rx.take() else {
            return Err(QuerywireError::Transport("pending call already consumed".into()).into());
        };

        match tokio::time::timeout_at(self.deadline, rx).await {
            Err(_elapsed) => {
                self.table.remove(self.id);
                tracing::debug!(id = self.id, method = %self.method, "request timed out");
                Err(QuerywireError::Timeout {
                    method: self.method.clone(),
                    id: self.id,
                }
                .into())
            }
            Ok(Err(_closed)) => Err(QuerywireError::Transport(format!(
                "request {} was dropped before a response arrived",
                self.id
            ))
            .into()),
            Ok(Ok(Err(rpc_error))) => Err(QuerywireError::from(rpc_error).into()),
            Ok(Ok(Ok(value))) => Ok(value),
        }
    }
}

impl Drop for PendingCall {
    fn drop(&mut self) {
        if self.rx.is_some() {
            self.table.remove(self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn kind(err: &anyhow::Error) -> &QuerywireError {
        err.downcast_ref::<QuerywireError>()
            .expect("expected a QuerywireError")
    }

    #[tokio::test]
    async fn test_resolve_fulfills_waiting_caller() {
        let table = CorrelationTable::new(Duration::from_secs(5));
        let call = table.register(1, "tools/list").unwrap();
        assert!(table.resolve(1, json!({"tools": []})));
        assert_eq!(call.wait().await.unwrap(), json!({"tools": []}));
        assert!(table.is_empty());
    }

    #[tokio::test]
    async fn test_reject_surfaces_rpc_error() {
        let table = CorrelationTable::new(Duration::from_secs(5));
        let call = table.register(2, "tools/call").unwrap();
        assert!(table.reject(2, JsonRpcError::handler("boom")));
        let err = call.wait().await.unwrap_err();
        match kind(&err) {
            QuerywireError::Rpc { code, message } => {
                assert_eq!(*code, -32000);
                assert_eq!(message, "boom");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_second_completion_is_a_no_op() {
        let table = CorrelationTable::new(Duration::from_secs(5));
        let call = table.register(3, "ping").unwrap();
        assert!(table.resolve(3, json!(1)));
        assert!(!table.resolve(3, json!(2)));
        assert!(!table.reject(3, JsonRpcError::internal("late")));
        assert_eq!(call.wait().await.unwrap(), json!(1));
    }

    #[tokio::test]
    async fn test_unknown_id_is_discarded() {
        let table = CorrelationTable::new(Duration::from_secs(5));
        assert!(!table.resolve(42, json!(null)));
    }

    #[tokio::test]
    async fn test_duplicate_registration_rejected() {
        let table = CorrelationTable::new(Duration::from_secs(5));
        let _call = table.register(7, "ping").unwrap();
        assert!(table.register(7, "ping").is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_then_late_response_is_ignored() {
        let table = CorrelationTable::new(Duration::from_secs(30));
        let call = table.register(4, "tools/call").unwrap();

        let err = call.wait().await.unwrap_err();
        assert!(kind(&err).is_timeout());
        assert!(!table.contains(4));

        // The late response finds no entry and does not resurrect the caller.
        assert!(!table.resolve(4, json!({"late": true})));
        assert!(table.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_counts_from_registration() {
        let table = CorrelationTable::new(Duration::from_secs(30));
        let call = table.register(5, "ping").unwrap();
        tokio::time::advance(Duration::from_secs(29)).await;

        let started = Instant::now();
        let err = call.wait().await.unwrap_err();
        assert!(kind(&err).is_timeout());
        assert!(started.elapsed() <= Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_dropped_handle_frees_slot() {
        let table = CorrelationTable::new(Duration::from_secs(5));
        let call = table.register(6, "ping").unwrap();
        assert_eq!(table.len(), 1);
        drop(call);
        assert!(table.is_empty());
        assert!(!table.resolve(6, json!(null)));
    }
}
