//! Error types for Querywire
//!
//! This module defines all error types used throughout the crate,
//! using `thiserror` for ergonomic error handling. The variants follow the
//! layers of the RPC engine: transport faults, frame parse faults, request
//! timeouts, protocol faults, handler faults, and the terminal reconnect
//! condition.

use thiserror::Error;

use crate::mcp::types::JsonRpcError;

/// Main error type for Querywire operations
#[derive(Error, Debug)]
pub enum QuerywireError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Socket-level connect/read/write failure
    #[error("Transport error: {0}")]
    Transport(String),

    /// A frame failed structural decoding
    #[error("Parse error: {0}")]
    Parse(String),

    /// No response arrived before the request deadline
    #[error("Request timeout: method={method}, id={id}")]
    Timeout {
        /// Method of the request that timed out
        method: String,
        /// Correlation id of the request that timed out
        id: u64,
    },

    /// Unknown method, malformed params, or another protocol violation
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// A tool, prompt, or resource handler failed
    #[error("Handler error: {0}")]
    Handler(String),

    /// The remote peer answered with a JSON-RPC error response
    #[error("RPC error {code}: {message}")]
    Rpc {
        /// JSON-RPC error code
        code: i64,
        /// Error message supplied by the peer
        message: String,
    },

    /// A request was issued while no connection is live
    #[error("Not connected")]
    NotConnected,

    /// The client gave up reconnecting
    #[error("Reconnect budget exhausted after {attempts} attempts")]
    ReconnectBudgetExhausted {
        /// Number of reconnect attempts made before giving up
        attempts: u32,
    },

    /// Query-execution backend errors, including rejected statements
    #[error("Query error: {0}")]
    Query(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML parsing errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// SQLite backend errors
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),
}

impl QuerywireError {
    /// Returns `true` for [`QuerywireError::Timeout`].
    pub fn is_timeout(&self) -> bool {
        matches!(self, QuerywireError::Timeout { .. })
    }

    /// Returns `true` for [`QuerywireError::NotConnected`].
    pub fn is_not_connected(&self) -> bool {
        matches!(self, QuerywireError::NotConnected)
    }
}

impl From<JsonRpcError> for QuerywireError {
    fn from(err: JsonRpcError) -> Self {
        QuerywireError::Rpc {
            code: err.code,
            message: err.message,
        }
    }
}

/// Result type alias for Querywire operations
///
/// Uses `anyhow::Error` so context can be attached while propagating.
/// Callers that need to branch on a specific kind use
/// `err.downcast_ref::<QuerywireError>()`.
pub type Result<T> = anyhow::Result<T>;
