//! querywire - read-only database tools over line-delimited JSON-RPC
//!
//! This library provides both ends of a JSON-RPC 2.0 session carried as one
//! JSON object per line over TCP or stdio: a dispatcher that serves database
//! tools, prompts and resources, and a reconnecting client that calls them.
//!
//! # Architecture
//!
//! - `mcp`: framing, message model, client, server and transports
//! - `tools`: `get_tables`, `describe_table`, `execute_query`
//! - `db`: the query-execution seam and its SQLite implementation
//! - `prompts`: built-in prompt templates
//! - `cache`: TTL result cache used by the dispatcher
//! - `config`: configuration loading and validation
//! - `error`: error types and result aliases
//! - `cli`, `commands`, `logging`: the binary's surface
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use querywire::db::SqliteExecutor;
//! use querywire::mcp::server::{serve_tcp, Dispatcher};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let executor = Arc::new(SqliteExecutor::open("sales.db")?);
//!     let dispatcher = Arc::new(Dispatcher::new(executor));
//!     let listener = tokio::net::TcpListener::bind("127.0.0.1:3001").await?;
//!     serve_tcp(listener, dispatcher, CancellationToken::new()).await
//! }
//! ```

pub mod cache;
pub mod cli;
pub mod commands;
pub mod config;
pub mod db;
pub mod error;
pub mod logging;
pub mod mcp;
pub mod prompts;
pub mod tools;

// Re-export commonly used types
pub use cache::{CacheKey, ResultCache};
pub use config::Config;
pub use error::{QuerywireError, Result};
pub use mcp::{Dispatcher, McpClient};
