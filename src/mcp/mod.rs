//! Line-delimited JSON-RPC 2.0 over TCP and stdio
//!
//! # Module Layout
//!
//! - `types`     -- JSON-RPC primitives and the tool/prompt/resource payloads
//! - `codec`     -- `FrameCodec`, one JSON object per `\n`-terminated line
//! - `pending`   -- Correlation table matching responses to waiting callers
//! - `client`    -- `JsonRpcClient` over a single live connection
//! - `reconnect` -- Connection state machine and backoff policy
//! - `session`   -- `McpClient`, a reconnecting client with typed helpers
//! - `transport` -- `Connector` trait with TCP and child-process stdio
//! - `server`    -- `Dispatcher` and the TCP/stdio serve loops

pub mod client;
pub mod codec;
pub mod pending;
pub mod reconnect;
pub mod server;
pub mod session;
pub mod transport;
pub mod types;

pub use client::JsonRpcClient;
pub use server::Dispatcher;
pub use session::{ClientEvent, ClientOptions, McpClient};
pub use types::*;
