//! Transport adapters
//!
//! The RPC engine runs over any duplex byte stream. This module defines the
//! [`Connector`] trait the client session uses to (re)open such a stream,
//! plus two concrete implementations:
//!
//! - [`tcp::TcpConnector`] -- TCP socket, IPv4 resolution only.
//! - [`stdio::StdioConnector`] -- spawns `querywire serve --stdio` as a child
//!   process and talks over its stdin/stdout pipes.
//!
//! Framing, correlation and dispatch are shared; a transport only supplies
//! bytes.

use std::fmt;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::process::Child;

use crate::error::Result;

pub mod stdio;
pub mod tcp;

/// Boxed read half of a connection.
pub type BoxedReader = Box<dyn AsyncRead + Unpin + Send>;
/// Boxed write half of a connection.
pub type BoxedWriter = Box<dyn AsyncWrite + Unpin + Send>;

/// One freshly opened duplex byte stream.
pub struct Connection {
    pub reader: BoxedReader,
    pub writer: BoxedWriter,
    /// Human-readable description of the remote end.
    pub peer: String,
    /// Child process backing the stream, if any. Killed when dropped.
    pub child: Option<Child>,
}

impl Connection {
    pub fn new<R, W>(reader: R, writer: W, peer: impl Into<String>) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        Self {
            reader: Box::new(reader),
            writer: Box::new(writer),
            peer: peer.into(),
            child: None,
        }
    }

    /// Tie the lifetime of `child` to this connection.
    pub fn with_child(mut self, child: Child) -> Self {
        self.child = Some(child);
        self
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("peer", &self.peer)
            .field("child", &self.child.as_ref().and_then(Child::id))
            .finish_non_exhaustive()
    }
}

/// Opens connections for the client session.
///
/// Called once per explicit connect and once per reconnect attempt.
///
/// # Examples
///
/// ```no_run
/// use querywire::mcp::transport::{tcp::TcpConnector, Connector};
///
/// # #[tokio::main]
/// # async fn main() -> anyhow::Result<()> {
/// let connector = TcpConnector::new("localhost", 3001);
/// let conn = connector.connect().await?;
/// println!("connected to {}", conn.peer);
/// # Ok(())
/// # }
/// ```
#[async_trait]
pub trait Connector: Send + Sync + fmt::Debug {
    /// Open a new connection.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::QuerywireError::Transport`] if the endpoint
    /// cannot be reached.
    async fn connect(&self) -> Result<Connection>;

    /// Endpoint description for logs.
    fn endpoint(&self) -> String;
}
