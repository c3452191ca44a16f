//! TCP connector with forced IPv4 resolution

use std::net::SocketAddr;

use async_trait::async_trait;
use tokio::net::TcpStream;

use crate::error::{QuerywireError, Result};
use crate::mcp::transport::{Connection, Connector};

/// Connects to `host:port` over TCP.
///
/// Name resolution keeps only IPv4 addresses, so `localhost` never lands on
/// `::1` when the server listens on `127.0.0.1`.
#[derive(Debug, Clone)]
pub struct TcpConnector {
    host: String,
    port: u16,
}

impl TcpConnector {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Resolve the first IPv4 address for the configured endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`QuerywireError::Transport`] when resolution fails or
    /// yields no IPv4 address.
    pub async fn resolve_ipv4(&self) -> Result<SocketAddr> {
        let addrs = tokio::net::lookup_host((self.host.as_str(), self.port))
            .await
            .map_err(|e| {
                QuerywireError::Transport(format!("failed to resolve {}: {e}", self.endpoint()))
            })?;

        addrs.into_iter().find(SocketAddr::is_ipv4).ok_or_else(|| {
            QuerywireError::Transport(format!("no IPv4 address for {}", self.endpoint())).into()
        })
    }
}

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(&self) -> Result<Connection> {
        let addr = self.resolve_ipv4().await?;
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|e| QuerywireError::Transport(format!("connect to {addr} failed: {e}")))?;
        stream.set_nodelay(true)?;

        tracing::info!(%addr, "connected");
        let (reader, writer) = stream.into_split();
        Ok(Connection::new(reader, writer, addr.to_string()))
    }

    fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_localhost_resolves_to_ipv4() {
        let connector = TcpConnector::new("localhost", 3001);
        let addr = connector.resolve_ipv4().await.unwrap();
        assert!(addr.is_ipv4());
        assert_eq!(addr.port(), 3001);
    }

    #[tokio::test]
    async fn test_connect_to_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let accept = tokio::spawn(async move { listener.accept().await.map(|_| ()) });

        let conn = TcpConnector::new("localhost", port).connect().await.unwrap();
        assert_eq!(conn.peer, format!("127.0.0.1:{port}"));
        accept.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_connect_refused_is_transport_error() {
        // Bind then drop to obtain a port with nothing listening.
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };
        let err = TcpConnector::new("127.0.0.1", port)
            .connect()
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<QuerywireError>(),
            Some(QuerywireError::Transport(_))
        ));
    }
}
