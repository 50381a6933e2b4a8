//! TCP connector.

use super::{Connection, Connector, FrameHandler};
use crate::config::ClientDefaults;
use crate::error::{Result, RpcError};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tracing::debug;

/// Opens plain TCP connections with a bounded connect wait.
#[derive(Debug, Clone)]
pub struct TcpConnector {
    connect_timeout: Duration,
}

impl Default for TcpConnector {
    fn default() -> Self {
        Self::new(ClientDefaults::CONNECT_TIMEOUT)
    }
}

impl TcpConnector {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

#[async_trait::async_trait]
impl Connector for TcpConnector {
    async fn connect(&self, address: &str, handler: Arc<dyn FrameHandler>) -> Result<Connection> {
        let stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(address))
            .await
            .map_err(|_| RpcError::Connect {
                address: address.to_string(),
                message: format!("timed out after {:?}", self.connect_timeout),
            })?
            .map_err(|e| RpcError::Connect {
                address: address.to_string(),
                message: e.to_string(),
            })?;
        stream.set_nodelay(true)?;

        debug!("TCP connection established to {}", address);
        Ok(Connection::spawn(stream, address, handler))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    struct Ignore;

    #[async_trait::async_trait]
    impl FrameHandler for Ignore {
        async fn on_frame(&self, _connection: &Connection, _frame: Bytes) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_connect_to_listener() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let conn = TcpConnector::default()
            .connect(&addr, Arc::new(Ignore))
            .await
            .unwrap();
        assert_eq!(conn.address(), addr);
        assert!(!conn.is_closed());
        conn.close();
    }

    #[tokio::test]
    async fn test_connect_to_dead_port_fails() {
        let result = TcpConnector::default()
            .connect("127.0.0.1:1", Arc::new(Ignore))
            .await;

        match result {
            Err(RpcError::Connect { address, .. }) => assert_eq!(address, "127.0.0.1:1"),
            other => panic!("Expected Connect error, got: {:?}", other),
        }
    }
}
