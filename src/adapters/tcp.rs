//! TCP Connector Adapter
//!
//! Opens one TCP stream per endpoint slot.

use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpStream;
use tracing::debug;

use crate::domain::ports::{Connector, Transport};
use crate::error::{Error, IoPhase, Result};

/// `Connector` over plain TCP
#[derive(Debug, Clone)]
pub struct TcpConnector {
    connect_timeout: Duration,
}

impl TcpConnector {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

impl Default for TcpConnector {
    fn default() -> Self {
        Self::new(Duration::from_secs(3))
    }
}

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(&self, addr: &str, slot: usize) -> Result<Transport> {
        let stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| Error::Timeout {
                phase: IoPhase::Connect,
                timeout: self.connect_timeout,
            })??;

        // Shard frames are small and latency bound
        stream.set_nodelay(true)?;

        debug!(addr, slot, local = ?stream.local_addr().ok(), "Slot connected");

        let (reader, writer) = stream.into_split();
        Ok(Transport::new(reader, writer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_connects_and_exchanges_bytes() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 4];
            socket.read_exact(&mut buf).await.unwrap();
            socket.write_all(&buf).await.unwrap();
        });

        let connector = TcpConnector::default();
        let mut transport = connector.connect(&addr, 0).await.unwrap();
        transport.writer.write_all(b"ping").await.unwrap();

        let mut echo = [0u8; 4];
        transport.reader.read_exact(&mut echo).await.unwrap();
        assert_eq!(&echo, b"ping");

        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_refused_connection_is_io_error() {
        // Bind then drop to get a port nobody listens on
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let connector = TcpConnector::new(Duration::from_secs(1));
        let result = connector.connect(&addr, 3).await;
        assert!(matches!(result, Err(Error::Io(_)) | Err(Error::Timeout { .. })));
    }
}
