//! Outbound connection establishment

use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::AsyncRead;
use tokio::net::TcpStream;

use super::config::ClientConfig;

/// Opens the byte stream the receive loop reads envelopes from
pub trait Connector: Send + Sync {
    type Stream: AsyncRead + Unpin + Send;

    /// Make one connection attempt
    fn connect(&self) -> impl Future<Output = std::io::Result<Self::Stream>> + Send;

    /// Human-readable endpoint for logs
    fn endpoint(&self) -> String;
}

/// TCP connector with a connect deadline
#[derive(Debug, Clone)]
pub struct TcpConnector {
    addr: SocketAddr,
    timeout: Duration,
    nodelay: bool,
}

impl TcpConnector {
    pub fn new(addr: SocketAddr, timeout: Duration) -> Self {
        Self {
            addr,
            timeout,
            nodelay: true,
        }
    }

    pub fn from_config(config: &ClientConfig) -> Self {
        Self {
            addr: config.server_addr,
            timeout: config.connect_timeout,
            nodelay: config.tcp_nodelay,
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }
}

impl Connector for TcpConnector {
    type Stream = TcpStream;

    async fn connect(&self) -> std::io::Result<TcpStream> {
        let stream = tokio::time::timeout(self.timeout, TcpStream::connect(self.addr))
            .await
            .map_err(|_| {
                std::io::Error::new(std::io::ErrorKind::TimedOut, "connect timed out")
            })??;

        if self.nodelay {
            stream.set_nodelay(true)?;
        }
        Ok(stream)
    }

    fn endpoint(&self) -> String {
        self.addr.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_connects_to_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let connector = TcpConnector::new(addr, Duration::from_secs(1));

        let (stream, accepted) = tokio::join!(connector.connect(), listener.accept());
        let stream = stream.unwrap();
        let (_, peer) = accepted.unwrap();

        assert_eq!(stream.local_addr().unwrap(), peer);
        assert_eq!(connector.endpoint(), addr.to_string());
    }

    #[tokio::test]
    async fn test_refused_connection_fails() {
        let addr = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap()
        };
        let connector = TcpConnector::new(addr, Duration::from_secs(1));

        assert!(connector.connect().await.is_err());
    }
}
