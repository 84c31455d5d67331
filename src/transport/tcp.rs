//! TCP listener used by both the stack port and the diagnostics port.
//!
//! # Example
//!
//! ```ignore
//! use lifo_server::transport::StackListener;
//!
//! let listener = StackListener::bind("127.0.0.1", 0).await?;
//! println!("listening on {}", listener.local_addr());
//! let (stream, peer) = listener.accept().await?;
//! ```

use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};

use crate::error::Result;

/// Pause after a failed accept so a persistent fault (e.g. fd exhaustion) does not spin.
pub const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(50);

/// Bound TCP listener.
#[derive(Debug)]
pub struct StackListener {
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl StackListener {
    /// Bind to `host:port`. Port 0 picks an ephemeral port.
    pub async fn bind(host: &str, port: u16) -> Result<Self> {
        let listener = TcpListener::bind((host, port)).await?;
        let local_addr = listener.local_addr()?;
        Ok(Self {
            listener,
            local_addr,
        })
    }

    /// Bind to an already resolved address.
    pub async fn bind_addr(addr: SocketAddr) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        Ok(Self {
            listener,
            local_addr,
        })
    }

    /// Accept a single connection.
    ///
    /// Disables Nagle so single-byte responses leave immediately.
    pub async fn accept(&self) -> Result<(TcpStream, SocketAddr)> {
        let (stream, peer) = self.listener.accept().await?;
        stream.set_nodelay(true)?;
        Ok((stream, peer))
    }

    /// Address actually bound.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LifoError;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn test_bind_ephemeral_port() {
        let listener = StackListener::bind("127.0.0.1", 0).await.unwrap();
        assert_ne!(listener.local_addr().port(), 0);
        assert!(listener.local_addr().ip().is_loopback());
    }

    #[tokio::test]
    async fn test_bind_addr_in_use() {
        let first = StackListener::bind("127.0.0.1", 0).await.unwrap();
        let result = StackListener::bind_addr(first.local_addr()).await;
        assert!(matches!(result, Err(LifoError::Io(_))));
    }

    #[tokio::test]
    async fn test_accept_connection() {
        let listener = StackListener::bind("127.0.0.1", 0).await.unwrap();
        let addr = listener.local_addr();

        let client = tokio::spawn(async move {
            let mut stream = TcpStream::connect(addr).await.unwrap();
            stream.write_all(b"ping").await.unwrap();
            let local = stream.local_addr().unwrap();
            drop(stream);
            local
        });

        let (mut stream, peer) = listener.accept().await.unwrap();
        let mut buf = Vec::new();
        stream.read_to_end(&mut buf).await.unwrap();

        assert_eq!(buf, b"ping");
        assert_eq!(peer, client.await.unwrap());
    }
}
