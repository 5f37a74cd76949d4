//! Opening connections to the server under test.
//!
//! Every client opens each connection through a shared [`ConnectionFactory`], as
//! does the reachability check run before any client starts. [`TcpConnector`] is
//! the factory used when running from the command line, tests can plug in any
//! other byte stream.

use async_trait::async_trait;
use std::io;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

use crate::request::Endpoint;

/// Opens a fresh connection to an [`Endpoint`].
#[async_trait]
pub trait ConnectionFactory: Send + Sync + 'static {
    /// A bidirectional byte stream, one per request.
    type Connection: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    async fn connect(&self, endpoint: &Endpoint) -> io::Result<Self::Connection>;
}

/// Plain TCP connections, resolving the host on every connect.
#[derive(Clone, Copy, Debug, Default)]
pub struct TcpConnector;

#[async_trait]
impl ConnectionFactory for TcpConnector {
    type Connection = TcpStream;

    async fn connect(&self, endpoint: &Endpoint) -> io::Result<TcpStream> {
        let stream = TcpStream::connect((endpoint.host.as_str(), endpoint.port)).await?;
        trace!("connected to {}", endpoint);
        Ok(stream)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn tcp_connect() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            socket.write_all(b"pong").await.unwrap();
        });

        let endpoint = Endpoint {
            host: "127.0.0.1".to_string(),
            port,
        };
        let mut stream = TcpConnector.connect(&endpoint).await.unwrap();
        let mut reply = Vec::new();
        stream.read_to_end(&mut reply).await.unwrap();
        assert_eq!(reply, b"pong");
        server.await.unwrap();
    }

    #[tokio::test]
    async fn tcp_connect_refused() {
        // Bind then drop a listener to find a port nothing listens on.
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };
        let endpoint = Endpoint {
            host: "127.0.0.1".to_string(),
            port,
        };
        assert!(TcpConnector.connect(&endpoint).await.is_err());
    }
}
