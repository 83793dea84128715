//! TCP transport and timeout-bounded stream helpers.
//!
//! # Example
//!
//! ```ignore
//! use cps_client::transport::{connect_timeout, Connector, TcpConnector};
//! use std::time::Duration;
//!
//! let stream = connect_timeout(&TcpConnector, "192.168.1.20:14785", Duration::from_secs(5)).await?;
//! ```

use std::future::Future;
use std::io::ErrorKind;
use std::pin::Pin;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::error::{CpsError, Result};

/// Boxed future returned by [`Connector::connect`].
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A bidirectional byte stream usable as a control or export connection.
pub trait ByteStream: AsyncRead + AsyncWrite + Send + Sync + Unpin + 'static {}

impl<T> ByteStream for T where T: AsyncRead + AsyncWrite + Send + Sync + Unpin + 'static {}

/// Type-erased connection.
pub type BoxedStream = Box<dyn ByteStream>;

/// Opens connections for the messenger and the export worker.
///
/// Implemented by [`TcpConnector`] in production; tests plug in in-memory
/// streams through the same seam.
pub trait Connector: Send + Sync + 'static {
    /// Connect to `address` (`host:port`).
    fn connect(&self, address: &str) -> BoxFuture<'static, Result<BoxedStream>>;
}

/// Plain TCP connector with `TCP_NODELAY` set.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpConnector;

impl Connector for TcpConnector {
    fn connect(&self, address: &str) -> BoxFuture<'static, Result<BoxedStream>> {
        let address = address.to_string();
        Box::pin(async move {
            let stream = TcpStream::connect(&address).await?;
            stream.set_nodelay(true)?;
            tracing::debug!("Connected to {}", address);
            Ok(Box::new(stream) as BoxedStream)
        })
    }
}

/// Connect through `connector`, failing with [`CpsError::Timeout`] after `timeout`.
pub async fn connect_timeout(
    connector: &dyn Connector,
    address: &str,
    timeout: Duration,
) -> Result<BoxedStream> {
    match tokio::time::timeout(timeout, connector.connect(address)).await {
        Ok(result) => result,
        Err(_) => Err(CpsError::Timeout),
    }
}

/// Fill `buf` completely from `reader`.
///
/// EOF before `buf` is full is reported as [`CpsError::ConnectionClosed`].
pub async fn read_exact_timeout<R>(reader: &mut R, buf: &mut [u8], timeout: Duration) -> Result<()>
where
    R: AsyncRead + Unpin + ?Sized,
{
    match tokio::time::timeout(timeout, reader.read_exact(buf)).await {
        Ok(Ok(_)) => Ok(()),
        Ok(Err(e)) if e.kind() == ErrorKind::UnexpectedEof => Err(CpsError::ConnectionClosed),
        Ok(Err(e)) => Err(CpsError::Io(e)),
        Err(_) => Err(CpsError::Timeout),
    }
}

/// Write all of `data` to `writer` and flush.
pub async fn write_all_timeout<W>(writer: &mut W, data: &[u8], timeout: Duration) -> Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let write = async {
        writer.write_all(data).await?;
        writer.flush().await
    };
    match tokio::time::timeout(timeout, write).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(CpsError::Io(e)),
        Err(_) => Err(CpsError::Timeout),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    #[tokio::test]
    async fn test_read_exact_timeout_reads_requested_bytes() {
        let (mut client, mut server) = duplex(64);
        server.write_all(b"hello world").await.unwrap();

        let mut buf = [0u8; 5];
        read_exact_timeout(&mut client, &mut buf, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(&buf, b"hello");

        let mut rest = [0u8; 6];
        read_exact_timeout(&mut client, &mut rest, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(&rest, b" world");
    }

    #[tokio::test]
    async fn test_read_exact_timeout_expires() {
        let (mut client, _server) = duplex(64);
        let mut buf = [0u8; 4];
        let result = read_exact_timeout(&mut client, &mut buf, Duration::from_millis(20)).await;
        assert!(matches!(result, Err(CpsError::Timeout)));
    }

    #[tokio::test]
    async fn test_read_exact_timeout_short_read_is_closed() {
        let (mut client, mut server) = duplex(64);
        server.write_all(b"ab").await.unwrap();
        drop(server);

        let mut buf = [0u8; 4];
        let result = read_exact_timeout(&mut client, &mut buf, Duration::from_secs(1)).await;
        assert!(matches!(result, Err(CpsError::ConnectionClosed)));
    }

    #[tokio::test]
    async fn test_write_all_timeout() {
        let (mut client, mut server) = duplex(64);
        write_all_timeout(&mut client, b"payload", Duration::from_secs(1))
            .await
            .unwrap();

        let mut buf = [0u8; 7];
        server.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"payload");
    }

    #[tokio::test]
    async fn test_tcp_connector_refused() {
        // Port 1 on localhost is essentially never listening.
        let result = connect_timeout(&TcpConnector, "127.0.0.1:1", Duration::from_secs(2)).await;
        assert!(result.is_err());
    }
}
