//! TCP transport with optional TLS
//!
//! One connection per fetch. Responses are read until the server closes
//! the connection.

use crate::error::UptredError;
use crate::http::endpoint::{Endpoint, Scheme};
use crate::http::tls;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Size of each response read
pub const READ_BLOCK_SIZE: usize = 8 * 1024;

pub enum Transport {
    Plain(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
}

impl Transport {
    /// Open a connection to `endpoint`, upgrading to TLS for `https`.
    ///
    /// `timeout` covers both the TCP connect and the handshake.
    pub async fn connect(
        endpoint: &Endpoint,
        connector: &TlsConnector,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<Self, UptredError> {
        let host = endpoint.host().trim_matches(|c| c == '[' || c == ']');
        let port = endpoint.port();

        let connect = async {
            let tcp = TcpStream::connect((host, port))
                .await
                .map_err(|source| UptredError::Connection {
                    host: host.to_string(),
                    port,
                    source,
                })?;
            debug!("Connected to {}:{}", host, port);

            match endpoint.scheme() {
                Scheme::Http => Ok::<_, UptredError>(Transport::Plain(tcp)),
                Scheme::Https => {
                    let name = tls::server_name(host)?;
                    let stream = connector
                        .connect(name, tcp)
                        .await
                        .map_err(|e| UptredError::Tls(format!("handshake with {} failed: {}", host, e)))?;
                    debug!("TLS established with {}", host);
                    Ok(Transport::Tls(Box::new(stream)))
                }
            }
        };

        tokio::select! {
            _ = cancel.cancelled() => Err(UptredError::Cancelled),
            result = tokio::time::timeout(timeout, connect) => {
                result.map_err(|_| UptredError::Timeout("connect"))?
            }
        }
    }

    pub fn is_tls(&self) -> bool {
        matches!(self, Transport::Tls(_))
    }
}

/// Read until the peer closes the connection.
///
/// Each read waits at most `idle` for data and stops early when `cancel`
/// fires. A TLS peer that closes without `close_notify` ends the stream
/// like a clean close.
pub async fn receive_all<R>(
    reader: &mut R,
    idle: Duration,
    cancel: &CancellationToken,
) -> Result<Vec<u8>, UptredError>
where
    R: AsyncRead + Unpin,
{
    let mut response = Vec::new();
    let mut block = vec![0u8; READ_BLOCK_SIZE];

    loop {
        let read = tokio::select! {
            _ = cancel.cancelled() => return Err(UptredError::Cancelled),
            result = tokio::time::timeout(idle, reader.read(&mut block)) => {
                result.map_err(|_| UptredError::Timeout("read"))?
            }
        };

        let n = match read {
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => 0,
            Err(e) => return Err(e.into()),
        };
        if n == 0 {
            break;
        }
        response.extend_from_slice(&block[..n]);
    }

    debug!("Received {} response bytes", response.len());
    Ok(response)
}

impl AsyncRead for Transport {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Transport::Plain(stream) => Pin::new(stream).poll_read(cx, buf),
            Transport::Tls(stream) => Pin::new(stream.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for Transport {
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            Transport::Plain(stream) => Pin::new(stream).poll_write(cx, buf),
            Transport::Tls(stream) => Pin::new(stream.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Transport::Plain(stream) => Pin::new(stream).poll_flush(cx),
            Transport::Tls(stream) => Pin::new(stream.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Transport::Plain(stream) => Pin::new(stream).poll_shutdown(cx),
            Transport::Tls(stream) => Pin::new(stream.as_mut()).poll_shutdown(cx),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;
    use uptred_types::CertificatePolicy;

    #[tokio::test]
    async fn test_receive_all_concatenates_until_close() {
        let mut mock = tokio_test::io::Builder::new()
            .read(b"HTTP/1.1 200 OK\r\n")
            .read(b"\r\n")
            .read(b"body")
            .build();
        let cancel = CancellationToken::new();
        let bytes = receive_all(&mut mock, Duration::from_secs(5), &cancel).await.unwrap();
        assert_eq!(bytes, b"HTTP/1.1 200 OK\r\n\r\nbody");
    }

    #[tokio::test]
    async fn test_receive_all_spans_many_blocks() {
        let (mut client, mut server) = tokio::io::duplex(1024);
        let payload: Vec<u8> = (0..READ_BLOCK_SIZE * 3 + 17).map(|i| (i % 256) as u8).collect();
        let expected = payload.clone();
        tokio::spawn(async move {
            server.write_all(&payload).await.unwrap();
        });

        let cancel = CancellationToken::new();
        let bytes = receive_all(&mut client, Duration::from_secs(5), &cancel).await.unwrap();
        assert_eq!(bytes, expected);
    }

    #[tokio::test]
    async fn test_idle_server_times_out() {
        let (mut client, _server) = tokio::io::duplex(64);
        let cancel = CancellationToken::new();
        let err = receive_all(&mut client, Duration::from_millis(50), &cancel).await.unwrap_err();
        assert!(matches!(err, UptredError::Timeout("read")));
    }

    #[tokio::test]
    async fn test_cancel_interrupts_read() {
        let (mut client, _server) = tokio::io::duplex(64);
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });
        let err = receive_all(&mut client, Duration::from_secs(30), &cancel).await.unwrap_err();
        assert!(matches!(err, UptredError::Cancelled));
    }

    #[tokio::test]
    async fn test_connect_plain() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let _ = listener.accept().await;
        });

        let endpoint = Endpoint::parse(&format!("http://127.0.0.1:{}/", port), "GET").unwrap();
        let connector = tls::connector(CertificatePolicy::Strict);
        let transport = Transport::connect(&endpoint, &connector, Duration::from_secs(5), &CancellationToken::new())
            .await
            .unwrap();
        assert!(!transport.is_tls());
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let endpoint = Endpoint::parse(&format!("http://127.0.0.1:{}/", port), "GET").unwrap();
        let connector = tls::connector(CertificatePolicy::Strict);
        let err = Transport::connect(&endpoint, &connector, Duration::from_secs(5), &CancellationToken::new())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, UptredError::Connection { port: p, .. } if p == port));
    }
}
