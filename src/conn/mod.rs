//! Per-connection stream endpoints and handler dispatch.
//!
//! Every accepted client socket is split into a [`ConnReader`] and a
//! [`ConnWriter`] and handed to the server's handler. Writes through
//! [`ConnWriter`] are flushed immediately, so each line is visible to the
//! peer before the handler's next operation proceeds. Both endpoints close
//! their half of the socket exactly once when dropped, on every exit path.

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, ReadBuf};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tracing::{debug, warn};

/// Error type a connection handler may return.
///
/// Handler failures are contained within their own dispatch task: the
/// connection's resources are released and a warning is emitted, and no other
/// connection or the accept loop is affected.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Buffered, line-oriented read endpoint of an accepted connection.
///
/// Also implements [`AsyncRead`] for handlers that want raw bytes.
#[derive(Debug)]
pub struct ConnReader {
    inner: BufReader<OwnedReadHalf>,
    peer_addr: SocketAddr,
}

impl ConnReader {
    fn new(half: OwnedReadHalf, peer_addr: SocketAddr) -> Self {
        Self {
            inner: BufReader::new(half),
            peer_addr,
        }
    }

    /// Returns the peer address of this connection.
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Reads one line, stripping the trailing `\n` or `\r\n`.
    ///
    /// Returns `Ok(None)` once the peer has closed its write side.
    pub async fn read_line(&mut self) -> io::Result<Option<String>> {
        let mut line = String::new();
        let n = self.inner.read_line(&mut line).await?;
        if n == 0 {
            return Ok(None);
        }
        if line.ends_with('\n') {
            line.pop();
            if line.ends_with('\r') {
                line.pop();
            }
        }
        Ok(Some(line))
    }
}

impl AsyncRead for ConnReader {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_read(cx, buf)
    }
}

/// Write endpoint of an accepted connection.
///
/// [`write_line`](Self::write_line) and [`send`](Self::send) flush after
/// every write. The raw [`AsyncWrite`] implementation leaves flushing to the
/// caller.
#[derive(Debug)]
pub struct ConnWriter {
    inner: OwnedWriteHalf,
    peer_addr: SocketAddr,
}

impl ConnWriter {
    fn new(half: OwnedWriteHalf, peer_addr: SocketAddr) -> Self {
        Self {
            inner: half,
            peer_addr,
        }
    }

    /// Returns the peer address of this connection.
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Writes `line` followed by `\n` and flushes.
    pub async fn write_line(&mut self, line: &str) -> io::Result<()> {
        self.inner.write_all(line.as_bytes()).await?;
        self.inner.write_all(b"\n").await?;
        self.inner.flush().await
    }

    /// Writes raw bytes and flushes.
    pub async fn send(&mut self, buf: &[u8]) -> io::Result<()> {
        self.inner.write_all(buf).await?;
        self.inner.flush().await
    }

    /// Flushes buffered data and shuts down the write side of the socket.
    pub async fn shutdown(&mut self) -> io::Result<()> {
        self.inner.shutdown().await
    }
}

impl AsyncWrite for ConnWriter {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().inner).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}

/// Splits an accepted stream into its handler-facing endpoints.
fn endpoints(stream: TcpStream, peer_addr: SocketAddr) -> (ConnReader, ConnWriter) {
    let (read_half, write_half) = stream.into_split();
    (
        ConnReader::new(read_half, peer_addr),
        ConnWriter::new(write_half, peer_addr),
    )
}

/// Runs the handler for one accepted connection.
///
/// Sets `TCP_NODELAY` so flushed writes reach the peer without batching,
/// invokes the handler with the connection's endpoints, and reports the
/// outcome. The endpoints are dropped — and the socket closed — whether the
/// handler completes, returns an error, or panics out of the task.
pub(crate) async fn dispatch<H, F>(stream: TcpStream, peer_addr: SocketAddr, handler: Arc<H>)
where
    H: Fn(ConnReader, ConnWriter) -> F + Send + Sync + 'static,
    F: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    if let Err(e) = stream.set_nodelay(true) {
        debug!(peer = %peer_addr, error = %e, "failed to set TCP_NODELAY");
    }
    let (reader, writer) = endpoints(stream, peer_addr);

    debug!(peer = %peer_addr, "dispatching connection to handler");
    match handler(reader, writer).await {
        Ok(()) => debug!(peer = %peer_addr, "handler completed"),
        Err(e) => warn!(peer = %peer_addr, error = %e, "handler fault"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    async fn accepted_pair() -> (TcpStream, TcpStream, SocketAddr) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).await.unwrap();
        let (server, peer) = listener.accept().await.unwrap();
        (client, server, peer)
    }

    #[tokio::test]
    async fn line_round_trip() {
        let (mut client, server, peer) = accepted_pair().await;
        let (mut reader, mut writer) = endpoints(server, peer);

        client.write_all(b"hello\r\n").await.unwrap();

        let line = reader.read_line().await.unwrap().unwrap();
        assert_eq!(line, "hello");

        writer.write_line("HELLO").await.unwrap();
        let mut buf = vec![0u8; 16];
        let n = client.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"HELLO\n");
    }

    #[tokio::test]
    async fn read_line_reports_eof_as_none() {
        let (client, server, peer) = accepted_pair().await;
        let (mut reader, _writer) = endpoints(server, peer);

        drop(client);
        assert!(reader.read_line().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn dispatch_closes_socket_after_handler_completes() {
        let (mut client, server, peer) = accepted_pair().await;

        dispatch(
            server,
            peer,
            Arc::new(|_reader: ConnReader, mut writer: ConnWriter| async move {
                writer.write_line("bye").await?;
                Ok(())
            }),
        )
        .await;

        let mut buf = Vec::new();
        client.read_to_end(&mut buf).await.unwrap(); // EOF once both halves dropped
        assert_eq!(buf, b"bye\n");
    }

    #[tokio::test]
    async fn dispatch_closes_socket_after_handler_fault() {
        let (mut client, server, peer) = accepted_pair().await;

        dispatch(
            server,
            peer,
            Arc::new(|_reader: ConnReader, _writer: ConnWriter| async move {
                Err::<(), HandlerError>("protocol violation".into())
            }),
        )
        .await;

        let mut buf = Vec::new();
        client.read_to_end(&mut buf).await.unwrap();
        assert!(buf.is_empty());
    }
}
