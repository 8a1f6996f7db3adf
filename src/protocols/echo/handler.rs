//! Echo protocol handler for the Tokio runtime.

use bytes::BytesMut;
use std::io;
use std::net::SocketAddr;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, warn};

use super::parser::{self, Command};

/// Why the exchange loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// Peer closed its write half (read returned zero bytes).
    PeerClosed,
    /// Peer sent the shutdown keyword and got the farewell.
    ShutdownRequested,
    /// Connection reset, aborted, or the pipe broke.
    Reset,
    /// Any other I/O error.
    Failed,
}

/// Outcome of a finished connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionSummary {
    pub reason: CloseReason,
    /// Echo replies written, the farewell not included.
    pub messages: u64,
}

/// Handle an echo protocol connection.
///
/// Reads at most `read_cap` bytes at a time and answers each read with one
/// reply. Errors never escape: they end this connection only, and the
/// socket is always shut down before returning.
pub async fn handle_connection<S>(mut stream: S, peer: SocketAddr, read_cap: usize) -> ConnectionSummary
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut buffer = BytesMut::zeroed(read_cap.max(1));
    let mut messages = 0;

    let reason = match exchange(&mut stream, &mut buffer, peer, &mut messages).await {
        Ok(reason) => reason,
        Err(e) if is_reset(&e) => {
            info!(peer = %peer, error = %e, "Connection lost");
            CloseReason::Reset
        }
        Err(e) => {
            warn!(peer = %peer, error = %e, "Connection error");
            CloseReason::Failed
        }
    };

    info!(peer = %peer, ?reason, messages, "Closing connection");
    if let Err(e) = stream.shutdown().await {
        debug!(peer = %peer, error = %e, "Shutdown after close failed");
    }

    ConnectionSummary { reason, messages }
}

async fn exchange<S>(
    stream: &mut S,
    buffer: &mut BytesMut,
    peer: SocketAddr,
    messages: &mut u64,
) -> io::Result<CloseReason>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    loop {
        let n = stream.read(&mut buffer[..]).await?;
        if n == 0 {
            debug!(peer = %peer, "Connection closed by client");
            return Ok(CloseReason::PeerClosed);
        }

        match parser::parse(&buffer[..n]) {
            Command::Shutdown => {
                info!(peer = %peer, "Client requested shutdown");
                stream.write_all(parser::response_farewell()).await?;
                stream.flush().await?;
                return Ok(CloseReason::ShutdownRequested);
            }
            Command::Echo(text) => {
                info!(peer = %peer, payload = %text, "Message received");
                stream.write_all(&parser::response_echo(&text)).await?;
                stream.flush().await?;
                *messages += 1;
            }
        }
    }
}

/// Errors that mean the peer went away rather than something broke.
pub(crate) fn is_reset(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::UnexpectedEof
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use tokio_test::io::Builder;

    /// Log sink shared between the subscriber and the test.
    #[derive(Clone, Default)]
    struct LogBuffer(Arc<Mutex<Vec<u8>>>);

    impl io::Write for LogBuffer {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn peer() -> SocketAddr {
        "127.0.0.1:50000".parse().unwrap()
    }

    #[tokio::test]
    async fn test_echo_then_eof() {
        let mock = Builder::new()
            .read(b"hello")
            .write(b"Server received: hello")
            .read(b"second")
            .write(b"Server received: second")
            .build();

        let summary = handle_connection(mock, peer(), 100).await;
        assert_eq!(summary.reason, CloseReason::PeerClosed);
        assert_eq!(summary.messages, 2);
    }

    #[tokio::test]
    async fn test_shutdown_sends_only_farewell() {
        let mock = Builder::new()
            .read(b"hello")
            .write(b"Server received: hello")
            .read(b"SHUTDOWN")
            .write(b"Server is shutting down. Goodbye!")
            .build();

        let summary = handle_connection(mock, peer(), 100).await;
        assert_eq!(summary.reason, CloseReason::ShutdownRequested);
        assert_eq!(summary.messages, 1);
    }

    #[tokio::test]
    async fn test_reset_mid_read_closes() {
        let mock = Builder::new()
            .read(b"hi")
            .write(b"Server received: hi")
            .read_error(io::Error::new(io::ErrorKind::ConnectionReset, "reset"))
            .build();

        let summary = handle_connection(mock, peer(), 100).await;
        assert_eq!(summary.reason, CloseReason::Reset);
    }

    #[tokio::test]
    async fn test_other_error_is_contained() {
        let mock = Builder::new()
            .read_error(io::Error::new(io::ErrorKind::InvalidData, "bad"))
            .build();

        let summary = handle_connection(mock, peer(), 100).await;
        assert_eq!(summary.reason, CloseReason::Failed);
        assert_eq!(summary.messages, 0);
    }

    #[tokio::test]
    async fn test_payload_longer_than_cap_is_truncated() {
        let payload = [b'a'; 10];
        let mock = Builder::new()
            .read(&payload)
            .write(b"Server received: aaaa")
            .write(b"Server received: aaaa")
            .write(b"Server received: aa")
            .build();

        let summary = handle_connection(mock, peer(), 4).await;
        assert_eq!(summary.reason, CloseReason::PeerClosed);
        assert_eq!(summary.messages, 3);
    }

    #[tokio::test]
    async fn test_payload_logged_under_its_own_field() {
        let logs = LogBuffer::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let mock = Builder::new()
            .read(b"hello")
            .write(b"Server received: hello")
            .build();
        handle_connection(mock, peer(), 100).await;

        let output = String::from_utf8(logs.0.lock().unwrap().clone()).unwrap();
        assert!(output.contains("Message received"));
        assert!(output.contains("payload=hello"));
    }

    #[test]
    fn test_is_reset() {
        assert!(is_reset(&io::Error::from(io::ErrorKind::ConnectionReset)));
        assert!(is_reset(&io::Error::from(io::ErrorKind::BrokenPipe)));
        assert!(!is_reset(&io::Error::from(io::ErrorKind::PermissionDenied)));
    }
}
