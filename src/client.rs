//! Interactive client for the tagged echo protocol.
//!
//! Strict request/response alternation: one operator line out, one read
//! back. The client never sends a second message before the first reply
//! has arrived.

use bytes::BytesMut;
use std::io;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::protocols::echo::handler::is_reset;
use crate::protocols::echo::parser::SHUTDOWN_KEYWORD;

const PROMPT: &[u8] = b"Enter a message to send (type 'exit' to quit): ";

/// How a client session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// Operator typed `exit`; the shutdown keyword was sent.
    LocalExit,
    /// Server closed or reset the connection.
    ServerClosed,
    /// Nothing was listening at the address.
    NoServer,
}

/// Connect using the configured address and run against the process console.
pub async fn start(config: &Config) -> io::Result<SessionEnd> {
    let operator = tokio::io::BufReader::new(tokio::io::stdin());
    run_session(&config.address, config.read_buffer, operator, tokio::io::stdout()).await
}

/// Connect to `address` and exchange operator lines with the server.
///
/// A refused connection is not an error: it is reported on the console and
/// the session ends as [`SessionEnd::NoServer`] without sending anything.
pub async fn run_session<R, W>(
    address: &str,
    read_cap: usize,
    operator: R,
    mut console: W,
) -> io::Result<SessionEnd>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let result = match TcpStream::connect(address).await {
        Ok(stream) => {
            info!(address, "Connected");
            say(&mut console, &format!("Connected to server at {address}")).await?;
            converse(stream, read_cap, operator, &mut console).await
        }
        Err(e) if e.kind() == io::ErrorKind::ConnectionRefused => {
            warn!(address, "Connection refused");
            say(
                &mut console,
                &format!("No server found at {address}. Please make sure the server is running."),
            )
            .await?;
            Ok(SessionEnd::NoServer)
        }
        Err(e) => Err(e),
    };

    say(&mut console, "Client exiting...").await?;
    result
}

/// Run the prompt/send/print loop over an established stream.
///
/// Each reply is a single read of at most `read_cap` bytes. A server reply
/// can be up to the reply tag longer than that, and any bytes left unread
/// are printed as the reply to the next message.
///
/// The stream is shut down before returning on every path.
pub async fn converse<S, R, W>(
    mut stream: S,
    read_cap: usize,
    operator: R,
    console: &mut W,
) -> io::Result<SessionEnd>
where
    S: AsyncRead + AsyncWrite + Unpin,
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let result = exchange(&mut stream, read_cap, operator, console).await;

    if let Err(e) = stream.shutdown().await {
        debug!(error = %e, "Shutdown after session failed");
    }
    result
}

async fn exchange<S, R, W>(
    stream: &mut S,
    read_cap: usize,
    operator: R,
    console: &mut W,
) -> io::Result<SessionEnd>
where
    S: AsyncRead + AsyncWrite + Unpin,
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = operator.lines();
    let mut reply = BytesMut::zeroed(read_cap.max(1));

    loop {
        console.write_all(PROMPT).await?;
        console.flush().await?;

        // End of operator input is treated as `exit`.
        let line = lines.next_line().await?.unwrap_or_else(|| "exit".to_string());
        let message = line.trim();

        if message.is_empty() {
            // Nothing would be sent, so no reply would ever arrive.
            continue;
        }

        if message.eq_ignore_ascii_case("exit") {
            say(console, "Disconnecting from server...").await?;
            stream.write_all(SHUTDOWN_KEYWORD.as_bytes()).await?;
            stream.flush().await?;
            return Ok(SessionEnd::LocalExit);
        }

        if let Err(e) = send(stream, message).await {
            return closed_or(e, console).await;
        }

        let n = match stream.read(&mut reply[..]).await {
            Ok(n) => n,
            Err(e) => return closed_or(e, console).await,
        };
        if n == 0 {
            say(console, "Server has closed the connection.").await?;
            return Ok(SessionEnd::ServerClosed);
        }

        let text = String::from_utf8_lossy(&reply[..n]);
        say(console, &format!("Message from server: {text}")).await?;
    }
}

async fn send<S: AsyncWrite + Unpin>(stream: &mut S, message: &str) -> io::Result<()> {
    stream.write_all(message.as_bytes()).await?;
    stream.flush().await
}

/// Map a reset to a server-side close; anything else is a real error.
async fn closed_or<W: AsyncWrite + Unpin>(e: io::Error, console: &mut W) -> io::Result<SessionEnd> {
    if is_reset(&e) {
        debug!(error = %e, "Connection reset by server");
        say(console, "Server has closed the connection.").await?;
        Ok(SessionEnd::ServerClosed)
    } else {
        Err(e)
    }
}

async fn say<W: AsyncWrite + Unpin>(console: &mut W, line: &str) -> io::Result<()> {
    console.write_all(line.as_bytes()).await?;
    console.write_all(b"\n").await?;
    console.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;
    use tokio_test::io::Builder;

    fn text(console: Vec<u8>) -> String {
        String::from_utf8(console).unwrap()
    }

    #[tokio::test]
    async fn test_message_then_exit() {
        let mock = Builder::new()
            .write(b"hello")
            .read(b"Server received: hello")
            .write(b"shutdown")
            .build();
        let mut console = Vec::new();

        let end = converse(mock, 100, &b"hello\nexit\n"[..], &mut console)
            .await
            .unwrap();

        assert_eq!(end, SessionEnd::LocalExit);
        let out = text(console);
        assert!(out.contains("Message from server: Server received: hello\n"));
        assert!(out.contains("Disconnecting from server...\n"));
    }

    #[tokio::test]
    async fn test_exit_is_case_insensitive_and_trimmed() {
        let mock = Builder::new().write(b"shutdown").build();
        let mut console = Vec::new();

        let end = converse(mock, 100, &b"  ExIt  \n"[..], &mut console)
            .await
            .unwrap();
        assert_eq!(end, SessionEnd::LocalExit);
    }

    #[tokio::test]
    async fn test_empty_lines_are_not_sent() {
        let mock = Builder::new().write(b"shutdown").build();
        let mut console = Vec::new();

        let end = converse(mock, 100, &b"\n   \nexit\n"[..], &mut console)
            .await
            .unwrap();
        assert_eq!(end, SessionEnd::LocalExit);
    }

    #[tokio::test]
    async fn test_operator_eof_acts_as_exit() {
        let mock = Builder::new().write(b"shutdown").build();
        let mut console = Vec::new();

        let end = converse(mock, 100, &b""[..], &mut console).await.unwrap();
        assert_eq!(end, SessionEnd::LocalExit);
    }

    #[tokio::test]
    async fn test_server_close_ends_session() {
        // No read action queued: the mock reports end of stream.
        let mock = Builder::new().write(b"hi").build();
        let mut console = Vec::new();

        let end = converse(mock, 100, &b"hi\nnever sent\n"[..], &mut console)
            .await
            .unwrap();

        assert_eq!(end, SessionEnd::ServerClosed);
        assert!(text(console).contains("Server has closed the connection."));
    }

    #[tokio::test]
    async fn test_reset_ends_session() {
        let mock = Builder::new()
            .write(b"hi")
            .read_error(io::Error::new(io::ErrorKind::ConnectionReset, "reset"))
            .build();
        let mut console = Vec::new();

        let end = converse(mock, 100, &b"hi\n"[..], &mut console).await.unwrap();
        assert_eq!(end, SessionEnd::ServerClosed);
    }

    #[tokio::test]
    async fn test_unread_reply_tail_shows_up_on_next_read() {
        // A reply longer than the cap is not drained; the next exchange
        // prints its leftover bytes instead of the new reply.
        let mock = Builder::new()
            .write(b"hi")
            .read(b"ABCDEFGHIJKLMNOP")
            .write(b"yo")
            .write(b"shutdown")
            .build();
        let mut console = Vec::new();

        let end = converse(mock, 8, &b"hi\nyo\nexit\n"[..], &mut console)
            .await
            .unwrap();

        assert_eq!(end, SessionEnd::LocalExit);
        let out = text(console);
        assert!(out.contains("Message from server: ABCDEFGH\n"));
        assert!(out.contains("Message from server: IJKLMNOP\n"));
    }

    #[tokio::test]
    async fn test_refused_connection_sends_nothing() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let mut console = Vec::new();
        let end = run_session(&addr, 100, &b"hello\n"[..], &mut console)
            .await
            .unwrap();

        assert_eq!(end, SessionEnd::NoServer);
        let out = text(console);
        assert!(out.contains(&format!("No server found at {addr}.")));
        assert!(out.ends_with("Client exiting...\n"));
    }
}
