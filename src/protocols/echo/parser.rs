//! Echo protocol parser.

use bytes::{BufMut, BytesMut};

/// Tag prepended to every echoed payload.
pub const REPLY_PREFIX: &str = "Server received: ";

/// Reply sent instead of an echo when a client asks to be disconnected.
pub const FAREWELL: &str = "Server is shutting down. Goodbye!";

/// Payload that asks the server to close this connection.
pub const SHUTDOWN_KEYWORD: &str = "shutdown";

/// Parsed echo command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Echo the decoded text back with the reply tag.
    Echo(String),
    /// Send the farewell and close the connection.
    Shutdown,
}

/// Classify one raw read.
///
/// There is no framing: whatever a single read returned is one message.
/// Bytes that are not valid UTF-8, including a code point split by the
/// read cap, are replaced with U+FFFD.
pub fn parse(input: &[u8]) -> Command {
    let text = String::from_utf8_lossy(input);

    if text.eq_ignore_ascii_case(SHUTDOWN_KEYWORD) {
        Command::Shutdown
    } else {
        Command::Echo(text.into_owned())
    }
}

/// Format an echo reply.
pub fn response_echo(text: &str) -> BytesMut {
    let mut resp = BytesMut::with_capacity(REPLY_PREFIX.len() + text.len());
    resp.put_slice(REPLY_PREFIX.as_bytes());
    resp.put_slice(text.as_bytes());
    resp
}

/// Format the farewell reply.
pub fn response_farewell() -> &'static [u8] {
    FAREWELL.as_bytes()
}
