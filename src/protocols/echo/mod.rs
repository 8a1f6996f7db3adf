//! Echo protocol implementation.
//!
//! Tagged echo over an unframed byte stream:
//! - Client sends: any bytes
//! - Server replies: `Server received: <bytes as text>`
//!
//! ## Protocol Format
//!
//! There is no framing. Whatever one socket read returns, up to the read
//! cap, is treated as one message and answered with one reply. A payload
//! longer than the cap is split across several reads and therefore several
//! replies; it is never reassembled.
//!
//! ```text
//! Request:  hello
//! Response: Server received: hello
//!
//! Request:  shutdown
//! Response: Server is shutting down. Goodbye!
//! (server closes the connection)
//! ```
//!
//! The `shutdown` keyword is matched case-insensitively against the whole
//! payload, with no trimming.

pub mod handler;
pub mod parser;

pub use handler::{handle_connection, ConnectionSummary};
