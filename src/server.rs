//! TCP server for the tagged echo protocol.
//!
//! Runs two activities side by side on one runtime: the accept loop, which
//! spawns one echo handler task per connection, and the operator watcher,
//! which reads console lines until it sees `exit`. The watcher signals the
//! accept loop through a `watch` channel; the accept loop then drops the
//! listener. Handlers that were already accepted are left to finish on
//! their own and are awaited before `run` returns.

use std::io;
use std::net::SocketAddr;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::protocols::echo::{self, ConnectionSummary};

/// Lifecycle of the listening side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Listening,
    /// Operator asked to stop; the listener is being dropped.
    ShuttingDown,
    /// Listener closed. Terminal.
    Stopped,
}

/// What a finished `run` reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServeSummary {
    pub state: ServerState,
    /// Connections accepted over the server's lifetime.
    pub accepted: u64,
}

/// A bound, not yet running, server.
pub struct Server {
    listener: TcpListener,
    local_addr: SocketAddr,
    read_cap: usize,
}

impl Server {
    /// Resolve `address` and bind a listener to it.
    ///
    /// Failure here is fatal for the caller; there is no retry.
    pub async fn bind(address: &str, backlog: i32, read_cap: usize) -> Result<Self, ServerError> {
        let addr = tokio::net::lookup_host(address)
            .await
            .map_err(|e| ServerError::Resolve(address.to_string(), e))?
            .next()
            .ok_or_else(|| {
                ServerError::Resolve(
                    address.to_string(),
                    io::Error::new(io::ErrorKind::NotFound, "no addresses resolved"),
                )
            })?;

        let listener = create_listener(addr, backlog)
            .and_then(TcpListener::from_std)
            .map_err(|e| ServerError::Bind(addr, e))?;
        let local_addr = listener.local_addr().map_err(|e| ServerError::Bind(addr, e))?;

        info!(address = %local_addr, "Server listening");

        Ok(Server {
            listener,
            local_addr,
            read_cap,
        })
    }

    /// Address actually bound (differs from the requested one for port 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Serve until the operator types `exit`, then wait for open
    /// connections to finish.
    ///
    /// `operator` supplies console lines and `console` receives prompts.
    /// End of operator input counts as `exit`.
    pub async fn run<R, W>(self, operator: R, mut console: W) -> Result<ServeSummary, ServerError>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let Server {
            listener,
            local_addr,
            read_cap,
        } = self;

        say(&mut console, &format!("Server started on {local_addr}"))
            .await
            .map_err(ServerError::Console)?;
        say(&mut console, "Type 'exit' to shut down the server.")
            .await
            .map_err(ServerError::Console)?;

        let (state_tx, state_rx) = watch::channel(ServerState::Listening);

        let ((mut handlers, accepted), watched) = tokio::join!(
            accept_loop(listener, read_cap, state_rx),
            watch_operator(operator, &mut console, &state_tx),
        );

        state_tx.send_replace(ServerState::Stopped);
        info!(accepted, "Listener closed");

        if let Err(e) = watched {
            warn!(error = %e, "Operator console failed; shutting down");
        }

        if !handlers.is_empty() {
            info!(open = handlers.len(), "Waiting for open connections to close");
        }
        while let Some(joined) = handlers.join_next().await {
            reap(joined);
        }

        say(&mut console, "Server has stopped.")
            .await
            .map_err(ServerError::Console)?;

        let state = *state_tx.borrow();
        Ok(ServeSummary { state, accepted })
    }
}

/// Bind using the configured address and run against the process console.
pub async fn start(config: &Config) -> Result<ServeSummary, ServerError> {
    let server = Server::bind(&config.address, config.backlog, config.read_buffer).await?;
    let operator = tokio::io::BufReader::new(tokio::io::stdin());
    server.run(operator, tokio::io::stdout()).await
}

/// Accept connections until the state leaves `Listening`.
///
/// The listener is dropped on return; the returned set holds handlers that
/// are still running.
async fn accept_loop(
    listener: TcpListener,
    read_cap: usize,
    mut state: watch::Receiver<ServerState>,
) -> (JoinSet<ConnectionSummary>, u64) {
    let mut handlers = JoinSet::new();
    let mut accepted = 0u64;

    loop {
        tokio::select! {
            // Only the operator watcher sends, and only to leave Listening.
            // Err means the sender is gone, which also ends listening.
            _ = state.changed() => break,

            result = listener.accept() => match result {
                Ok((stream, peer)) => {
                    info!(peer = %peer, "New connection");
                    accepted += 1;
                    handlers.spawn(echo::handle_connection(stream, peer, read_cap));
                }
                Err(e) => {
                    error!(error = %e, "Failed to accept connection");
                }
            },

            Some(joined) = handlers.join_next(), if !handlers.is_empty() => reap(joined),
        }
    }

    drop(listener);
    (handlers, accepted)
}

/// Read operator lines until `exit` or end of input, then flip the state
/// to `ShuttingDown`. The state is flipped even when the console fails.
async fn watch_operator<R, W>(
    operator: R,
    console: &mut W,
    state: &watch::Sender<ServerState>,
) -> io::Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let result = read_until_exit(operator, console).await;
    state.send_replace(ServerState::ShuttingDown);
    info!("Server shutting down");
    result
}

async fn read_until_exit<R, W>(operator: R, console: &mut W) -> io::Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = operator.lines();

    loop {
        console.write_all(b"> ").await?;
        console.flush().await?;

        match lines.next_line().await? {
            None => {
                debug!("Operator input closed");
                return Ok(());
            }
            Some(line) if line.trim().eq_ignore_ascii_case("exit") => {
                return say(console, "Shutting down the server...").await;
            }
            Some(_) => {
                say(console, "Invalid command. Type 'exit' to stop the server.").await?;
            }
        }
    }
}

fn reap(joined: Result<ConnectionSummary, tokio::task::JoinError>) {
    match joined {
        Ok(summary) => debug!(
            reason = ?summary.reason,
            messages = summary.messages,
            "Handler finished"
        ),
        Err(e) => error!(error = %e, "Connection handler panicked"),
    }
}

async fn say<W: AsyncWrite + Unpin>(console: &mut W, line: &str) -> io::Result<()> {
    console.write_all(line.as_bytes()).await?;
    console.write_all(b"\n").await?;
    console.flush().await
}

/// Create a non-blocking TCP listener with SO_REUSEADDR.
fn create_listener(addr: SocketAddr, backlog: i32) -> io::Result<std::net::TcpListener> {
    let socket = socket2::Socket::new(
        match addr {
            SocketAddr::V4(_) => socket2::Domain::IPV4,
            SocketAddr::V6(_) => socket2::Domain::IPV6,
        },
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )?;

    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(backlog)?;

    Ok(socket.into())
}

/// Server startup and console errors
#[derive(Debug)]
pub enum ServerError {
    Resolve(String, io::Error),
    Bind(SocketAddr, io::Error),
    Console(io::Error),
}

impl std::fmt::Display for ServerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServerError::Resolve(address, e) => {
                write!(f, "Failed to resolve listen address '{}': {}", address, e)
            }
            ServerError::Bind(addr, e) => write!(f, "Failed to bind to {}: {}", addr, e),
            ServerError::Console(e) => write!(f, "Console I/O failed: {}", e),
        }
    }
}

impl std::error::Error for ServerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ServerError::Resolve(_, e) | ServerError::Bind(_, e) | ServerError::Console(e) => Some(e),
        }
    }
}
