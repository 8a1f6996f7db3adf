//! tagged-echo: a loopback TCP echo server and its interactive client
//!
//! - `tagged-echo server`: echoes every message back as
//!   `Server received: <message>` until the operator types `exit`
//! - `tagged-echo client`: sends operator lines and prints the replies
//!
//! A client sending `shutdown` gets a farewell and is disconnected; the
//! server keeps running for everyone else.
//!
//! Configuration via CLI arguments or TOML file.

mod client;
mod config;
mod menu;
mod protocols;
mod server;

use config::{Config, Role};
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging; stdout belongs to the console prompts
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    info!(
        role = ?config.role,
        address = %config.address,
        read_buffer = config.read_buffer,
        "Starting tagged-echo"
    );

    let role_menu = match config.role {
        Role::Server => &menu::SERVER,
        Role::Client => &menu::CLIENT,
    };

    // Stdin is locked per line so the session can read it afterwards.
    let outcome = menu::run(
        role_menu,
        |line| std::io::stdin().read_line(line),
        &mut std::io::stdout(),
        || match config.role {
            Role::Server => run_server(&config),
            Role::Client => run_client(&config),
        },
    )?;

    info!(?outcome, "Done");
    Ok(())
}

/// Run a server session on a single-threaded runtime.
fn run_server(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    let summary = runtime.block_on(server::start(config))?;
    info!(accepted = summary.accepted, state = ?summary.state, "Server session finished");
    Ok(())
}

/// Run a client session on a single-threaded runtime.
fn run_client(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    let end = runtime.block_on(client::start(config))?;
    info!(?end, "Client session finished");
    Ok(())
}
