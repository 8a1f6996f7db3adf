//! Configuration module for tagged-echo.
//!
//! Supports both command-line arguments and TOML configuration file.
//! CLI arguments take precedence over config file values.

use clap::{Parser, Subcommand};
use serde::Deserialize;
use std::path::PathBuf;

/// Command-line arguments
#[derive(Parser, Debug)]
#[command(name = "tagged-echo")]
#[command(author = "tagged-echo authors")]
#[command(version = "0.1.0")]
#[command(about = "A loopback TCP echo server and client", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "info")]
    pub log_level: String,

    #[command(subcommand)]
    pub role: RoleArgs,
}

/// Which side of the echo exchange to run
#[derive(Subcommand, Debug)]
pub enum RoleArgs {
    /// Show the server menu
    Server {
        /// Address to listen on (e.g., 127.0.0.1:12345)
        #[arg(short, long)]
        address: Option<String>,
    },
    /// Show the client menu
    Client {
        /// Server address to connect to (e.g., 127.0.0.1:12345)
        #[arg(short, long)]
        address: Option<String>,
    },
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub client: ClientConfig,
    #[serde(default)]
    pub protocol: ProtocolConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server-related configuration
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// Address to bind to
    #[serde(default = "default_address")]
    pub listen: String,
    /// Pending connection queue length
    #[serde(default = "default_backlog")]
    pub backlog: i32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_address(),
            backlog: default_backlog(),
        }
    }
}

/// Client-related configuration
#[derive(Debug, Deserialize)]
pub struct ClientConfig {
    /// Address of the server
    #[serde(default = "default_address")]
    pub connect: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connect: default_address(),
        }
    }
}

/// Wire settings shared by both roles
#[derive(Debug, Deserialize)]
pub struct ProtocolConfig {
    /// Maximum bytes taken by a single socket read
    #[serde(default = "default_read_buffer")]
    pub read_buffer: usize,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            read_buffer: default_read_buffer(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_address() -> String {
    "127.0.0.1:12345".to_string()
}

fn default_backlog() -> i32 {
    1024
}

fn default_read_buffer() -> usize {
    100
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Selected role
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Server,
    Client,
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub role: Role,
    /// Listen address for the server, connect address for the client.
    pub address: String,
    pub backlog: i32,
    pub read_buffer: usize,
    pub log_level: String,
}

impl Config {
    /// Load configuration from CLI args and optional TOML file.
    /// CLI arguments take precedence over TOML file values.
    pub fn load() -> Result<Self, ConfigError> {
        let cli = CliArgs::parse();

        let toml_config = if let Some(ref config_path) = cli.config {
            let contents = std::fs::read_to_string(config_path)
                .map_err(|e| ConfigError::FileRead(config_path.clone(), e))?;
            toml::from_str(&contents)
                .map_err(|e| ConfigError::TomlParse(config_path.clone(), e))?
        } else {
            TomlConfig::default()
        };

        Self::resolve(cli, toml_config)
    }

    /// Merge parsed CLI args over a parsed TOML file.
    fn resolve(cli: CliArgs, toml_config: TomlConfig) -> Result<Self, ConfigError> {
        let (role, address) = match cli.role {
            RoleArgs::Server { address } => {
                (Role::Server, address.unwrap_or(toml_config.server.listen))
            }
            RoleArgs::Client { address } => {
                (Role::Client, address.unwrap_or(toml_config.client.connect))
            }
        };

        let read_buffer = toml_config.protocol.read_buffer;
        if read_buffer == 0 {
            return Err(ConfigError::InvalidReadBuffer);
        }

        Ok(Config {
            role,
            address,
            backlog: toml_config.server.backlog,
            read_buffer,
            log_level: if cli.log_level != "info" {
                cli.log_level
            } else {
                toml_config.logging.level
            },
        })
    }
}

/// Configuration loading errors
#[derive(Debug)]
pub enum ConfigError {
    FileRead(PathBuf, std::io::Error),
    TomlParse(PathBuf, toml::de::Error),
    InvalidReadBuffer,
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::FileRead(path, e) => {
                write!(f, "Failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::TomlParse(path, e) => {
                write!(f, "Failed to parse config file '{}': {}", path.display(), e)
            }
            ConfigError::InvalidReadBuffer => {
                write!(f, "protocol.read_buffer must be greater than zero")
            }
        }
    }
}

impl std::error::Error for ConfigError {}
