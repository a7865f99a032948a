//! Configuration for the message client and server.
//!
//! Both binaries take command-line arguments. The server also accepts a
//! TOML configuration file; CLI arguments take precedence over file values.

use crate::error::Error;
use crate::protocol::Request;
use clap::Parser;
use serde::Deserialize;
use std::path::PathBuf;

/// Handler program spawned per connection when none is configured.
pub const DEFAULT_HANDLER: &str = "/usr/local/bin/simple_message_server_logic";

/// Command-line arguments for the message client
#[derive(Parser, Debug)]
#[command(name = "simple_message_client")]
#[command(version = "0.1.0")]
#[command(about = "Send a message to a simple message server", long_about = None)]
pub struct ClientArgs {
    /// Server host name or address
    #[arg(short, long)]
    pub server: String,

    /// Server port or service name
    #[arg(short, long)]
    pub port: String,

    /// User name sent with the message
    #[arg(short, long)]
    pub user: String,

    /// Optional image URL
    #[arg(short, long)]
    pub image: Option<String>,

    /// Message text
    #[arg(short, long)]
    pub message: String,

    /// Log protocol progress (same as --log-level debug)
    #[arg(short, long)]
    pub verbose: bool,

    /// Directory received files are written to
    #[arg(long, default_value = ".")]
    pub output_dir: PathBuf,

    /// Delete a partially received file when the response breaks off
    #[arg(long)]
    pub remove_partial: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "warn")]
    pub log_level: String,
}

/// Resolved client configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub server: String,
    pub port: String,
    pub request: Request,
    pub output_dir: PathBuf,
    pub remove_partial: bool,
    pub log_level: String,
}

impl ClientConfig {
    /// Load configuration from the process arguments.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_args(ClientArgs::parse())
    }

    pub fn from_args(args: ClientArgs) -> Result<Self, ConfigError> {
        let request = Request::new(args.user, args.message, args.image)
            .map_err(ConfigError::Request)?;

        Ok(ClientConfig {
            server: args.server,
            port: args.port,
            request,
            output_dir: args.output_dir,
            remove_partial: args.remove_partial,
            log_level: effective_level(args.verbose, args.log_level),
        })
    }
}

/// Command-line arguments for the message server
#[derive(Parser, Debug)]
#[command(name = "simple_message_server")]
#[command(version = "0.1.0")]
#[command(
    about = "Accept message connections and hand each to a handler process",
    long_about = None
)]
pub struct ServerArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Port to listen on
    #[arg(short, long, value_parser = clap::value_parser!(u16).range(1..))]
    pub port: Option<u16>,

    /// Address to bind to
    #[arg(long)]
    pub host: Option<String>,

    /// Program started for every accepted connection
    #[arg(long)]
    pub handler: Option<PathBuf>,

    /// Log connection handling (same as --log-level debug)
    #[arg(short, long)]
    pub verbose: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    pub log_level: Option<String>,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server-related configuration
#[derive(Debug, Deserialize)]
pub struct ServerSection {
    /// Address to bind to
    #[serde(default = "default_host")]
    pub host: String,
    /// Port to listen on
    pub port: Option<u16>,
    /// Handler program path
    #[serde(default = "default_handler")]
    pub handler: PathBuf,
    /// Arguments passed to the handler
    #[serde(default)]
    pub handler_args: Vec<String>,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: None,
            handler: default_handler(),
            handler_args: Vec::new(),
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

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_handler() -> PathBuf {
    PathBuf::from(DEFAULT_HANDLER)
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Final resolved server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub handler: PathBuf,
    pub handler_args: Vec<String>,
    pub log_level: String,
}

impl ServerConfig {
    /// Load configuration from CLI args and optional TOML file.
    /// CLI arguments take precedence over TOML file values.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_args(ServerArgs::parse())
    }

    pub fn from_args(cli: ServerArgs) -> Result<Self, ConfigError> {
        let toml_config = if let Some(ref config_path) = cli.config {
            let contents =
                std::fs::read_to_string(config_path).map_err(|source| ConfigError::FileRead {
                    path: config_path.clone(),
                    source,
                })?;
            toml::from_str(&contents).map_err(|source| ConfigError::TomlParse {
                path: config_path.clone(),
                source,
            })?
        } else {
            TomlConfig::default()
        };

        Self::merge(cli, toml_config)
    }

    fn merge(cli: ServerArgs, toml_config: TomlConfig) -> Result<Self, ConfigError> {
        let port = cli
            .port
            .or(toml_config.server.port)
            .ok_or(ConfigError::MissingPort)?;
        if port == 0 {
            return Err(ConfigError::InvalidPort(port));
        }

        let level = cli.log_level.unwrap_or(toml_config.logging.level);

        Ok(ServerConfig {
            host: cli.host.unwrap_or(toml_config.server.host),
            port,
            handler: cli.handler.unwrap_or(toml_config.server.handler),
            handler_args: toml_config.server.handler_args,
            log_level: effective_level(cli.verbose, level),
        })
    }
}

/// `-v` forces at least debug output.
fn effective_level(verbose: bool, level: String) -> String {
    if verbose && !matches!(level.as_str(), "trace" | "debug") {
        return "debug".to_string();
    }
    level
}

/// Configuration loading errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{}': {source}", path.display())]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse config file '{}': {source}", path.display())]
    TomlParse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("No port given on the command line or in the config file")]
    MissingPort,
    #[error("Invalid port number {0}")]
    InvalidPort(u16),
    #[error(transparent)]
    Request(Error),
}
