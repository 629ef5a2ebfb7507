//! Configuration for the cix client and the cixd server.
//!
//! The server reads command-line arguments and an optional TOML file; CLI
//! arguments take precedence over config file values. The client is
//! configured from the command line and environment only.

use crate::error::ConfigError;
use clap::Parser;
use serde::Deserialize;
use std::net::{SocketAddr, ToSocketAddrs};
use std::path::PathBuf;

/// Port used when neither the command line, the environment nor a config
/// file names one.
pub const DEFAULT_PORT: u16 = 50000;

/// Default maximum number of concurrent workers.
pub const DEFAULT_MAX_WORKERS: usize = 10000;

/// Command-line arguments for the server
#[derive(Parser, Debug)]
#[command(name = "cixd")]
#[command(version = "0.1.0")]
#[command(about = "cix file transfer server", long_about = None)]
pub struct ServerArgs {
    /// Port to listen on
    #[arg(env = "CIX_SERVER_PORT")]
    pub port: Option<u16>,

    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Address to bind to (e.g., 0.0.0.0)
    #[arg(short = 'l', long)]
    pub listen: Option<String>,

    /// Directory files are served from and stored into
    #[arg(short, long)]
    pub root: Option<PathBuf>,

    /// Maximum number of concurrent connections
    #[arg(short = 'w', long)]
    pub max_workers: Option<usize>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

/// Command-line arguments for the client
#[derive(Parser, Debug)]
#[command(name = "cix")]
#[command(version = "0.1.0")]
#[command(about = "cix file transfer client", long_about = None)]
pub struct ClientArgs {
    /// Server host name or address
    #[arg(env = "CIX_SERVER_HOST", default_value = "localhost")]
    pub host: String,

    /// Server port
    #[arg(env = "CIX_SERVER_PORT", default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Local directory files are read from and written to
    #[arg(short, long, default_value = ".")]
    pub dir: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub listing: ListingSection,
    #[serde(default)]
    pub logging: LoggingSection,
}

/// Server-related configuration
#[derive(Debug, Deserialize)]
pub struct ServerSection {
    /// Address to bind to
    #[serde(default = "default_listen")]
    pub listen: String,
    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,
    /// Directory served
    #[serde(default = "default_root")]
    pub root: PathBuf,
    /// Maximum number of concurrent workers
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            port: default_port(),
            root: default_root(),
            max_workers: default_max_workers(),
        }
    }
}

/// Host listing command used for LS
#[derive(Debug, Deserialize)]
pub struct ListingSection {
    #[serde(default = "default_listing_command")]
    pub command: String,
}

impl Default for ListingSection {
    fn default() -> Self {
        Self {
            command: default_listing_command(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingSection {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_listen() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_root() -> PathBuf {
    PathBuf::from(".")
}

fn default_max_workers() -> usize {
    DEFAULT_MAX_WORKERS
}

fn default_listing_command() -> String {
    "ls -l 2>&1".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Final resolved server configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub listen: String,
    pub port: u16,
    pub root: PathBuf,
    pub max_workers: usize,
    pub listing_command: String,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self::merge(
            ServerArgs {
                port: None,
                config: None,
                listen: None,
                root: None,
                max_workers: None,
                log_level: default_log_level(),
            },
            TomlConfig::default(),
        )
    }
}

impl Config {
    /// Load configuration from CLI args and optional TOML file.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_args(ServerArgs::parse())
    }

    pub fn from_args(args: ServerArgs) -> Result<Self, ConfigError> {
        let toml_config = match args.config {
            Some(ref path) => {
                let contents =
                    std::fs::read_to_string(path).map_err(|source| ConfigError::FileRead {
                        path: path.clone(),
                        source,
                    })?;
                toml::from_str(&contents).map_err(|source| ConfigError::TomlParse {
                    path: path.clone(),
                    source,
                })?
            }
            None => TomlConfig::default(),
        };

        Ok(Self::merge(args, toml_config))
    }

    fn merge(args: ServerArgs, file: TomlConfig) -> Self {
        Config {
            listen: args.listen.unwrap_or(file.server.listen),
            port: args.port.unwrap_or(file.server.port),
            root: args.root.unwrap_or(file.server.root),
            max_workers: args.max_workers.unwrap_or(file.server.max_workers),
            listing_command: file.listing.command,
            log_level: if args.log_level != "info" {
                args.log_level
            } else {
                file.logging.level
            },
        }
    }

    /// Resolve `listen:port` to a socket address.
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        let target = format!("{}:{}", self.listen, self.port);
        target
            .to_socket_addrs()
            .ok()
            .and_then(|mut addrs| addrs.next())
            .ok_or(ConfigError::InvalidAddress(target))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = TomlConfig::default();
        assert_eq!(config.server.listen, "0.0.0.0");
        assert_eq!(config.server.port, 50000);
        assert_eq!(config.server.max_workers, 10000);
        assert_eq!(config.listing.command, "ls -l 2>&1");
    }

    #[test]
    fn test_toml_parsing() {
        let toml_str = r#"
            [server]
            listen = "127.0.0.1"
            port = 9000
            root = "/srv/cix"
            max_workers = 16

            [listing]
            command = "ls -la"

            [logging]
            level = "debug"
        "#;

        let config: TomlConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.server.listen, "127.0.0.1");
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.root, PathBuf::from("/srv/cix"));
        assert_eq!(config.server.max_workers, 16);
        assert_eq!(config.listing.command, "ls -la");
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_cli_overrides_file() {
        let args = ServerArgs::parse_from(["cixd", "7777", "--max-workers", "3"]);
        let file: TomlConfig = toml::from_str("[server]\nport = 9000\nmax_workers = 16\n").unwrap();

        let config = Config::merge(args, file);
        assert_eq!(config.port, 7777);
        assert_eq!(config.max_workers, 3);
        assert_eq!(config.listen, "0.0.0.0");
    }

    #[test]
    fn test_socket_addr() {
        let config = Config {
            listen: "127.0.0.1".to_string(),
            port: 0,
            ..Config::default()
        };
        assert_eq!(config.socket_addr().unwrap(), "127.0.0.1:0".parse().unwrap());

        let config = Config {
            listen: "not an address".to_string(),
            ..Config::default()
        };
        assert!(matches!(
            config.socket_addr(),
            Err(ConfigError::InvalidAddress(_))
        ));
    }

    #[test]
    fn test_missing_config_file() {
        let args = ServerArgs::parse_from(["cixd", "--config", "/nonexistent/cixd.toml"]);
        assert!(matches!(
            Config::from_args(args),
            Err(ConfigError::FileRead { .. })
        ));
    }
}
