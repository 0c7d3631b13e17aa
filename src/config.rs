//! Configuration module for the todosync server.
//!
//! Supports both command-line arguments and TOML configuration file.
//! CLI arguments take precedence over config file values.

use clap::Parser;
use serde::Deserialize;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use thiserror::Error;

use crate::protocol::frame::DEFAULT_MAX_FRAME_BYTES;
use crate::runtime::DEFAULT_READ_BUFFER_SIZE;

/// Command-line arguments for the server
#[derive(Parser, Debug)]
#[command(name = "todosync")]
#[command(author = "todosync authors")]
#[command(version = "0.1.0")]
#[command(about = "A task-sync server speaking a blank-line framed text protocol", long_about = None)]
pub struct CliArgs {
    /// TCP port to listen on
    pub port: u16,

    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Address to bind to (e.g., 127.0.0.1)
    #[arg(short = 'l', long)]
    pub host: Option<IpAddr>,

    /// Maximum number of concurrent connections
    #[arg(short = 'm', long)]
    pub max_connections: Option<usize>,

    /// Largest request accepted before the connection is dropped, in bytes
    #[arg(long)]
    pub max_frame_bytes: Option<usize>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server-related configuration
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// Address to bind to
    #[serde(default = "default_host")]
    pub host: IpAddr,
    /// Maximum number of concurrent connections
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Listen backlog
    #[serde(default = "default_backlog")]
    pub backlog: i32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            max_connections: default_max_connections(),
            backlog: default_backlog(),
        }
    }
}

/// Per-connection limits
#[derive(Debug, Deserialize)]
pub struct LimitsConfig {
    /// Largest unterminated request kept in memory
    #[serde(default = "default_max_frame_bytes")]
    pub max_frame_bytes: usize,
    /// Size of each socket read
    #[serde(default = "default_read_buffer_size")]
    pub read_buffer_size: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_frame_bytes: default_max_frame_bytes(),
            read_buffer_size: default_read_buffer_size(),
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

fn default_host() -> IpAddr {
    IpAddr::from([0, 0, 0, 0])
}

fn default_max_connections() -> usize {
    10_000
}

fn default_backlog() -> i32 {
    1024
}

fn default_max_frame_bytes() -> usize {
    DEFAULT_MAX_FRAME_BYTES
}

fn default_read_buffer_size() -> usize {
    DEFAULT_READ_BUFFER_SIZE
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub host: IpAddr,
    pub port: u16,
    pub max_connections: usize,
    pub backlog: i32,
    pub max_frame_bytes: usize,
    pub read_buffer_size: usize,
    pub log_level: String,
}

impl Config {
    /// Load configuration from CLI args and optional TOML file.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_args(CliArgs::parse())
    }

    /// Merge parsed CLI args over the TOML file they point at, if any.
    pub fn from_args(cli: CliArgs) -> Result<Self, ConfigError> {
        let toml_config = if let Some(ref config_path) = cli.config {
            let contents = std::fs::read_to_string(config_path)
                .map_err(|e| ConfigError::FileRead(config_path.clone(), e))?;
            toml::from_str(&contents)
                .map_err(|e| ConfigError::TomlParse(config_path.clone(), e))?
        } else {
            TomlConfig::default()
        };

        let config = Config {
            host: cli.host.unwrap_or(toml_config.server.host),
            port: cli.port,
            max_connections: cli
                .max_connections
                .unwrap_or(toml_config.server.max_connections),
            backlog: toml_config.server.backlog,
            max_frame_bytes: cli
                .max_frame_bytes
                .unwrap_or(toml_config.limits.max_frame_bytes),
            read_buffer_size: toml_config.limits.read_buffer_size,
            log_level: if cli.log_level != "info" {
                cli.log_level
            } else {
                toml_config.logging.level
            },
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [
            ("max_connections", self.max_connections),
            ("max_frame_bytes", self.max_frame_bytes),
            ("read_buffer_size", self.read_buffer_size),
        ] {
            if value == 0 {
                return Err(ConfigError::Invalid(name, "must be greater than zero"));
            }
        }
        Ok(())
    }

    /// Socket address the server binds to.
    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{}': {}", .0.display(), .1)]
    FileRead(PathBuf, #[source] std::io::Error),

    #[error("Failed to parse config file '{}': {}", .0.display(), .1)]
    TomlParse(PathBuf, #[source] toml::de::Error),

    #[error("Invalid value for {0}: {1}")]
    Invalid(&'static str, &'static str),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = TomlConfig::default();
        assert_eq!(config.server.host, IpAddr::from([0, 0, 0, 0]));
        assert_eq!(config.server.max_connections, 10_000);
        assert_eq!(config.limits.max_frame_bytes, 1024 * 1024);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_toml_parsing() {
        let toml_str = r#"
            [server]
            host = "127.0.0.1"
            max_connections = 64
            backlog = 16

            [limits]
            max_frame_bytes = 4096
            read_buffer_size = 512

            [logging]
            level = "debug"
        "#;

        let config: TomlConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.server.host, IpAddr::from([127, 0, 0, 1]));
        assert_eq!(config.server.max_connections, 64);
        assert_eq!(config.server.backlog, 16);
        assert_eq!(config.limits.max_frame_bytes, 4096);
        assert_eq!(config.limits.read_buffer_size, 512);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_port_is_required_and_numeric() {
        assert!(CliArgs::try_parse_from(["todosync"]).is_err());
        assert!(CliArgs::try_parse_from(["todosync", "eighty"]).is_err());
        assert!(CliArgs::try_parse_from(["todosync", "70000"]).is_err());

        let cli = CliArgs::try_parse_from(["todosync", "7000"]).unwrap();
        let config = Config::from_args(cli).unwrap();
        assert_eq!(config.listen_addr(), "0.0.0.0:7000".parse().unwrap());
    }

    #[test]
    fn test_cli_overrides_file() {
        let mut file = temp_config_file("cli_overrides_file.toml");
        writeln!(
            file.1,
            "[server]\nhost = \"127.0.0.1\"\nmax_connections = 5\n[logging]\nlevel = \"warn\""
        )
        .unwrap();

        let path = file.0.to_str().unwrap();
        let cli = CliArgs::try_parse_from(["todosync", "9000", "-c", path, "-m", "7"]).unwrap();
        let config = Config::from_args(cli).unwrap();
        assert_eq!(config.host, IpAddr::from([127, 0, 0, 1]));
        assert_eq!(config.max_connections, 7);
        assert_eq!(config.log_level, "warn");

        std::fs::remove_file(&file.0).unwrap();
    }

    #[test]
    fn test_missing_config_file() {
        let cli =
            CliArgs::try_parse_from(["todosync", "9000", "-c", "/nonexistent/todosync.toml"])
                .unwrap();
        let err = Config::from_args(cli).unwrap_err();
        assert!(matches!(err, ConfigError::FileRead(..)));
        assert!(err
            .to_string()
            .starts_with("Failed to read config file '/nonexistent/todosync.toml': "));
    }

    #[test]
    fn test_bad_toml_reports_path() {
        let mut file = temp_config_file("bad_toml.toml");
        writeln!(file.1, "[server]\nmax_connections = \"many\"").unwrap();

        let path = file.0.to_str().unwrap().to_string();
        let cli = CliArgs::try_parse_from(["todosync", "9000", "-c", &path]).unwrap();
        let err = Config::from_args(cli).unwrap_err();
        assert!(matches!(err, ConfigError::TomlParse(..)));
        assert!(err
            .to_string()
            .starts_with(&format!("Failed to parse config file '{path}': ")));

        std::fs::remove_file(&file.0).unwrap();
    }

    #[test]
    fn test_zero_limit_rejected() {
        let cli = CliArgs::try_parse_from(["todosync", "9000", "--max-frame-bytes", "0"]).unwrap();
        assert!(matches!(
            Config::from_args(cli),
            Err(ConfigError::Invalid("max_frame_bytes", _))
        ));
    }

    fn temp_config_file(name: &str) -> (PathBuf, std::fs::File) {
        let path = std::env::temp_dir().join(format!("todosync-{}-{name}", std::process::id()));
        let file = std::fs::File::create(&path).unwrap();
        (path, file)
    }
}
